//! Kubernetes events published on topology resources.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

// Event reasons
pub const REASON_SUCCESSFUL_CREATE_OR_UPDATE: &str = "SuccessfulCreateOrUpdate";
pub const REASON_FAILED_CREATE_OR_UPDATE: &str = "FailedCreateOrUpdate";
pub const REASON_SUCCESSFUL_DELETE: &str = "SuccessfulDelete";
pub const REASON_FAILED_DELETE: &str = "FailedDelete";
pub const REASON_FAILED_SCALE_DOWN: &str = "FailedScaleDown";

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// Destination of human readable events.
///
/// Publishing is best effort: failures are logged, never returned.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, object: &ObjectReference, severity: Severity, reason: &str, note: &str);
}

/// [`EventSink`] writing `events.k8s.io` Events.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, object: &ObjectReference, severity: Severity, reason: &str, note: &str) {
        let event = Event {
            type_: match severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(
                reason = %reason,
                object = ?object.name,
                "Failed to publish event: {}", e
            );
        }
    }
}
