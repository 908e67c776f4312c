//! Vhost strategy

use super::ReconcileFunc;
use crate::crd::Vhost;
use crate::error::Result;
use crate::rabbitmq::settings::VhostSettings;
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use async_trait::async_trait;

pub struct VhostReconciler;

#[async_trait]
impl ReconcileFunc<Vhost> for VhostReconciler {
    async fn declare(&self, gateway: &dyn Gateway, vhost: &Vhost) -> Result<()> {
        let settings = VhostSettings {
            tracing: vhost.spec.tracing,
            tags: vhost.spec.tags.join(","),
        };
        validate_response(gateway.put_vhost(&vhost.spec.name, &settings).await?)
    }

    async fn delete(&self, gateway: &dyn Gateway, vhost: &Vhost) -> Result<()> {
        validate_delete_response(gateway.delete_vhost(&vhost.spec.name).await?)
    }
}
