//! Lease-based leader election.
//!
//! Only the holder of the Lease runs the controllers. Standby replicas block
//! in [`LeaderElector::acquire`] until the lease expires or is released.

use crate::error::{OperatorError, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LEASE_NAME: &str = "rabbitmq-topology-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Namespace holding the Lease: `explicit` when set, else the pod's own
/// namespace, else `default`.
pub fn detect_namespace(explicit: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    std::fs::read_to_string("/var/run/secrets/kubernetes.io/serviceaccount/namespace")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "default".to_string())
}

fn holder(spec: Option<&LeaseSpec>) -> Option<&str> {
    spec.and_then(|s| s.holder_identity.as_deref())
}

fn is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS) as i64;
    match spec.and_then(|s| s.renew_time.as_ref()) {
        Some(MicroTime(renewed)) => now.signed_duration_since(*renewed).num_seconds() > duration,
        None => true,
    }
}

/// The lease spec `identity` would write at `now`, or `None` while another
/// holder's lease is still live. A released lease (no holder) is free.
fn claim(current: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> Option<LeaseSpec> {
    let held_by_us = holder(current) == Some(identity);
    let takeover = !held_by_us;
    if takeover && holder(current).is_some() && !is_expired(current, now) {
        return None;
    }

    let transitions = current.and_then(|s| s.lease_transitions).unwrap_or(0);
    let acquired = if takeover {
        Some(MicroTime(now))
    } else {
        current.and_then(|s| s.acquire_time.clone())
    };
    Some(LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(LEASE_DURATION_SECS),
        acquire_time: acquired,
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(match (current, takeover) {
            (Some(_), true) => transitions + 1,
            _ => transitions,
        }),
        ..Default::default()
    })
}

/// Holder of the operator's `coordination.k8s.io/v1` Lease. Writes rely on
/// `resourceVersion` so two replicas never both win.
pub struct LeaderElector {
    leases: Api<Lease>,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str) -> Self {
        let identity = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("topology-operator-{:08x}", rand::random::<u32>()));
        info!(identity = %identity, namespace = %namespace, lease = LEASE_NAME, "Initialized leader elector");
        Self {
            leases: Api::namespaced(client, namespace),
            identity,
        }
    }

    /// Blocks until the lease is ours.
    pub async fn acquire(&self) -> Result<()> {
        info!(identity = %self.identity, "Waiting to acquire leader lease '{}'", LEASE_NAME);
        loop {
            match self.try_claim().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leader lease");
                    return Ok(());
                }
                Ok(false) => debug!("Lease held by another instance, retrying in {:?}", RETRY_INTERVAL),
                Err(e) => warn!("Lease acquisition error: {}, retrying in {:?}", e, RETRY_INTERVAL),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Renews the lease. `Ok(false)` means another replica holds it now.
    pub async fn renew(&self) -> Result<bool> {
        let lease = self.leases.get(LEASE_NAME).await?;
        if holder(lease.spec.as_ref()) != Some(self.identity.as_str()) {
            return Ok(false);
        }
        let renewed = self.try_claim().await?;
        if renewed {
            debug!("Renewed leader lease");
        } else {
            warn!("Lease conflict during renewal, lost leadership");
        }
        Ok(renewed)
    }

    /// Clears the holder so a standby replica does not wait for expiry.
    pub async fn release(&self) {
        info!(identity = %self.identity, "Releasing leader lease");
        let mut lease = match self.leases.get(LEASE_NAME).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Failed to read lease for release: {}", e);
                return;
            }
        };
        if holder(lease.spec.as_ref()) != Some(self.identity.as_str()) {
            debug!("Lease not held by us, skipping release");
            return;
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
        }
        match self.leases.replace(LEASE_NAME, &PostParams::default(), &lease).await {
            Ok(_) => info!("Released leader lease"),
            Err(e) => warn!("Failed to release leader lease: {}", e),
        }
    }

    /// Interval between renewals, well inside the lease duration.
    pub fn renew_interval(&self) -> Duration {
        RENEW_INTERVAL
    }

    /// Create or update the lease for us. `Ok(false)` when it is held
    /// elsewhere or a concurrent write won.
    async fn try_claim(&self) -> Result<bool> {
        let existing = match self.leases.get(LEASE_NAME).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(ae)) if ae.code == 404 => None,
            Err(e) => return Err(e.into()),
        };
        let current = existing.as_ref().and_then(|l| l.spec.as_ref());
        let Some(spec) = claim(current, &self.identity, Utc::now()) else {
            return Ok(false);
        };

        let written = match existing {
            Some(mut lease) => {
                lease.spec = Some(spec);
                self.leases.replace(LEASE_NAME, &PostParams::default(), &lease).await
            }
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(LEASE_NAME.to_string()),
                        ..Default::default()
                    },
                    spec: Some(spec),
                };
                self.leases.create(&PostParams::default(), &lease).await
            }
        };
        match written.map_err(OperatorError::from) {
            Ok(_) => Ok(true),
            Err(OperatorError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
