//! Runtime configuration shared by the controllers.

use std::time::Duration;

/// Default interval between successful reconciliations of an unchanged resource.
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(36000);

/// Settings every controller reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Requeue interval after a successful pass.
    pub sync_period: Duration,
    /// Suffix appended to `<svc>.<ns>.svc` host names, empty or starting with a dot.
    pub cluster_domain: String,
}

impl OperatorConfig {
    pub fn new(sync_period: Duration, cluster_domain: &str) -> Self {
        Self {
            sync_period,
            cluster_domain: domain_suffix(cluster_domain),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_PERIOD, "")
    }
}

/// `cluster.local` becomes `.cluster.local`; empty stays empty.
fn domain_suffix(domain: &str) -> String {
    let domain = domain.trim();
    if domain.is_empty() || domain.starts_with('.') {
        domain.to_string()
    } else {
        format!(".{domain}")
    }
}
