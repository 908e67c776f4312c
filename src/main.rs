//! RabbitMQ messaging topology operator
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! rabbitmq-topology-operator
//!
//! # Watch a single namespace with debug logging
//! RUST_LOG=debug rabbitmq-topology-operator --namespace rabbitmq-system
//! ```

use clap::Parser;
use kube::Client;
use rabbitmq_topology_operator::config::DEFAULT_SYNC_PERIOD;
use rabbitmq_topology_operator::leader_election::{self, LeaderElector};
use rabbitmq_topology_operator::rabbitmq::{
    ManagementClientFactory, ReferenceResolver, SecretStore, VaultClient, VaultConfig,
};
use rabbitmq_topology_operator::store::KubeStore;
use rabbitmq_topology_operator::{spawn_controllers, ControllerTasks, Dependencies, OperatorConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RabbitMQ messaging topology operator
#[derive(Parser, Debug)]
#[command(name = "rabbitmq-topology-operator")]
#[command(version, about = "Kubernetes operator for RabbitMQ messaging topology")]
struct Args {
    /// Enable leader election for HA deployments
    #[arg(long, default_value = "false")]
    leader_election: bool,

    /// Namespace for the leader election Lease (auto-detected if empty)
    #[arg(long, default_value = "")]
    leader_election_namespace: String,

    /// Namespace to watch (empty for all namespaces)
    #[arg(long, env = "OPERATOR_SCOPE_NAMESPACE", default_value = "")]
    namespace: String,

    /// Domain appended to cluster service host names, e.g. cluster.local
    #[arg(long, env = "MESSAGING_DOMAIN_NAME", default_value = "")]
    cluster_domain: String,

    /// Seconds between reconciliations of unchanged resources
    #[arg(long, env = "SYNC_PERIOD", default_value_t = DEFAULT_SYNC_PERIOD.as_secs())]
    sync_period: u64,

    /// Vault address; credentials stored in Vault are unavailable when unset
    #[arg(long, env = "VAULT_ADDR")]
    vault_addr: Option<String>,

    /// Vault role for the Kubernetes auth method
    #[arg(long, env = "OPERATOR_VAULT_ROLE", default_value = "messaging-topology-operator")]
    vault_role: String,

    /// Mount path of the Kubernetes auth method
    #[arg(long, env = "OPERATOR_VAULT_AUTH_PATH", default_value = "auth/kubernetes")]
    vault_auth_path: String,

    /// Vault Enterprise namespace
    #[arg(long, env = "OPERATOR_VAULT_NAMESPACE")]
    vault_namespace: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();

    info!("Starting RabbitMQ topology operator");
    info!("Leader election: {}", args.leader_election);
    if args.namespace.is_empty() {
        info!("Watching all namespaces");
    } else {
        info!("Watching namespace: {}", args.namespace);
    }

    let client = Client::try_default().await?;

    let elector = if args.leader_election {
        let ns = leader_election::detect_namespace(&args.leader_election_namespace);
        let elector = LeaderElector::new(client.clone(), &ns);
        elector.acquire().await?;
        Some(Arc::new(elector))
    } else {
        None
    };

    let vault = match &args.vault_addr {
        Some(address) => {
            let vault = Arc::new(VaultClient::new(VaultConfig {
                address: address.clone(),
                namespace: args.vault_namespace.clone(),
                auth_path: args.vault_auth_path.clone(),
                role: args.vault_role.clone(),
            })?);
            vault.start().await?;
            Some(vault)
        }
        None => {
            info!("VAULT_ADDR not set, Vault secret backends are disabled");
            None
        }
    };
    let secret_store = vault.clone().map(|v| v as Arc<dyn SecretStore>);

    let config = OperatorConfig::new(Duration::from_secs(args.sync_period), &args.cluster_domain);
    let store = Arc::new(KubeStore::new(client.clone()));
    let deps = Dependencies {
        store: store.clone(),
        resolver: ReferenceResolver::new(store, secret_store.clone(), config.cluster_domain.clone()),
        gateways: Arc::new(ManagementClientFactory),
        secret_store,
        config,
    };

    let mut controllers = ControllerTasks::new();
    spawn_controllers(&mut controllers, &client, &args.namespace, &deps);

    // Periodic lease renewal (no-op future when leader election is disabled)
    let elector_for_renew = elector.clone();
    let renew_handle = tokio::spawn(async move {
        match elector_for_renew {
            Some(e) => loop {
                tokio::time::sleep(e.renew_interval()).await;
                match e.renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        error!("Lost leader lease");
                        break;
                    }
                    Err(err) => {
                        error!("Failed to renew leader lease: {}", err);
                        break;
                    }
                }
            },
            None => std::future::pending::<()>().await,
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        Some(result) = controllers.join_next() => {
            match result {
                Ok((name, Ok(()))) => warn!(controller = name, "Controller stopped"),
                Ok((name, Err(e))) => error!(controller = name, "Controller error: {}", e),
                Err(e) => error!("Controller task failed: {}", e),
            }
        }
        _ = renew_handle => {
            error!("Leader lease lost, initiating shutdown");
        }
    }
    controllers.abort_all();

    if let Some(vault) = &vault {
        vault.stop().await;
    }
    // Release the lease so a standby replica can take over immediately
    if let Some(e) = &elector {
        e.release().await;
    }

    info!("RabbitMQ topology operator shutting down");
    Ok(())
}
