//! Federation strategy

use super::{secret_key, ReconcileFunc};
use crate::crd::Federation;
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::{split_list, FederationDefinition};
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use crate::store::Store;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;

pub struct FederationReconciler {
    store: Arc<dyn Store>,
}

impl FederationReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

fn federation_definition(federation: &Federation, uri: &str) -> FederationDefinition {
    let spec = &federation.spec;
    FederationDefinition {
        uri: split_list(uri),
        expires: spec.expires,
        message_ttl: spec.message_ttl,
        max_hops: spec.max_hops,
        prefetch_count: spec.prefetch_count,
        reconnect_delay: spec.reconnect_delay,
        ack_mode: spec.ack_mode.clone(),
        trust_user_id: spec.trust_user_id,
        exchange: spec.exchange.clone(),
        queue: spec.queue.clone(),
    }
}

#[async_trait]
impl ReconcileFunc<Federation> for FederationReconciler {
    async fn declare(&self, gateway: &dyn Gateway, federation: &Federation) -> Result<()> {
        let secret_name = &federation.spec.uri_secret.name;
        let uri = secret_key(
            self.store.as_ref(),
            &federation.namespace().unwrap_or_default(),
            secret_name,
            "uri",
        )
        .await
        .map_err(|e| {
            OperatorError::Reconciliation(format!(
                "failed to parse federation uri secret; secret name: {secret_name}, error: {e}"
            ))
        })?;
        let definition = federation_definition(federation, &uri);
        validate_response(
            gateway
                .put_federation_upstream(&federation.spec.vhost, &federation.spec.name, &definition)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, federation: &Federation) -> Result<()> {
        validate_delete_response(
            gateway
                .delete_federation_upstream(&federation.spec.vhost, &federation.spec.name)
                .await?,
        )
    }
}
