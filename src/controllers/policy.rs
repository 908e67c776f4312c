//! Policy strategy

use super::ReconcileFunc;
use crate::crd::Policy;
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::PolicyDefinition;
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use async_trait::async_trait;

pub struct PolicyReconciler;

fn policy_definition(policy: &Policy) -> Result<PolicyDefinition> {
    if !policy.spec.definition.is_object() {
        return Err(OperatorError::Serialization(
            "failed to unmarshall policy definition: expected a JSON object".to_string(),
        ));
    }
    Ok(PolicyDefinition {
        pattern: policy.spec.pattern.clone(),
        apply_to: policy.spec.apply_to.clone(),
        priority: policy.spec.priority,
        definition: policy.spec.definition.clone(),
    })
}

#[async_trait]
impl ReconcileFunc<Policy> for PolicyReconciler {
    async fn declare(&self, gateway: &dyn Gateway, policy: &Policy) -> Result<()> {
        let definition = policy_definition(policy)?;
        validate_response(
            gateway
                .put_policy(&policy.spec.vhost, &policy.spec.name, &definition)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, policy: &Policy) -> Result<()> {
        validate_delete_response(gateway.delete_policy(&policy.spec.vhost, &policy.spec.name).await?)
    }
}
