//! Request payloads of the RabbitMQ management API.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};

/// Hashing algorithm name matching [`salted_password_hash`].
pub const HASHING_ALGORITHM_SHA512: &str = "rabbit_password_hashing_sha512";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VhostSettings {
    pub tracing: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSettings {
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeSettings {
    #[serde(rename = "type")]
    pub kind: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Map<String, Value>,
}

/// A binding as declared and as listed by the management API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingInfo {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub vhost: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub destination_type: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing)]
    pub properties_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSettings {
    #[serde(skip)]
    pub name: String,
    pub password_hash: String,
    pub hashing_algorithm: String,
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Permissions {
    pub configure: String,
    pub write: String,
    pub read: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicPermissions {
    pub exchange: String,
    pub write: String,
    pub read: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDefinition {
    pub pattern: String,
    #[serde(rename = "apply-to")]
    pub apply_to: String,
    pub priority: i32,
    pub definition: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FederationDefinition {
    pub uri: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ttl: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_mode: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub trust_user_id: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShovelDefinition {
    pub src_uri: Vec<String>,
    pub dest_uri: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_mode: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub add_forward_headers: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dest_add_forward_headers: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dest_add_timestamp_header: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_application_properties: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_exchange_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_properties: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_publish_properties: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_delete_after: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_exchange_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_prefetch_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_queue: Option<String>,
}

/// Value of the `schema_definition_sync_upstream` global parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamEndpoints {
    pub username: String,
    pub password: String,
    pub endpoints: Vec<String>,
}

/// Object arguments of a declared resource; anything else is treated as none.
pub fn arguments_map(arguments: Option<&Value>) -> Map<String, Value> {
    match arguments {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Split a comma separated list, dropping surrounding whitespace.
pub fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).collect()
}

/// Random bytes encoded with URL-safe base64.
pub fn random_encoded_string(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE.encode(buf)
}

/// `base64(salt ++ sha512(salt ++ password))` with a random 4 byte salt.
pub fn salted_password_hash(password: &str) -> String {
    let mut salt = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut salt);
    salted_password_hash_with(&salt, password)
}

fn salted_password_hash_with(salt: &[u8; 4], password: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    let mut salted = Vec::with_capacity(salt.len() + digest.len());
    salted.extend_from_slice(salt);
    salted.extend_from_slice(&digest);
    STANDARD.encode(salted)
}
