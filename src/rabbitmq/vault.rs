//! Vault-backed credential lookup.
//!
//! The operator logs in with the Kubernetes auth method using its service
//! account token and keeps the Vault token alive in a background task.

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_secs(5);

/// Source of username and password pairs stored outside Kubernetes.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read_credentials(&self, path: &str) -> Result<(String, String)>;
}

/// Vault connection settings.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub address: String,
    pub namespace: Option<String>,
    pub auth_path: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<AuthInfo>,
}

#[derive(Debug, Deserialize)]
struct AuthInfo {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
}

struct Inner {
    http: Client,
    config: VaultConfig,
    token: RwLock<Option<String>>,
}

/// Vault client holding a token for the Kubernetes auth role.
pub struct VaultClient {
    inner: Arc<Inner>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl VaultClient {
    pub fn new(config: VaultConfig) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                token: RwLock::new(None),
            }),
            renewal: Mutex::new(None),
        })
    }

    /// Log in and start the token renewal task.
    pub async fn start(&self) -> Result<()> {
        let auth = self.inner.login().await?;
        info!(
            role = %self.inner.config.role,
            lease_seconds = auth.lease_duration,
            "Logged in to Vault"
        );
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.keep_alive(auth).await });
        if let Some(previous) = self.renewal.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop renewing the token.
    pub async fn stop(&self) {
        if let Some(handle) = self.renewal.lock().await.take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_namespace(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.namespace {
            Some(ns) if !ns.is_empty() => request.header("X-Vault-Namespace", ns),
            _ => request,
        }
    }

    async fn login(&self) -> Result<AuthInfo> {
        let jwt = tokio::fs::read_to_string(SERVICE_ACCOUNT_TOKEN_PATH)
            .await
            .map_err(|e| {
                OperatorError::SecretStore(format!("unable to read service account token: {e}"))
            })?;
        let url = self.url(&format!("{}/login", self.config.auth_path));
        let response = self
            .with_namespace(self.http.post(url))
            .json(&serde_json::json!({ "role": self.config.role, "jwt": jwt.trim() }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OperatorError::SecretStore(format!(
                "unable to log in with Kubernetes auth: status {}",
                response.status()
            )));
        }
        let body: LoginResponse = response.json().await?;
        let auth = body.auth.ok_or_else(|| {
            OperatorError::SecretStore("no auth info was returned after login".to_string())
        })?;
        *self.token.write().await = Some(auth.client_token.clone());
        Ok(auth)
    }

    async fn renew(&self) -> Result<AuthInfo> {
        let token = self.token().await?;
        let response = self
            .with_namespace(self.http.post(self.url("auth/token/renew-self")))
            .header("X-Vault-Token", token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OperatorError::SecretStore(format!(
                "unable to renew Vault token: status {}",
                response.status()
            )));
        }
        let body: LoginResponse = response.json().await?;
        body.auth
            .ok_or_else(|| OperatorError::SecretStore("no auth info returned on renewal".to_string()))
    }

    async fn keep_alive(self: Arc<Self>, mut auth: AuthInfo) {
        loop {
            let wait = renewal_interval(auth.lease_duration);
            tokio::time::sleep(wait).await;

            let renewed = if auth.renewable {
                self.renew().await
            } else {
                Err(OperatorError::SecretStore("token is not renewable".to_string()))
            };
            auth = match renewed {
                Ok(next) => next,
                Err(e) => {
                    warn!("Vault token renewal failed, logging in again: {}", e);
                    match self.login().await {
                        Ok(next) => next,
                        Err(e) => {
                            error!("Vault login failed: {}", e);
                            AuthInfo {
                                client_token: String::new(),
                                lease_duration: 0,
                                renewable: false,
                            }
                        }
                    }
                }
            };
        }
    }

    async fn token(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| OperatorError::SecretStore("not logged in to Vault".to_string()))
    }
}

/// Renew after two thirds of the lease, never more often than every few seconds.
fn renewal_interval(lease_seconds: u64) -> Duration {
    Duration::from_secs(lease_seconds * 2 / 3).max(MIN_RENEWAL_INTERVAL)
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn read_credentials(&self, path: &str) -> Result<(String, String)> {
        let token = self.inner.token().await?;
        let response = self
            .inner
            .with_namespace(self.inner.http.get(self.inner.url(path)))
            .header("X-Vault-Token", token)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() && status.as_u16() != 404 {
            return Err(OperatorError::SecretStore(format!(
                "unable to read Vault secret: status {status}"
            )));
        }
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        parse_credentials(path, body)
    }
}

/// Extract `username` and `password` from a KV v2 read response.
pub fn parse_credentials(path: &str, body: Value) -> Result<(String, String)> {
    let Some(response) = body.as_object().filter(|o| !o.is_empty()) else {
        return Err(OperatorError::SecretStore(
            "returned Vault secret is nil".to_string(),
        ));
    };
    if let Some(warnings) = response.get("warnings").and_then(Value::as_array) {
        if !warnings.is_empty() {
            return Err(OperatorError::SecretStore(format!(
                "warnings were returned from Vault: {}",
                Value::Array(warnings.clone())
            )));
        }
    }
    let data = response
        .get("data")
        .and_then(Value::as_object)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| {
            OperatorError::SecretStore(format!("returned Vault secret has a nil Data map: {path}"))
        })?;
    let inner = data.get("data").and_then(Value::as_object).ok_or_else(|| {
        OperatorError::SecretStore(format!(
            "returned Vault secret has a Data map with no data key: {path}"
        ))
    })?;
    let field = |key: &str| {
        inner
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                OperatorError::SecretStore(format!("unable to get {key} from Vault secret"))
            })
    };
    Ok((field("username")?, field("password")?))
}
