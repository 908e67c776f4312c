//! HTTP client for the RabbitMQ management API.

use super::{ConnectionCredentials, Gateway, GatewayFactory, Response};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Management API client bound to one cluster and one set of credentials.
pub struct ManagementClient {
    http: Client,
    base: Url,
    username: String,
    password: String,
}

impl ManagementClient {
    pub fn new(credentials: &ConnectionCredentials, tls_enabled: bool) -> Result<Self> {
        let base = Url::parse(&credentials.uri)?;
        if base.cannot_be_a_base() {
            return Err(OperatorError::Configuration(format!(
                "invalid management URI {}",
                credentials.uri
            )));
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .https_only(tls_enabled)
            .build()?;
        Ok(Self {
            http,
            base,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        })
    }

    /// `{base}/api/{segments...}` with every segment percent-encoded.
    fn endpoint(&self, path: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                OperatorError::Configuration(format!("invalid management URI {}", self.base))
            })?;
            segments.pop_if_empty().push("api");
            segments.extend(path);
        }
        Ok(url)
    }
}

#[async_trait]
impl Gateway for ManagementClient {
    async fn request(&self, method: Method, path: &[&str], body: Option<Value>) -> Result<Response> {
        let url = self.endpoint(path)?;
        debug!(method = %method, url = %url, "Calling management API");

        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(Response { status, body })
    }
}

/// Builds a [`ManagementClient`] per reconcile.
#[derive(Default)]
pub struct ManagementClientFactory;

impl GatewayFactory for ManagementClientFactory {
    fn build(&self, credentials: &ConnectionCredentials, tls_enabled: bool) -> Result<Arc<dyn Gateway>> {
        Ok(Arc::new(ManagementClient::new(credentials, tls_enabled)?))
    }
}
