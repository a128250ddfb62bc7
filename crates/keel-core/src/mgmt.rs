//! Management-plane HTTP contract
//!
//! After the RKE engine installs Rancher it talks to the Rancher API to log
//! in, set the server URL and wait for the local cluster to report ready.
//! The endpoint uses a self-signed certificate, so TLS verification is off.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use url::Url;

use crate::engines::true_conditions;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::poll::{PollSettings, retry_while_missing, wait_for_condition};

/// Resource path of the cluster Rancher runs on
pub const LOCAL_CLUSTER: &str = "/v3/clusters/local";

/// JSON request/response access to a management plane
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Send one request and decode the JSON response
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, CoreError>;
}

/// Rancher API client
pub struct RancherClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl RancherClient {
    /// Create a client for `https://<hostname>`
    ///
    /// # Errors
    /// Returns [`CoreError::Config`] if the URL is invalid or
    /// [`CoreError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, CoreError> {
        let base_url =
            Url::parse(base_url).map_err(|e| CoreError::Config(format!("{base_url}: {e}")))?;
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> Result<Url, CoreError> {
        self.base_url
            .join(path)
            .map_err(|e| CoreError::Config(format!("{path}: {e}")))
    }

    /// Wait until `/ping` answers `pong`
    ///
    /// # Errors
    /// Returns [`CoreError::Timeout`] if the API never comes up.
    #[instrument(skip(self, events), fields(url = %self.base_url))]
    pub async fn wait_for_api(
        &self,
        events: &dyn EventBus,
        settings: PollSettings,
    ) -> Result<(), CoreError> {
        let ping = &self.url("/ping")?;
        let client = &self.client;
        retry_while_missing(events, "rancher /ping", "pong", 1, settings, move || async move {
            let response = client.get(ping.clone()).send().await?;
            Ok(response.text().await?)
        })
        .await
    }

    /// Log in as `admin` and keep the returned token
    ///
    /// # Errors
    /// Returns [`CoreError::Api`] if the login is rejected or
    /// [`CoreError::Decode`] if the response carries no token.
    #[instrument(skip(self, password))]
    pub async fn login(&mut self, password: &str) -> Result<(), CoreError> {
        let body = json!({ "username": "admin", "password": password });
        let response = self
            .request(
                Method::POST,
                "/v3-public/localProviders/local?action=login",
                Some(&body),
            )
            .await?;
        let token = response
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Decode("login response has no token".into()))?;

        self.token = Some(token.to_string());
        info!("logged in to management plane");
        Ok(())
    }

    /// Point Rancher at the URL agents should use to reach it
    ///
    /// # Errors
    /// Returns [`CoreError::Api`] if the setting is rejected.
    pub async fn set_server_url(&self, server_url: &str) -> Result<(), CoreError> {
        let body = json!({ "name": "server-url", "value": server_url });
        self.request(Method::PUT, "/v3/settings/server-url", Some(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ManagementApi for RancherClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, CoreError> {
        let url = self.url(path)?;
        debug!(method = %method, url = %url, "management request");

        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Wait until the local cluster has a `Ready` condition with status `True`
///
/// # Errors
/// Returns [`CoreError::Timeout`] naming the local cluster resource.
pub async fn wait_for_cluster_ready(
    api: &dyn ManagementApi,
    events: &dyn EventBus,
    settings: PollSettings,
) -> Result<(), CoreError> {
    wait_for_condition(events, LOCAL_CLUSTER, "type", "Ready", settings, move || async move {
        let doc = api.request(Method::GET, LOCAL_CLUSTER, None).await?;
        Ok(true_conditions(doc))
    })
    .await
}
