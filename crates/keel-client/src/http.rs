//! HTTP client for a provisioning host's progress server

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use keel_api::{DeliverableInfo, HealthResponse, ProgressStatus};

use crate::error::{ClientError, Result};

/// HTTP client for communicating with a running provisioner
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    ///
    /// # Example
    /// ```no_run
    /// use keel_client::HttpClient;
    ///
    /// let client = HttpClient::new("http://10.0.0.50:8081")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Create a new HTTP client with custom `reqwest::Client`
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn with_client(base_url: impl AsRef<str>, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a full URL from a path
    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(ClientError::Url)
    }

    async fn fetch(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, message });
        }
        Ok(response)
    }

    /// Perform a GET request and deserialize the response
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.fetch(path).await?.json().await?)
    }

    /// Perform a GET request and return the raw body
    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.fetch(path).await?.bytes().await?.to_vec())
    }

    /// Get server health status
    ///
    /// # Errors
    /// Returns an error if the request fails or the server returns an error.
    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/health").await
    }

    /// Current progress of the run
    ///
    /// # Errors
    /// Returns an error if the request fails or the server returns an error.
    pub async fn progress(&self) -> Result<ProgressStatus> {
        self.get("/progress").await
    }

    /// Contents of the run's log file
    ///
    /// # Errors
    /// Returns an error if the request fails or the server returns an error.
    pub async fn logs(&self) -> Result<Vec<u8>> {
        self.get_bytes("/logs").await
    }

    /// Kubeconfig of the permanent cluster
    ///
    /// # Errors
    /// Returns [`ClientError::Api`] with status 500 while no kubeconfig exists.
    pub async fn kubeconfig(&self) -> Result<Vec<u8>> {
        self.get_bytes("/kubeconfig").await
    }

    /// Artifacts the run has registered
    ///
    /// # Errors
    /// Returns an error if the request fails or the server returns an error.
    pub async fn deliverables(&self) -> Result<Vec<DeliverableInfo>> {
        self.get("/deliverables").await
    }

    /// Download one artifact into `dest`
    ///
    /// # Errors
    /// Returns an error if the request or the write fails.
    pub async fn download(&self, name: &str, dest: &Path) -> Result<u64> {
        let body = self.get_bytes(&format!("/deliverables/{name}")).await?;
        write_artifact(dest, &body).await?;
        debug!(name, path = %dest.display(), bytes = body.len(), "downloaded deliverable");
        Ok(body.len() as u64)
    }
}

/// Write bytes to `dest`, creating its parent directory first
///
/// # Errors
/// Returns [`ClientError::Io`] on filesystem failure.
pub async fn write_artifact(dest: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, body).await?;
    Ok(())
}
