//! Network access for the worker.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::types::AssetResponse;

/// The request never produced a response (offline, DNS, refused...).
/// HTTP error statuses are responses, not fetch errors.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, url: &Url) -> Result<AssetResponse, FetchError>;
}

/// HTTP fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-builder/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, url: &Url) -> Result<AssetResponse, FetchError> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| FetchError(e.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError(format!("failed to read body: {}", e)))?;

    Ok(AssetResponse::new(status, content_type.as_deref(), body.to_vec()))
  }
}
