//! Requests the worker intercepts and the responses it serves.

use sha2::{Digest, Sha256};
use url::Url;

/// How the page issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  /// Script, stylesheet, manifest, image...
  Subresource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
  pub url: Url,
  pub mode: RequestMode,
}

impl AssetRequest {
  pub fn navigate(url: Url) -> Self {
    Self {
      url,
      mode: RequestMode::Navigate,
    }
  }

  pub fn subresource(url: Url) -> Self {
    Self {
      url,
      mode: RequestMode::Subresource,
    }
  }

  /// Key used to store the response: the URL without its fragment.
  pub fn cache_key(&self) -> String {
    cache_key(&self.url)
  }
}

pub fn cache_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl AssetResponse {
  pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      content_type: content_type.map(String::from),
      body: body.into(),
    }
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Hex SHA-256 of the body.
  pub fn digest(&self) -> String {
    hex::encode(Sha256::digest(&self.body))
  }
}
