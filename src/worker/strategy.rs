//! Pure routing decisions: which strategy serves a request.

use url::Url;

use super::types::{AssetRequest, RequestMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Try the network; fall back to the cached entry document.
  NetworkFirst,
  /// Serve from cache; on a miss, fetch and store a copy.
  CacheFirst,
  /// Not handled; the request goes out untouched.
  Passthrough,
}

/// Pick the route for a request made from a page under `scope`.
pub fn route(request: &AssetRequest, scope: &Url) -> Route {
  match request.mode {
    RequestMode::Navigate => Route::NetworkFirst,
    RequestMode::Subresource if same_origin(&request.url, scope) => Route::CacheFirst,
    RequestMode::Subresource => Route::Passthrough,
  }
}

/// Scheme, host and port all match. Opaque origins never match anything.
pub fn same_origin(a: &Url, b: &Url) -> bool {
  let (a, b) = (a.origin(), b.origin());
  a.is_tuple() && a == b
}
