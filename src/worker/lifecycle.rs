//! Worker lifecycle: install, activate, then intercept requests.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{AssetCache, CacheEntryInfo};
use super::fetcher::Fetcher;
use super::strategy::{route, Route};
use super::types::{cache_key, AssetRequest, AssetResponse};
use super::WorkerError;

/// What a worker version caches and where it is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellManifest {
  /// Cache name; must change whenever the shell assets change
  pub version: String,
  /// Base URL the shell is served from
  pub scope: Url,
  /// Shell asset paths, relative to `scope`
  pub assets: Vec<String>,
  /// Document served for navigations while offline
  pub entry_document: String,
}

impl ShellManifest {
  fn resolve(&self, path: &str) -> Result<Url, WorkerError> {
    self
      .scope
      .join(path)
      .map_err(|source| WorkerError::InvalidAsset {
        path: path.to_string(),
        source,
      })
  }

  pub fn asset_urls(&self) -> Result<Vec<Url>, WorkerError> {
    self.assets.iter().map(|p| self.resolve(p)).collect()
  }

  pub fn entry_url(&self) -> Result<Url, WorkerError> {
    self.resolve(&self.entry_document)
  }

  /// Same shell, different cache version.
  pub fn with_version(&self, version: &str) -> Self {
    Self {
      version: version.to_string(),
      ..self.clone()
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Populating its cache
  Installing,
  /// Installed; evicting older caches and taking over pages
  Activating,
  /// Serving requests
  Active,
  /// Install failed; this version will never serve
  Redundant,
}

/// Lifecycle events, dispatched through [`Worker::handle`].
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch(AssetRequest),
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
  Installed { assets: usize },
  Activated { removed: Vec<String> },
  Fetched(FetchOutcome),
}

/// How an intercepted request was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Fresh from the network
  Network(AssetResponse),
  /// From the cache, without touching the network
  Cache(AssetResponse),
  /// Network failed; served the cached entry document or a cached copy
  Fallback(AssetResponse),
  /// Not intercepted; the caller should go to the network itself
  Passthrough,
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&AssetResponse> {
    match self {
      FetchOutcome::Network(r) | FetchOutcome::Cache(r) | FetchOutcome::Fallback(r) => Some(r),
      FetchOutcome::Passthrough => None,
    }
  }
}

/// Snapshot of the worker's caches.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
  pub version: String,
  pub state: WorkerState,
  pub active_version: Option<String>,
  pub caches: Vec<(String, Vec<CacheEntryInfo>)>,
}

/// One version of the asset cache worker.
pub struct Worker<C: AssetCache, F: Fetcher> {
  cache: Arc<C>,
  fetcher: Arc<F>,
  manifest: ShellManifest,
  state: WorkerState,
}

impl<C: AssetCache, F: Fetcher> Worker<C, F> {
  /// A fresh worker for `manifest`, about to install.
  pub fn new(cache: Arc<C>, fetcher: Arc<F>, manifest: ShellManifest) -> Self {
    Self {
      cache,
      fetcher,
      manifest,
      state: WorkerState::Installing,
    }
  }

  /// Reattach to a previous run: active if this version completed activation.
  pub fn resume(cache: Arc<C>, fetcher: Arc<F>, manifest: ShellManifest) -> Result<Self, WorkerError> {
    let active = cache.active_version()?;
    let mut worker = Self::new(cache, fetcher, manifest);
    if active.as_deref() == Some(worker.manifest.version.as_str()) {
      worker.state = WorkerState::Active;
    }
    Ok(worker)
  }

  /// Pick up a version installed by an earlier run, ready to activate.
  pub fn installed(cache: Arc<C>, fetcher: Arc<F>, manifest: ShellManifest) -> Result<Self, WorkerError> {
    if !cache.cache_names()?.contains(&manifest.version) {
      return Err(WorkerError::NotInstalled(manifest.version));
    }
    let mut worker = Self::new(cache, fetcher, manifest);
    worker.state = WorkerState::Activating;
    Ok(worker)
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn version(&self) -> &str {
    &self.manifest.version
  }

  pub async fn handle(&mut self, event: WorkerEvent) -> Result<EventOutcome, WorkerError> {
    match event {
      WorkerEvent::Install => self
        .install()
        .await
        .map(|assets| EventOutcome::Installed { assets }),
      WorkerEvent::Activate => self
        .activate()
        .map(|removed| EventOutcome::Activated { removed }),
      WorkerEvent::Fetch(request) => self.fetch(&request).await.map(EventOutcome::Fetched),
    }
  }

  /// Fetch every shell asset and store them all under this version's cache.
  ///
  /// If any asset cannot be fetched (or comes back with a non-2xx status)
  /// nothing is stored, the worker becomes redundant and whichever version
  /// was active keeps serving. On success the worker moves straight on to
  /// activation without waiting for open pages to close.
  pub async fn install(&mut self) -> Result<usize, WorkerError> {
    self.expect_state(WorkerState::Installing, "install")?;

    let result = self.populate().await;
    match result {
      Ok(count) => {
        self.state = WorkerState::Activating;
        info!(version = %self.manifest.version, assets = count, "worker installed");
        Ok(count)
      }
      Err(e) => {
        self.state = WorkerState::Redundant;
        warn!(version = %self.manifest.version, error = %e, "worker install failed");
        Err(e)
      }
    }
  }

  async fn populate(&self) -> Result<usize, WorkerError> {
    let urls = self.manifest.asset_urls()?;

    let entries = try_join_all(urls.iter().map(|url| async move {
      let install_failed = |reason: String| WorkerError::InstallFailed {
        version: self.manifest.version.clone(),
        url: url.to_string(),
        reason,
      };

      let response = self
        .fetcher
        .fetch(url)
        .await
        .map_err(|e| install_failed(e.to_string()))?;

      if !response.is_ok() {
        return Err(install_failed(format!("status {}", response.status)));
      }

      Ok::<_, WorkerError>((cache_key(url), response))
    }))
    .await?;

    self.cache.put_all(&self.manifest.version, &entries)?;
    Ok(entries.len())
  }

  /// Delete every cache but this version's, record this version as active,
  /// and take over request handling immediately.
  pub fn activate(&mut self) -> Result<Vec<String>, WorkerError> {
    self.expect_state(WorkerState::Activating, "activate")?;

    let mut removed = Vec::new();
    for name in self.cache.cache_names()? {
      if name != self.manifest.version && self.cache.delete_cache(&name)? {
        removed.push(name);
      }
    }

    self.cache.set_active_version(&self.manifest.version)?;
    self.state = WorkerState::Active;

    info!(version = %self.manifest.version, ?removed, "worker activated");
    Ok(removed)
  }

  /// Answer an intercepted request.
  ///
  /// A worker that is not active intercepts nothing.
  pub async fn fetch(&self, request: &AssetRequest) -> Result<FetchOutcome, WorkerError> {
    if self.state != WorkerState::Active {
      return Ok(FetchOutcome::Passthrough);
    }

    let strategy = route(request, &self.manifest.scope);
    debug!(url = %request.url, ?strategy, "intercepted request");

    match strategy {
      Route::NetworkFirst => self.network_first(request).await,
      Route::CacheFirst => self.cache_first(request).await,
      Route::Passthrough => Ok(FetchOutcome::Passthrough),
    }
  }

  async fn network_first(&self, request: &AssetRequest) -> Result<FetchOutcome, WorkerError> {
    match self.fetcher.fetch(&request.url).await {
      Ok(response) => Ok(FetchOutcome::Network(response)),
      Err(network_err) => {
        let entry = cache_key(&self.manifest.entry_url()?);
        debug!(url = %request.url, error = %network_err, "navigation offline, serving entry document");

        self
          .cache
          .lookup(&self.manifest.version, &entry)?
          .map(FetchOutcome::Fallback)
          .ok_or_else(|| WorkerError::FetchFailed {
            url: request.url.to_string(),
            reason: format!("{} (entry document not cached)", network_err),
          })
      }
    }
  }

  async fn cache_first(&self, request: &AssetRequest) -> Result<FetchOutcome, WorkerError> {
    let key = request.cache_key();

    // A broken cache read falls through to the network like a miss.
    match self.cache.lookup(&self.manifest.version, &key) {
      Ok(Some(cached)) => return Ok(FetchOutcome::Cache(cached)),
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, error = %e, "cache lookup failed"),
    }

    match self.fetcher.fetch(&request.url).await {
      Ok(response) => {
        // Storing the copy is best effort; the response is served either way.
        if response.is_ok() {
          if let Err(e) = self.cache.put(&self.manifest.version, &key, &response) {
            warn!(url = %request.url, error = %e, "failed to cache runtime response");
          }
        }
        Ok(FetchOutcome::Network(response))
      }
      Err(network_err) => self
        .cache
        .lookup(&self.manifest.version, &key)?
        .map(FetchOutcome::Fallback)
        .ok_or_else(|| WorkerError::FetchFailed {
          url: request.url.to_string(),
          reason: network_err.to_string(),
        }),
    }
  }

  pub fn status(&self) -> Result<WorkerStatus, WorkerError> {
    let caches = self
      .cache
      .cache_names()?
      .into_iter()
      .map(|name| {
        let entries = self.cache.entries(&name)?;
        Ok((name, entries))
      })
      .collect::<Result<Vec<_>, WorkerError>>()?;

    Ok(WorkerStatus {
      version: self.manifest.version.clone(),
      state: self.state,
      active_version: self.cache.active_version()?,
      caches,
    })
  }

  fn expect_state(&self, expected: WorkerState, event: &'static str) -> Result<(), WorkerError> {
    if self.state == expected {
      Ok(())
    } else {
      Err(WorkerError::InvalidTransition {
        version: self.manifest.version.clone(),
        event,
        state: self.state,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::cache::SqliteAssetCache;
  use crate::worker::fetcher::FetchError;
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// Scripted network: serves fixed bodies, records every request.
  #[derive(Default)]
  struct FakeNetwork {
    pages: Mutex<HashMap<String, AssetResponse>>,
    offline: Mutex<bool>,
    calls: Mutex<Vec<String>>,
  }

  impl FakeNetwork {
    fn serve(&self, url: &str, body: &str) {
      self
        .pages
        .lock()
        .unwrap()
        .insert(url.to_string(), AssetResponse::new(200, Some("text/plain"), body));
    }

    fn go_offline(&self) {
      *self.offline.lock().unwrap() = true;
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Fetcher for FakeNetwork {
    async fn fetch(&self, url: &Url) -> Result<AssetResponse, FetchError> {
      self.calls.lock().unwrap().push(url.to_string());
      if *self.offline.lock().unwrap() {
        return Err(FetchError("network unreachable".to_string()));
      }
      Ok(
        self
          .pages
          .lock()
          .unwrap()
          .get(url.as_str())
          .cloned()
          .unwrap_or_else(|| AssetResponse::new(404, None, "not found")),
      )
    }
  }

  const SCOPE: &str = "http://localhost:8080/";

  fn manifest(version: &str) -> ShellManifest {
    ShellManifest {
      version: version.to_string(),
      scope: Url::parse(SCOPE).unwrap(),
      assets: vec![
        "./".to_string(),
        "./index.html".to_string(),
        "./app.js".to_string(),
      ],
      entry_document: "./index.html".to_string(),
    }
  }

  fn network_with_shell() -> Arc<FakeNetwork> {
    let network = Arc::new(FakeNetwork::default());
    network.serve("http://localhost:8080/", "<html>root</html>");
    network.serve("http://localhost:8080/index.html", "<html>shell</html>");
    network.serve("http://localhost:8080/app.js", "console.log('app')");
    network
  }

  async fn active_worker(
    cache: &Arc<SqliteAssetCache>,
    network: &Arc<FakeNetwork>,
    version: &str,
  ) -> Worker<SqliteAssetCache, FakeNetwork> {
    let mut worker = Worker::new(cache.clone(), network.clone(), manifest(version));
    worker.handle(WorkerEvent::Install).await.unwrap();
    worker.handle(WorkerEvent::Activate).await.unwrap();
    worker
  }

  fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_install_populates_and_moves_to_activating() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let mut worker = Worker::new(cache.clone(), network.clone(), manifest("v1"));

    let outcome = worker.handle(WorkerEvent::Install).await.unwrap();

    assert_eq!(outcome, EventOutcome::Installed { assets: 3 });
    assert_eq!(worker.state(), WorkerState::Activating);
    assert_eq!(cache.entries("v1").unwrap().len(), 3);
    assert_eq!(cache.active_version().unwrap(), None);
  }

  #[tokio::test]
  async fn test_failed_install_keeps_nothing_and_previous_version_serves() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    active_worker(&cache, &network, "v1").await;

    let mut broken = manifest("v2");
    broken.assets.push("./manifest.json".to_string());
    let mut worker = Worker::new(cache.clone(), network.clone(), broken);

    let err = worker.install().await.unwrap_err();

    assert!(matches!(err, WorkerError::InstallFailed { ref url, .. } if url.ends_with("/manifest.json")));
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert_eq!(cache.cache_names().unwrap(), vec!["v1".to_string()]);
    assert_eq!(cache.active_version().unwrap(), Some("v1".to_string()));
    assert!(matches!(
      worker.activate(),
      Err(WorkerError::InvalidTransition { .. })
    ));
  }

  #[tokio::test]
  async fn test_install_fails_when_offline() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    network.go_offline();
    let mut worker = Worker::new(cache.clone(), network, manifest("v1"));

    assert!(worker.install().await.is_err());
    assert!(cache.cache_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activation_evicts_other_versions() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    active_worker(&cache, &network, "v1").await;

    let mut worker = Worker::new(cache.clone(), network.clone(), manifest("v2"));
    worker.install().await.unwrap();
    assert_eq!(cache.cache_names().unwrap(), vec!["v1".to_string(), "v2".to_string()]);

    let outcome = worker.handle(WorkerEvent::Activate).await.unwrap();

    assert_eq!(outcome, EventOutcome::Activated { removed: vec!["v1".to_string()] });
    assert_eq!(worker.state(), WorkerState::Active);
    assert_eq!(cache.cache_names().unwrap(), vec!["v2".to_string()]);
    assert_eq!(cache.active_version().unwrap(), Some("v2".to_string()));
  }

  #[tokio::test]
  async fn test_navigation_prefers_network() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;
    network.serve("http://localhost:8080/?modules=vaccine", "<html>fresh</html>");

    let outcome = worker
      .fetch(&AssetRequest::navigate(url("./?modules=vaccine")))
      .await
      .unwrap();

    assert_eq!(
      outcome,
      FetchOutcome::Network(AssetResponse::new(200, Some("text/plain"), "<html>fresh</html>"))
    );
  }

  #[tokio::test]
  async fn test_offline_navigation_serves_cached_entry_document() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;
    let cached_entry = cache
      .lookup("v1", "http://localhost:8080/index.html")
      .unwrap()
      .unwrap();
    network.go_offline();

    let outcome = worker
      .fetch(&AssetRequest::navigate(url("./some/deep/link?modules=vaccine")))
      .await
      .unwrap();

    match outcome {
      FetchOutcome::Fallback(response) => assert_eq!(response.body, cached_entry.body),
      other => panic!("expected fallback, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_cache_hit_skips_network() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;
    let calls_before = network.calls().len();

    let outcome = worker
      .fetch(&AssetRequest::subresource(url("./app.js")))
      .await
      .unwrap();

    assert_eq!(
      outcome,
      FetchOutcome::Cache(AssetResponse::new(200, Some("text/plain"), "console.log('app')"))
    );
    assert_eq!(network.calls().len(), calls_before);
  }

  #[tokio::test]
  async fn test_cache_miss_fetches_and_stores_copy() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;
    network.serve("http://localhost:8080/icon.png", "png");

    let first = worker
      .fetch(&AssetRequest::subresource(url("./icon.png")))
      .await
      .unwrap();
    assert!(matches!(first, FetchOutcome::Network(_)));

    network.go_offline();
    let second = worker
      .fetch(&AssetRequest::subresource(url("./icon.png")))
      .await
      .unwrap();
    assert!(matches!(second, FetchOutcome::Cache(ref r) if r.body == b"png"));
  }

  #[tokio::test]
  async fn test_error_responses_are_served_but_not_cached() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;

    let outcome = worker
      .fetch(&AssetRequest::subresource(url("./missing.css")))
      .await
      .unwrap();

    assert_eq!(outcome.response().map(|r| r.status), Some(404));
    assert_eq!(
      cache.lookup("v1", "http://localhost:8080/missing.css").unwrap(),
      None
    );
  }

  #[tokio::test]
  async fn test_uncached_asset_offline_is_a_failed_fetch() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;
    network.go_offline();

    let err = worker
      .fetch(&AssetRequest::subresource(url("./never-seen.js")))
      .await
      .unwrap_err();

    assert!(matches!(err, WorkerError::FetchFailed { .. }));
  }

  #[tokio::test]
  async fn test_cross_origin_is_not_intercepted() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;
    let calls_before = network.calls().len();

    let outcome = worker
      .fetch(&AssetRequest::subresource(Url::parse("https://cdn.example/lib.js").unwrap()))
      .await
      .unwrap();

    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert_eq!(network.calls().len(), calls_before);
  }

  #[tokio::test]
  async fn test_inactive_worker_intercepts_nothing() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = Worker::new(cache, network, manifest("v1"));

    let outcome = worker
      .fetch(&AssetRequest::subresource(url("./app.js")))
      .await
      .unwrap();

    assert_eq!(outcome, FetchOutcome::Passthrough);
  }

  #[tokio::test]
  async fn test_resume_restores_active_state() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    active_worker(&cache, &network, "v1").await;

    let same = Worker::resume(cache.clone(), network.clone(), manifest("v1")).unwrap();
    assert_eq!(same.state(), WorkerState::Active);

    let newer = Worker::resume(cache.clone(), network.clone(), manifest("v2")).unwrap();
    assert_eq!(newer.state(), WorkerState::Installing);
  }

  #[tokio::test]
  async fn test_activate_version_installed_earlier() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();

    assert!(matches!(
      Worker::installed(cache.clone(), network.clone(), manifest("v1")),
      Err(WorkerError::NotInstalled(_))
    ));

    Worker::new(cache.clone(), network.clone(), manifest("v1"))
      .install()
      .await
      .unwrap();

    let mut worker = Worker::installed(cache.clone(), network, manifest("v1")).unwrap();
    assert_eq!(worker.state(), WorkerState::Activating);
    worker.activate().unwrap();
    assert_eq!(cache.active_version().unwrap(), Some("v1".to_string()));
  }

  #[tokio::test]
  async fn test_status_lists_live_caches() {
    let cache = Arc::new(SqliteAssetCache::open_in_memory().unwrap());
    let network = network_with_shell();
    let worker = active_worker(&cache, &network, "v1").await;

    let status = worker.status().unwrap();

    assert_eq!(status.state, WorkerState::Active);
    assert_eq!(status.active_version.as_deref(), Some("v1"));
    assert_eq!(status.caches.len(), 1);
    assert_eq!(status.caches[0].1.len(), 3);
  }
}
