//! Periodically refreshed runtime version table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;

use crate::clock::Clock;
use crate::config::RuntimeVersionConfig;
use crate::lifecycle::{BackgroundTask, StopListener};
use crate::observability::metrics;
use crate::rtv::metadata::{RuntimeMetadata, RuntimeMetadataSource, RuntimeVersionError};

/// Release channel a runtime version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeChannel {
    Production,
    Lts,
    Diversion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeVersionInfo {
    pub channel: RuntimeChannel,
    pub css_url: Option<String>,
}

/// Immutable view of one successfully fetched metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeVersionSnapshot {
    pub versions: HashMap<String, RuntimeVersionInfo>,
    /// The production `ampRuntimeVersion`.
    pub default_version: Option<String>,
    /// `None` until the first successful refresh.
    pub fetched_at: Option<SystemTime>,
    /// Increments by one per published snapshot; 0 is the initial empty one.
    pub generation: u64,
}

impl RuntimeVersionSnapshot {
    pub fn from_metadata(metadata: &RuntimeMetadata, fetched_at: SystemTime, generation: u64) -> Self {
        let mut versions = HashMap::new();
        for diversion in &metadata.diversions {
            versions.insert(
                diversion.clone(),
                RuntimeVersionInfo {
                    channel: RuntimeChannel::Diversion,
                    css_url: None,
                },
            );
        }
        if let Some(lts) = &metadata.lts_runtime_version {
            versions.insert(
                lts.clone(),
                RuntimeVersionInfo {
                    channel: RuntimeChannel::Lts,
                    css_url: metadata.lts_css_url.clone(),
                },
            );
        }
        versions.insert(
            metadata.amp_runtime_version.clone(),
            RuntimeVersionInfo {
                channel: RuntimeChannel::Production,
                css_url: metadata.amp_css_url.clone(),
            },
        );

        Self {
            versions,
            default_version: Some(metadata.amp_runtime_version.clone()),
            fetched_at: Some(fetched_at),
            generation,
        }
    }

    /// True before the first successful fetch.
    pub fn is_empty(&self) -> bool {
        self.fetched_at.is_none()
    }

    pub fn contains(&self, version: &str) -> bool {
        self.versions.contains_key(version)
    }

    pub fn get(&self, version: &str) -> Option<&RuntimeVersionInfo> {
        self.versions.get(version)
    }
}

pub struct RuntimeVersionCache {
    source: Arc<dyn RuntimeMetadataSource>,
    config: RuntimeVersionConfig,
    clock: Arc<dyn Clock>,
    snapshot: ArcSwap<RuntimeVersionSnapshot>,
    /// Serializes writers so generations are published in order.
    refresh_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<BackgroundTask>>,
}

impl RuntimeVersionCache {
    pub fn new(
        source: Arc<dyn RuntimeMetadataSource>,
        config: RuntimeVersionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            config,
            clock,
            snapshot: ArcSwap::from_pointee(RuntimeVersionSnapshot::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        }
    }

    /// Latest published snapshot. Never blocks on I/O.
    pub fn current_snapshot(&self) -> Arc<RuntimeVersionSnapshot> {
        self.snapshot.load_full()
    }

    /// Fetch and publish one snapshot; on error the previous one stays.
    pub async fn refresh_once(&self) -> Result<Arc<RuntimeVersionSnapshot>, RuntimeVersionError> {
        let _writer = self.refresh_lock.lock().await;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let result = match tokio::time::timeout(timeout, self.source.fetch()).await {
            Ok(Ok(body)) => RuntimeMetadata::parse(&body),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RuntimeVersionError::Timeout(timeout)),
        };
        metrics::record_rtv_refresh(result.is_ok());
        let metadata = result?;

        let generation = self.snapshot.load().generation + 1;
        let snapshot = Arc::new(RuntimeVersionSnapshot::from_metadata(
            &metadata,
            self.clock.now(),
            generation,
        ));
        self.snapshot.store(Arc::clone(&snapshot));
        tracing::info!(
            version = %metadata.amp_runtime_version,
            versions = snapshot.versions.len(),
            generation,
            "Runtime version metadata refreshed"
        );
        Ok(snapshot)
    }

    /// Initial fetch. Failure only logs; the signer skips the check meanwhile.
    pub async fn init(&self) {
        if let Err(e) = self.refresh_once().await {
            tracing::warn!(error = %e, "Initial runtime version fetch failed");
        }
    }

    /// Spawn the fixed-interval refresh loop. A second call while running is a no-op.
    pub fn start_refresh_loop(self: &Arc<Self>) {
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let cache = Arc::clone(self);
        *slot = Some(BackgroundTask::spawn("rtv-refresh", move |stop| {
            cache.refresh_loop(stop)
        }));
    }

    /// Stop the loop and wait for it to exit. The last snapshot stays readable.
    pub async fn stop_refresh_loop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    async fn refresh_loop(self: Arc<Self>, mut stop: StopListener) {
        let interval = Duration::from_secs(self.config.refresh_interval_secs);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.stopped() => break,
            }
            let result = tokio::select! {
                result = self.refresh_once() => result,
                _ = stop.stopped() => break,
            };
            if let Err(e) = result {
                let generation = self.snapshot.load().generation;
                tracing::warn!(error = %e, generation, "Runtime version refresh failed; keeping last snapshot");
            }
        }
        tracing::info!("Runtime version refresh loop stopped");
    }
}

impl std::fmt::Debug for RuntimeVersionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeVersionCache")
            .field("metadata_url", &self.config.metadata_url)
            .field("generation", &self.snapshot.load().generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        body: Mutex<Option<&'static str>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RuntimeMetadataSource for StubSource {
        async fn fetch(&self) -> Result<Bytes, RuntimeVersionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match *self.body.lock().unwrap() {
                Some(body) => Ok(Bytes::from_static(body.as_bytes())),
                None => Err(RuntimeVersionError::Fetch("connection refused".to_string())),
            }
        }
    }

    const METADATA: &str = r#"{"ampRuntimeVersion":"012105150310000","ampCssUrl":"https://cdn.ampproject.org/rtv/012105150310000/v0.css","ltsRuntimeVersion":"012104300155000","diversions":["002105150310000"]}"#;

    fn cache(body: Option<&'static str>) -> (Arc<RuntimeVersionCache>, Arc<StubSource>) {
        let source = Arc::new(StubSource {
            body: Mutex::new(body),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(RuntimeVersionCache::new(
            source.clone(),
            RuntimeVersionConfig::default(),
            Arc::new(ManualClock::at_unix(1_700_000_000)),
        ));
        (cache, source)
    }

    #[tokio::test]
    async fn test_snapshot_starts_empty() {
        let (cache, _) = cache(None);
        let snapshot = cache.current_snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.generation, 0);
    }

    #[tokio::test]
    async fn test_refresh_publishes_all_channels() {
        let (cache, _) = cache(Some(METADATA));
        cache.refresh_once().await.unwrap();

        let snapshot = cache.current_snapshot();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.default_version.as_deref(), Some("012105150310000"));
        assert_eq!(snapshot.get("012105150310000").unwrap().channel, RuntimeChannel::Production);
        assert_eq!(snapshot.get("012104300155000").unwrap().channel, RuntimeChannel::Lts);
        assert_eq!(snapshot.get("002105150310000").unwrap().channel, RuntimeChannel::Diversion);
        assert!(!snapshot.contains("019999999999999"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_known_good() {
        let (cache, source) = cache(Some(METADATA));
        cache.refresh_once().await.unwrap();
        let before = cache.current_snapshot();

        *source.body.lock().unwrap() = Some("{ broken");
        assert!(cache.refresh_once().await.is_err());
        *source.body.lock().unwrap() = None;
        assert!(cache.refresh_once().await.is_err());

        assert_eq!(*cache.current_snapshot(), *before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_on_interval_until_stopped() {
        let (cache, source) = cache(Some(METADATA));
        cache.start_refresh_loop();
        assert!(cache.is_running());

        tokio::time::sleep(Duration::from_secs(1801)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.current_snapshot().generation, 3);

        cache.stop_refresh_loop().await;
        assert!(!cache.is_running());
        tokio::time::sleep(Duration::from_secs(6000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.current_snapshot().generation, 3);
    }
}
