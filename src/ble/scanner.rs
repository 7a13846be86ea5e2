//! Scan aggregation
//!
//! [`ScanAggregator`] owns at most one active discovery subscription and folds
//! its events into a deduplicated list: a device seen again is updated in
//! place, a new device is appended. After every fold the connectable subset is
//! published on a `tokio::sync::watch` channel, so late subscribers see the
//! latest snapshot only.

use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use super::multicast::{FeedSubscription, SharedFeed};
use super::{DeviceAddress, DiscoveryEvent, DiscoveryPort, ScanFilter, ScanRecord, ScanSnapshot};
use crate::permission::{Permission, PermissionPort};

pub const DEFAULT_KEEP_ALIVE_MS: u64 = 5_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Scan aggregation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long the shared discovery feed outlives its last observer
    pub keep_alive_ms: u64,
    /// Buffered discovery events per observer before it starts lagging
    pub channel_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ScanConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The caller started a scan without negotiating capabilities first
    #[error("Scan permission not granted: {0}")]
    PermissionNotGranted(Permission),
}

#[derive(Default)]
struct FoldState {
    records: Vec<ScanRecord>,
    index: HashMap<DeviceAddress, usize>,
    // Events tagged with an older generation are from a cancelled scan
    generation: u64,
}

#[derive(Default)]
struct ActiveScan {
    task: Option<JoinHandle<()>>,
    feed: Option<SharedFeed<DiscoveryEvent>>,
}

struct AggregatorInner {
    discovery: Arc<dyn DiscoveryPort>,
    permissions: Arc<dyn PermissionPort>,
    scan_permission: Permission,
    config: ScanConfig,
    runtime: Handle,
    active: Mutex<ActiveScan>,
    fold: Mutex<FoldState>,
    snapshots: watch::Sender<ScanSnapshot>,
}

/// Deduplicating, connectable-filtered scan snapshot engine
#[derive(Clone)]
pub struct ScanAggregator {
    inner: Arc<AggregatorInner>,
}

impl ScanAggregator {
    /// `runtime` drives the fold task and the shared discovery feed
    pub fn new(
        discovery: Arc<dyn DiscoveryPort>,
        permissions: Arc<dyn PermissionPort>,
        scan_permission: Permission,
        config: ScanConfig,
        runtime: Handle,
    ) -> Self {
        let (snapshots, _) = watch::channel(ScanSnapshot::default());
        Self {
            inner: Arc::new(AggregatorInner {
                discovery,
                permissions,
                scan_permission,
                config,
                runtime,
                active: Mutex::new(ActiveScan::default()),
                fold: Mutex::new(FoldState::default()),
                snapshots,
            }),
        }
    }

    /// Start a new scan, replacing any active one
    ///
    /// The snapshot is reset to empty (and published) before the new
    /// subscription starts folding.
    pub fn scan(&self, filters: Vec<ScanFilter>) -> Result<(), ScanError> {
        let inner = &self.inner;
        if !inner.permissions.check_granted(&inner.scan_permission) {
            tracing::error!("Scan requested without {}; negotiate capabilities first", inner.scan_permission);
            return Err(ScanError::PermissionNotGranted(inner.scan_permission.clone()));
        }

        let mut active = inner.active.lock();

        let generation = {
            let mut fold = inner.fold.lock();
            fold.generation += 1;
            fold.records.clear();
            fold.index.clear();
            inner.snapshots.send_replace(ScanSnapshot::default());
            fold.generation
        };

        if let Some(task) = active.task.take() {
            task.abort();
            tracing::info!("Cancelled previous scan");
        }

        // Each scan gets its own upstream subscription so nothing the old one
        // buffered can reach the new snapshot
        if let Some(stale) = active.feed.take() {
            stale.shutdown();
        }
        let feed = self.open_feed(&filters);
        active.feed = Some(feed.clone());

        // Subscribe before returning so no event published after scan()
        // returns can be missed
        let subscription = feed.subscribe();
        let weak = Arc::downgrade(inner);
        active.task = Some(inner.runtime.spawn(fold_events(weak, generation, subscription)));

        tracing::info!("Scan #{} started with {} filter(s)", generation, filters.len());
        Ok(())
    }

    fn open_feed(&self, filters: &[ScanFilter]) -> SharedFeed<DiscoveryEvent> {
        let discovery = Arc::clone(&self.inner.discovery);
        let filters = filters.to_vec();
        SharedFeed::new(
            "discovery",
            self.inner.runtime.clone(),
            self.inner.config.keep_alive(),
            self.inner.config.channel_capacity,
            move || discovery.open_subscription(&filters),
        )
    }

    /// Cancel the active scan; the last snapshot stays published
    pub fn stop_scan(&self) {
        let mut active = self.inner.active.lock();
        self.inner.fold.lock().generation += 1;
        match active.task.take() {
            Some(task) => {
                task.abort();
                tracing::info!("Scan stopped");
            }
            None => tracing::debug!("stop_scan with no active scan"),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.inner
            .active
            .lock()
            .task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Latest published snapshot
    pub fn latest(&self) -> ScanSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Hot snapshot observer: starts at the latest value, no history
    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// [`Self::subscribe`] as a `Stream`
    pub fn snapshots(&self) -> WatchStream<ScanSnapshot> {
        WatchStream::new(self.inner.snapshots.subscribe())
    }

    /// Extra observer of the raw discovery feed of the current scan
    ///
    /// Holding it keeps the upstream subscription alive after `stop_scan`.
    pub fn discoveries(&self) -> Option<FeedSubscription<DiscoveryEvent>> {
        self.inner.active.lock().feed.as_ref().map(SharedFeed::subscribe)
    }
}

async fn fold_events(aggregator: Weak<AggregatorInner>, generation: u64, mut subscription: FeedSubscription<DiscoveryEvent>) {
    while let Some(event) = subscription.next().await {
        let Some(inner) = aggregator.upgrade() else {
            break;
        };
        if !inner.fold(generation, event) {
            break;
        }
    }
    tracing::debug!("Fold task for scan #{} finished", generation);
}

impl AggregatorInner {
    /// Apply one event; `false` once the scan has been superseded
    fn fold(&self, generation: u64, event: DiscoveryEvent) -> bool {
        let mut fold = self.fold.lock();
        if fold.generation != generation {
            return false;
        }

        match fold.index.get(&event.address).copied() {
            Some(position) => {
                tracing::debug!("Updated {} (rssi {})", event.address, event.rssi);
                fold.records[position] = event;
            }
            None => {
                tracing::debug!("Discovered {} (rssi {}, connectable: {})", event.address, event.rssi, event.connectable);
                let position = fold.records.len();
                fold.index.insert(event.address.clone(), position);
                fold.records.push(event);
            }
        }

        let connectable = fold.records.iter().filter(|r| r.connectable).cloned().collect();
        // Published under the fold lock to keep publication order equal to
        // event order
        self.snapshots.send_replace(ScanSnapshot::new(connectable));
        true
    }
}

impl Drop for AggregatorInner {
    fn drop(&mut self) {
        let active = self.active.get_mut();
        if let Some(task) = active.task.take() {
            task.abort();
        }
        if let Some(feed) = active.feed.take() {
            feed.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::HostDiscovery;
    use crate::ble::BleError;

    struct Granted(bool);

    impl PermissionPort for Granted {
        fn check_granted(&self, _permission: &Permission) -> bool {
            self.0
        }

        fn should_show_rationale(&self, _permission: &Permission) -> bool {
            false
        }

        fn request(&self, _permissions: &[Permission]) -> Result<(), BleError> {
            Ok(())
        }

        fn open_settings(&self) -> Result<(), BleError> {
            Ok(())
        }
    }

    fn aggregator(granted: bool) -> (ScanAggregator, HostDiscovery) {
        let host = HostDiscovery::new();
        let aggregator = ScanAggregator::new(
            Arc::new(host.clone()),
            Arc::new(Granted(granted)),
            Permission::BLUETOOTH_SCAN,
            ScanConfig::default(),
            Handle::current(),
        );
        (aggregator, host)
    }

    #[tokio::test]
    async fn test_scan_requires_permission() {
        let (aggregator, host) = aggregator(false);
        assert_eq!(
            aggregator.scan(vec![]),
            Err(ScanError::PermissionNotGranted(Permission::BLUETOOTH_SCAN))
        );
        assert!(!aggregator.is_scanning());
        assert_eq!(host.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_fold_keeps_position_and_filters_connectable() {
        let (aggregator, _host) = aggregator(true);
        let inner = &aggregator.inner;
        let generation = inner.fold.lock().generation;

        assert!(inner.fold(generation, ScanRecord::new("AA", -80, true)));
        assert!(inner.fold(generation, ScanRecord::new("BB", -70, false)));
        assert!(inner.fold(generation, ScanRecord::new("CC", -60, true)));
        assert!(inner.fold(generation, ScanRecord::new("AA", -40, true)));

        let snapshot = aggregator.latest();
        let order: Vec<_> = snapshot.iter().map(|r| (r.address.to_string(), r.rssi)).collect();
        assert_eq!(order, vec![("AA".to_string(), -40), ("CC".to_string(), -60)]);

        // A device that becomes connectable shows up at its original position
        assert!(inner.fold(generation, ScanRecord::new("BB", -65, true)));
        let order: Vec<_> = aggregator.latest().iter().map(|r| r.address.to_string()).collect();
        assert_eq!(order, vec!["AA", "BB", "CC"]);
    }

    #[tokio::test]
    async fn test_stale_generation_is_rejected() {
        let (aggregator, _host) = aggregator(true);
        let inner = &aggregator.inner;
        let generation = inner.fold.lock().generation;

        aggregator.stop_scan();
        assert!(!inner.fold(generation, ScanRecord::new("AA", -50, true)));
        assert!(aggregator.latest().is_empty());
    }

    #[test]
    fn test_scan_config_defaults() {
        let config: ScanConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ScanConfig::default());
        assert_eq!(config.keep_alive(), Duration::from_secs(5));
    }
}
