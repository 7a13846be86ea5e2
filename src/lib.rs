//! BLE common - capability negotiation and scan aggregation for Bluetooth Low Energy
//!
//! Before an app can touch the radio it needs the user's consent twice: runtime
//! permissions, then a powered-on adapter. [`permission::CapabilityNegotiator`]
//! walks both consent flows and reports exactly one outcome.
//! [`ble::ScanAggregator`] then turns the raw discovery stream into a single,
//! deduplicated snapshot of connectable devices.

pub mod ble;
pub mod config;
pub mod ffi;
pub mod logging;
pub mod permission;
pub mod storage;

use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::ble::{AdapterInfo, DiscoveryPort, RadioPort, ScanAggregator, ScanFilter, ScanSnapshot};
use crate::config::GateConfig;
use crate::permission::{CapabilityError, CapabilityNegotiator, CapabilityRequest, PermanentDenialStore, PermissionPort};
use crate::storage::FileDenialBackend;

/// Negotiator and scanner wired to one set of platform ports
pub struct BleCommon {
    config: GateConfig,
    negotiator: CapabilityNegotiator,
    scanner: ScanAggregator,
}

impl BleCommon {
    /// `runtime` drives scan folding and the shared discovery feed
    pub fn new(
        config: GateConfig,
        permissions: Arc<dyn PermissionPort>,
        radio: Arc<dyn RadioPort>,
        discovery: Arc<dyn DiscoveryPort>,
        runtime: Handle,
    ) -> Result<Self, BleCommonError> {
        config.validate()?;

        let denials = match &config.storage_dir {
            Some(dir) => PermanentDenialStore::new(Arc::new(FileDenialBackend::open(dir)?)),
            None => PermanentDenialStore::in_memory(),
        };

        let negotiator = CapabilityNegotiator::new(
            Arc::clone(&permissions),
            radio,
            denials,
            permission::ble_permissions(config.api_level),
        );
        let scanner = ScanAggregator::new(
            discovery,
            permissions,
            permission::scan_permission(config.api_level),
            config.scan.clone(),
            runtime,
        );

        tracing::info!(
            "BLE common initialized (api level {}, {} required permission(s))",
            config.api_level,
            negotiator.required_permissions().len()
        );

        Ok(Self {
            config,
            negotiator,
            scanner,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn negotiator(&self) -> &CapabilityNegotiator {
        &self.negotiator
    }

    pub fn scanner(&self) -> &ScanAggregator {
        &self.scanner
    }

    /// Negotiate permissions and radio; `on_result` runs exactly once
    pub fn with_capabilities<F>(&self, request: CapabilityRequest, on_result: F)
    where
        F: FnOnce(Result<AdapterInfo, CapabilityError>) + Send + 'static,
    {
        self.negotiator.with_capabilities(request, on_result);
    }

    pub async fn negotiate(&self, request: CapabilityRequest) -> Result<AdapterInfo, CapabilityError> {
        self.negotiator.negotiate(request).await
    }

    pub fn scan(&self, filters: Vec<ScanFilter>) -> Result<(), ble::ScanError> {
        self.scanner.scan(filters)
    }

    pub fn stop_scan(&self) {
        self.scanner.stop_scan();
    }

    pub fn latest_snapshot(&self) -> ScanSnapshot {
        self.scanner.latest()
    }

    pub fn snapshots(&self) -> watch::Receiver<ScanSnapshot> {
        self.scanner.subscribe()
    }
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum BleCommonError {
    #[error("BLE error: {0}")]
    Ble(#[from] ble::BleError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Scan error: {0}")]
    Scan(#[from] ble::ScanError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
