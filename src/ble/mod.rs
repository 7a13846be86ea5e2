//! Bluetooth Low Energy discovery types and platform ports
//!
//! Discovery events flow from a platform [`DiscoveryPort`] into the
//! [`ScanAggregator`], which folds them into a deduplicated [`ScanSnapshot`].

pub mod adapter;
pub mod host;
pub mod multicast;
pub mod scanner;

#[cfg(feature = "ble")]
pub mod desktop;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use adapter::{AdapterInfo, BleError, RadioPort};
pub use host::HostDiscovery;
pub use multicast::SharedFeed;
pub use scanner::{ScanAggregator, ScanConfig, ScanError};

/// Stable hardware address of a remote device, normalized to upper case
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BondState {
    #[default]
    None,
    Bonding,
    Bonded,
}

/// Latest known state of one discovered device
///
/// The address is the identity used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub connectable: bool,
    #[serde(default)]
    pub bond_state: BondState,
    #[serde(default)]
    pub service_uuids: Vec<Uuid>,
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

/// One advertisement report from the platform
pub type DiscoveryEvent = ScanRecord;

impl ScanRecord {
    pub fn new(address: impl Into<DeviceAddress>, rssi: i16, connectable: bool) -> Self {
        Self {
            address: address.into(),
            name: None,
            rssi,
            connectable,
            bond_state: BondState::None,
            service_uuids: Vec::new(),
            last_seen: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_bond_state(mut self, bond_state: BondState) -> Self {
        self.bond_state = bond_state;
        self
    }

    pub fn with_service(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }
}

/// Discovery filter; every set criterion must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanFilter {
    pub device_name: Option<String>,
    pub device_address: Option<DeviceAddress>,
    #[serde(default)]
    pub service_uuids: Vec<Uuid>,
}

impl ScanFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_address(address: impl Into<DeviceAddress>) -> Self {
        Self {
            device_address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn by_service(uuid: Uuid) -> Self {
        Self {
            service_uuids: vec![uuid],
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &ScanRecord) -> bool {
        if let Some(name) = &self.device_name {
            if record.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(address) = &self.device_address {
            if &record.address != address {
                return false;
            }
        }
        self.service_uuids.iter().all(|uuid| record.service_uuids.contains(uuid))
    }

    /// An empty filter list accepts everything; otherwise any filter may match
    pub fn any_matches(filters: &[ScanFilter], record: &ScanRecord) -> bool {
        filters.is_empty() || filters.iter().any(|f| f.matches(record))
    }
}

/// Immutable published view of the scan results, connectable records only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSnapshot {
    records: Arc<Vec<ScanRecord>>,
}

impl ScanSnapshot {
    pub fn new(records: Vec<ScanRecord>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, address: &DeviceAddress) -> Option<&ScanRecord> {
        self.records.iter().find(|r| &r.address == address)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScanRecord> {
        self.records.iter()
    }
}

impl Serialize for ScanSnapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

/// OS discovery primitive
///
/// Each call opens an independent, infinite subscription. Dropping the
/// stream cancels it.
pub trait DiscoveryPort: Send + Sync {
    fn open_subscription(&self, filters: &[ScanFilter]) -> BoxStream<'static, DiscoveryEvent>;
}

/// Forward interface for per-device GATT sessions
#[async_trait]
pub trait GattConnector: Send + Sync {
    async fn connect(&self, device: &ScanRecord) -> Result<(), BleError>;
    async fn disconnect(&self, address: &DeviceAddress) -> Result<(), BleError>;
}

/// Connector used until a platform GATT implementation is plugged in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedGatt;

#[async_trait]
impl GattConnector for UnsupportedGatt {
    async fn connect(&self, device: &ScanRecord) -> Result<(), BleError> {
        tracing::warn!("GATT connection to {} requested, no connector installed", device.address);
        Err(BleError::OperationNotSupported("GATT connections".to_string()))
    }

    async fn disconnect(&self, address: &DeviceAddress) -> Result<(), BleError> {
        Err(BleError::OperationNotSupported(format!("GATT disconnect from {}", address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalization() {
        assert_eq!(DeviceAddress::new(" aa:bb:cc:dd:ee:ff"), DeviceAddress::from("AA:BB:CC:DD:EE:FF"));
        let json = serde_json::to_string(&DeviceAddress::new("0a:1b")).unwrap();
        assert_eq!(json, "\"0A:1B\"");
        let parsed: DeviceAddress = serde_json::from_str("\"0a:1b\"").unwrap();
        assert_eq!(parsed.as_str(), "0A:1B");
    }

    #[test]
    fn test_filter_matching() {
        let service = Uuid::from_u128(0x180d);
        let record = ScanRecord::new("AA:00", -40, true).with_name("Sensor").with_service(service);

        assert!(ScanFilter::by_name("Sensor").matches(&record));
        assert!(!ScanFilter::by_name("Other").matches(&record));
        assert!(ScanFilter::by_address("aa:00").matches(&record));
        assert!(ScanFilter::by_service(service).matches(&record));
        assert!(!ScanFilter::by_service(Uuid::from_u128(0x180f)).matches(&record));

        assert!(ScanFilter::any_matches(&[], &record));
        assert!(ScanFilter::any_matches(&[ScanFilter::by_name("Other"), ScanFilter::by_name("Sensor")], &record));
    }

    #[test]
    fn test_scan_record_deserializes_with_defaults() {
        let record: ScanRecord =
            serde_json::from_str(r#"{"address":"aa:bb","name":null,"rssi":-70,"connectable":true}"#).unwrap();
        assert_eq!(record.address.as_str(), "AA:BB");
        assert_eq!(record.bond_state, BondState::None);
        assert!(record.service_uuids.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_gatt() {
        let record = ScanRecord::new("AA:BB", -50, true);
        let err = UnsupportedGatt.connect(&record).await.unwrap_err();
        assert!(matches!(err, BleError::OperationNotSupported(_)));
    }
}
