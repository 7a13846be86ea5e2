//! Platform-agnostic radio adapter port
//!
//! The negotiator never talks to a Bluetooth stack directly. A platform backend
//! (the Android host bridge, btleplug on desktop, or a fake in tests) implements
//! [`RadioPort`] and feeds enable results back through
//! [`crate::permission::CapabilityNegotiator::deliver_enable_result`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Radio adapter port
///
/// Queries are synchronous snapshots of the platform state. The enable request
/// is fire-and-forget: the user-mediated answer arrives later as an
/// asynchronous result.
pub trait RadioPort: Send + Sync {
    /// Current adapter, or `None` when the platform has no Bluetooth
    /// manager/adapter at all
    fn adapter(&self) -> Option<AdapterInfo>;

    /// Launch the platform's "turn Bluetooth on" request
    ///
    /// # Returns
    /// * `Ok(())` if the request was handed to the platform
    /// * `Err(BleError)` if it could not be launched; the caller treats this
    ///   as a refused enable
    fn request_enable(&self) -> Result<(), BleError>;

    /// Whether a radio adapter exists
    fn exists(&self) -> bool {
        self.adapter().is_some()
    }

    /// Whether the radio adapter exists and is powered on
    fn is_enabled(&self) -> bool {
        self.adapter().map(|info| info.powered).unwrap_or(false)
    }
}

/// Information about the BLE adapter
///
/// Handed to the ready continuation as the handle of the enabled radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Platform name (e.g., "Android", "Linux")
    pub platform: String,
    /// Adapter name or identifier
    pub name: String,
    /// Adapter address
    pub address: String,
    /// Whether the adapter is powered on
    pub powered: bool,
}

impl AdapterInfo {
    pub fn new(platform: impl Into<String>, name: impl Into<String>, address: impl Into<String>, powered: bool) -> Self {
        Self {
            platform: platform.into(),
            name: name.into(),
            address: address.into(),
            powered,
        }
    }
}

impl std::fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) - {} - Powered: {}",
               self.name, self.platform, self.address, self.powered)
    }
}

/// BLE-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("BLE operation not supported: {0}")]
    OperationNotSupported(String),

    #[error("Platform error: {0}")]
    PlatformError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRadio(Option<AdapterInfo>);

    impl RadioPort for FixedRadio {
        fn adapter(&self) -> Option<AdapterInfo> {
            self.0.clone()
        }

        fn request_enable(&self) -> Result<(), BleError> {
            Err(BleError::OperationNotSupported("fixed radio".to_string()))
        }
    }

    #[test]
    fn test_default_state_queries() {
        let absent = FixedRadio(None);
        assert!(!absent.exists());
        assert!(!absent.is_enabled());

        let off = FixedRadio(Some(AdapterInfo::new("Test", "hci0", "00:11:22:33:44:55", false)));
        assert!(off.exists());
        assert!(!off.is_enabled());

        let on = FixedRadio(Some(AdapterInfo::new("Test", "hci0", "00:11:22:33:44:55", true)));
        assert!(on.is_enabled());
    }

    #[test]
    fn test_adapter_info_display() {
        let info = AdapterInfo::new("Android", "Pixel", "AA:BB:CC:DD:EE:FF", true);
        assert_eq!(info.to_string(), "Pixel (Android) - AA:BB:CC:DD:EE:FF - Powered: true");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(BleError::AdapterNotAvailable.to_string(), "BLE adapter not available");
        assert_eq!(
            FixedRadio(None).request_enable().unwrap_err().to_string(),
            "BLE operation not supported: fixed radio"
        );
        assert_eq!(
            BleError::PlatformError("dbus".to_string()).to_string(),
            "Platform error: dbus"
        );
    }
}
