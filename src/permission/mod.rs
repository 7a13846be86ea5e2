//! Runtime capability negotiation
//!
//! Gates BLE work behind two user-mediated consents: the runtime permissions
//! needed to scan/connect, and powering on the radio. Both flows are
//! asynchronous and revocable, so waiting is modelled as one-shot listeners in
//! a [`CallbackRegistry`] that the host fills in when the platform answers.

pub mod denial_store;
pub mod negotiator;
pub mod prompt;
pub mod registry;
pub mod token;

pub use denial_store::{DenialBackend, MemoryDenialBackend, PermanentDenialStore};
pub use negotiator::{
    CapabilityCallbacks, CapabilityError, CapabilityNegotiator, CapabilityRequest, EnableRequest,
    PassObserver, PassState, PermissionOutcome, PermissionRequest, RadioOutcome,
};
pub use prompt::{Dialog, DialogPrompt, EnablePrompt, PermissionPrompt, PromptSurface};
pub use registry::{CallbackRegistry, ListenerHandle, OperationKind};
pub use token::{InteractiveToken, PermissionToken};

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::ble::BleError;

/// API level from which scan/connect are separate runtime permissions
pub const SPLIT_BLUETOOTH_PERMISSIONS_API: u32 = 31;

/// Runtime permission identifier (e.g. `android.permission.BLUETOOTH_SCAN`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const BLUETOOTH_SCAN: Permission = Permission::from_static("android.permission.BLUETOOTH_SCAN");
    pub const BLUETOOTH_CONNECT: Permission = Permission::from_static("android.permission.BLUETOOTH_CONNECT");
    pub const BLUETOOTH: Permission = Permission::from_static("android.permission.BLUETOOTH");
    pub const BLUETOOTH_ADMIN: Permission = Permission::from_static("android.permission.BLUETOOTH_ADMIN");
    pub const ACCESS_FINE_LOCATION: Permission = Permission::from_static("android.permission.ACCESS_FINE_LOCATION");

    pub const fn from_static(id: &'static str) -> Self {
        Permission(Cow::Borrowed(id))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Permission(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Permission {
    fn from(id: &str) -> Self {
        Permission::new(id)
    }
}

impl From<String> for Permission {
    fn from(id: String) -> Self {
        Permission::new(id)
    }
}

/// Permissions required for BLE scanning and connecting on the given API level
pub fn ble_permissions(api_level: u32) -> Vec<Permission> {
    if api_level >= SPLIT_BLUETOOTH_PERMISSIONS_API {
        vec![Permission::BLUETOOTH_CONNECT, Permission::BLUETOOTH_SCAN]
    } else {
        vec![
            Permission::BLUETOOTH_ADMIN,
            Permission::BLUETOOTH,
            Permission::ACCESS_FINE_LOCATION,
        ]
    }
}

/// Permission that must be granted before a discovery scan may start
pub fn scan_permission(api_level: u32) -> Permission {
    if api_level >= SPLIT_BLUETOOTH_PERMISSIONS_API {
        Permission::BLUETOOTH_SCAN
    } else {
        Permission::ACCESS_FINE_LOCATION
    }
}

/// Status of a permission, derived at query time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    /// Denied, but the user may still be asked again
    Denied,
    /// Denied with "don't ask again"; only the settings screen can grant it
    PermanentlyDenied,
}

/// Per-permission answer of a multi-permission request, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantResults(Vec<(Permission, bool)>);

impl GrantResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: Permission, granted: bool) {
        match self.0.iter_mut().find(|(p, _)| *p == permission) {
            Some(entry) => entry.1 = granted,
            None => self.0.push((permission, granted)),
        }
    }

    /// Answer for `permission`, or `None` if it was not part of the request
    pub fn get(&self, permission: &Permission) -> Option<bool> {
        self.0.iter().find(|(p, _)| p == permission).map(|(_, granted)| *granted)
    }

    pub fn denied(&self) -> Vec<Permission> {
        self.0.iter().filter(|(_, granted)| !granted).map(|(p, _)| p.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Permission, bool)> {
        self.0.iter()
    }
}

impl FromIterator<(Permission, bool)> for GrantResults {
    fn from_iter<I: IntoIterator<Item = (Permission, bool)>>(iter: I) -> Self {
        let mut results = GrantResults::new();
        for (permission, granted) in iter {
            results.insert(permission, granted);
        }
        results
    }
}

/// OS permission primitive
///
/// `request` only launches the system dialog; the answer is delivered later
/// through [`CapabilityNegotiator::deliver_permission_result`].
pub trait PermissionPort: Send + Sync {
    fn check_granted(&self, permission: &Permission) -> bool;

    /// Platform "should show request rationale" signal. `false` while still
    /// denied after a request means the user picked "don't ask again".
    fn should_show_rationale(&self, permission: &Permission) -> bool;

    fn request(&self, permissions: &[Permission]) -> Result<(), BleError>;

    /// Redirect the user to the application's settings screen
    fn open_settings(&self) -> Result<(), BleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_sets_by_api_level() {
        assert_eq!(
            ble_permissions(34),
            vec![Permission::BLUETOOTH_CONNECT, Permission::BLUETOOTH_SCAN]
        );
        assert_eq!(ble_permissions(30).len(), 3);
        assert!(ble_permissions(23).contains(&Permission::ACCESS_FINE_LOCATION));

        assert_eq!(scan_permission(31), Permission::BLUETOOTH_SCAN);
        assert_eq!(scan_permission(29), Permission::ACCESS_FINE_LOCATION);
    }

    #[test]
    fn test_permission_serializes_as_plain_string() {
        let json = serde_json::to_string(&Permission::BLUETOOTH_SCAN).unwrap();
        assert_eq!(json, "\"android.permission.BLUETOOTH_SCAN\"");

        let parsed: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Permission::BLUETOOTH_SCAN);
    }

    #[test]
    fn test_grant_results_keep_request_order() {
        let results: GrantResults = vec![
            (Permission::BLUETOOTH_CONNECT, false),
            (Permission::BLUETOOTH_SCAN, true),
            (Permission::ACCESS_FINE_LOCATION, false),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            results.denied(),
            vec![Permission::BLUETOOTH_CONNECT, Permission::ACCESS_FINE_LOCATION]
        );
        assert_eq!(results.get(&Permission::BLUETOOTH_SCAN), Some(true));
        assert_eq!(results.get(&Permission::BLUETOOTH), None);
    }
}
