//! FFI data types and JSON schemas (v1)
//!
//! All data exchanged across the FFI boundary uses JSON serialization.
//! Host-to-core messages carry a `version` field for future compatibility.

use serde::{Deserialize, Serialize};

use crate::ble::{AdapterInfo, ScanFilter, ScanRecord};
use crate::permission::{CapabilityError, Dialog, GrantResults, Permission, PermissionStatus};

/// Version 1 of the FFI protocol
pub const FFI_VERSION: u32 = 1;

fn default_version() -> u32 {
    FFI_VERSION
}

// ============================================================================
// Result envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FfiResult<T> {
    Ok { ok: bool, data: T },
    Err { ok: bool, code: String, message: String },
}

impl<T> FfiResult<T> {
    pub fn success(data: T) -> Self {
        FfiResult::Ok { ok: true, data }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        FfiResult::Err {
            ok: false,
            code: code.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Host -> core: platform state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub permission: Permission,
    pub granted: bool,
    /// Platform rationale signal; `false` after "don't ask again"
    #[serde(default)]
    pub should_show_rationale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionStateUpdate {
    #[serde(default = "default_version")]
    pub version: u32,
    pub permissions: Vec<PermissionState>,
}

/// Answer to a `RequestPermissions` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResultUpdate {
    #[serde(default = "default_version")]
    pub version: u32,
    pub results: Vec<PermissionState>,
}

impl PermissionResultUpdate {
    pub fn grant_results(&self) -> GrantResults {
        self.results.iter().map(|s| (s.permission.clone(), s.granted)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioStateUpdate {
    #[serde(default = "default_version")]
    pub version: u32,
    /// `false` when the device has no Bluetooth adapter
    pub present: bool,
    pub powered: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

// ============================================================================
// Host -> core: requests
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityRequestDto {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Empty means the platform's required set
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Route rationale, settings and enable prompts through `ShowPrompt`
    #[serde(default)]
    pub use_dialogs: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub filters: Vec<ScanFilter>,
}

// ============================================================================
// Core -> host
// ============================================================================

/// Terminal outcome of a capability negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CapabilityOutcome {
    Ready { adapter: AdapterInfo },
    PermissionDenied { permissions: Vec<Permission> },
    RadioDisabled,
    FeatureUnavailable,
    Interrupted,
}

impl From<Result<AdapterInfo, CapabilityError>> for CapabilityOutcome {
    fn from(result: Result<AdapterInfo, CapabilityError>) -> Self {
        match result {
            Ok(adapter) => CapabilityOutcome::Ready { adapter },
            Err(CapabilityError::PermissionDenied(permissions)) => CapabilityOutcome::PermissionDenied { permissions },
            Err(CapabilityError::RadioDisabled) => CapabilityOutcome::RadioDisabled,
            Err(CapabilityError::FeatureUnavailable) => CapabilityOutcome::FeatureUnavailable,
            Err(CapabilityError::Interrupted) => CapabilityOutcome::Interrupted,
        }
    }
}

/// Work the host must perform on the core's behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostCommand {
    RequestPermissions { permissions: Vec<Permission> },
    RequestEnable,
    OpenSettings,
    /// Show `dialog`, then call `resolvePrompt(prompt_id, proceed)`
    ShowPrompt { prompt_id: u64, dialog: Dialog },
    StartScan { subscription: u64, filters: Vec<ScanFilter> },
    StopScan { subscription: u64 },
    CapabilityOutcome { request_id: u64, outcome: CapabilityOutcome },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionStatusResponse {
    pub permission: Permission,
    pub status: PermissionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSnapshotResponse {
    pub scanning: bool,
    pub records: Vec<ScanRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(FfiResult::success(3u32)).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "data": 3}));

        let err = serde_json::to_value(FfiResult::<()>::error("ERR_SCAN", "no permission")).unwrap();
        assert_eq!(err, serde_json::json!({"ok": false, "code": "ERR_SCAN", "message": "no permission"}));
    }

    #[test]
    fn test_command_tagging() {
        let json = serde_json::to_value(HostCommand::CapabilityOutcome {
            request_id: 4,
            outcome: CapabilityOutcome::PermissionDenied {
                permissions: vec![Permission::BLUETOOTH_SCAN],
            },
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "CapabilityOutcome",
                "request_id": 4,
                "outcome": {"status": "permission_denied", "permissions": ["android.permission.BLUETOOTH_SCAN"]}
            })
        );
    }

    #[test]
    fn test_host_updates_default_version() {
        let update: RadioStateUpdate = serde_json::from_str(r#"{"present": true, "powered": false}"#).unwrap();
        assert_eq!(update.version, FFI_VERSION);
        assert!(update.name.is_none());
    }
}
