//! Android JNI interface
//!
//! This module provides the JNI bindings that Kotlin can call from Android.
//! All functions follow the JNI naming convention and return a JSON
//! [`FfiResult`] envelope as a Java string.

use jni::objects::{JByteArray, JClass, JString};
use jni::sys::{jboolean, jlong, jstring, JNI_TRUE};
use jni::JNIEnv;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use super::host::HostBridge;
use super::runtime;
use super::types::*;
use crate::ble::ScanRecord;
use crate::config::GateConfig;
use crate::logging;
use crate::permission::Permission;

// Global state for bridge instances; slots stay in place so handles remain stable
lazy_static::lazy_static! {
    static ref BRIDGES: Mutex<Vec<Option<Arc<HostBridge>>>> = Mutex::new(Vec::new());
}

// =============================================================================
// Initialization and lifecycle
// =============================================================================

/// Initialize a bridge instance
/// Returns a handle (index) to the bridge, or -1 on failure
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_init(env: JNIEnv, _class: JClass, config_bytes: JByteArray) -> jlong {
    let result: Result<jlong, String> = (|| {
        // Initialize runtime if needed
        runtime::init_runtime().ok(); // Ignore if already initialized

        let config_data: Vec<u8> = env
            .convert_byte_array(&config_bytes)
            .map_err(|e| format!("Failed to read config bytes: {}", e))?;
        let config = GateConfig::from_json(&config_data).map_err(|e| e.to_string())?;

        logging::init_logging(&config.logging);

        let bridge = HostBridge::new(config, runtime::handle()?).map_err(|e| e.to_string())?;

        let mut bridges = BRIDGES.lock();
        bridges.push(Some(Arc::new(bridge)));
        let handle = (bridges.len() - 1) as jlong;

        tracing::info!("✅ BLE common initialized with handle {}", handle);
        Ok(handle)
    })();

    match result {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to initialize BLE common: {}", e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_version(mut env: JNIEnv, _class: JClass) -> jstring {
    create_result_string(&mut env, to_json(crate::VERSION))
}

/// Release a bridge; pending prompts are cancelled and the scan stops
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_shutdown(_env: JNIEnv, _class: JClass, handle: jlong) {
    let mut bridges = BRIDGES.lock();
    if handle >= 0 && (handle as usize) < bridges.len() {
        bridges[handle as usize] = None;
        tracing::info!("🛑 Shutting down BLE common handle {}", handle);
    }
}

// =============================================================================
// Platform state and OS results
// =============================================================================

#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_setPermissionState(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    update_json: JByteArray,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        let update: PermissionStateUpdate = read_json(&env, &update_json)?;
        bridge.set_permission_state(&update);
        to_json(())
    })();

    create_result_string(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_setRadioState(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    update_json: JByteArray,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        let update: RadioStateUpdate = read_json(&env, &update_json)?;
        bridge.set_radio_state(&update);
        to_json(())
    })();

    create_result_string(&mut env, result)
}

/// Answer to a `RequestPermissions` command
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_deliverPermissionResult(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    result_json: JByteArray,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        let update: PermissionResultUpdate = read_json(&env, &result_json)?;
        to_json(bridge.deliver_permission_result(&update))
    })();

    create_result_string(&mut env, result)
}

/// Answer to a `RequestEnable` command
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_deliverEnableResult(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    enabled: jboolean,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        to_json(bridge.deliver_enable_result(enabled == JNI_TRUE))
    })();

    create_result_string(&mut env, result)
}

/// Answer to a `ShowPrompt` command
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_resolvePrompt(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    prompt_id: jlong,
    proceed: jboolean,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        bridge.resolve_prompt(prompt_id as u64, proceed == JNI_TRUE)?;
        to_json(())
    })();

    create_result_string(&mut env, result)
}

/// Push one result from the OS scan callback
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_pushScanResult(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    record_json: JByteArray,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        let record: ScanRecord = read_json(&env, &record_json)?;
        to_json(bridge.push_scan_result(record))
    })();

    create_result_string(&mut env, result)
}

// =============================================================================
// Negotiation and scanning
// =============================================================================

/// Returns the request id echoed by the matching `CapabilityOutcome` command
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_requestCapabilities(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    request_json: JByteArray,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        let request: CapabilityRequestDto = read_json(&env, &request_json)?;
        to_json(bridge.request_capabilities(&request))
    })();

    create_result_string(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_permissionStatus(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    permission: JString,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        let permission: String = env
            .get_string(&permission)
            .map_err(|e| format!("Failed to read permission: {}", e))?
            .into();
        let permission = Permission::new(permission);
        let status = bridge.permission_status(&permission);
        to_json(PermissionStatusResponse { permission, status })
    })();

    create_result_string(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_startScan(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    request_json: JByteArray,
) -> jstring {
    let result = (|| {
        let bridge = get_bridge(handle)?;
        let request: ScanRequest = read_json(&env, &request_json)?;
        bridge.start_scan(request.filters).map_err(|e| e.to_string())?;
        to_json(())
    })();

    create_result_string(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_stopScan(mut env: JNIEnv, _class: JClass, handle: jlong) -> jstring {
    let result = (|| {
        get_bridge(handle)?.stop_scan();
        to_json(())
    })();

    create_result_string(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_scanSnapshot(mut env: JNIEnv, _class: JClass, handle: jlong) -> jstring {
    let result = (|| to_json(get_bridge(handle)?.scan_snapshot()))();

    create_result_string(&mut env, result)
}

/// Next command for the host, or `null` data when the queue is empty
#[no_mangle]
pub extern "C" fn Java_com_blecommon_BleCommonFFI_nextCommand(mut env: JNIEnv, _class: JClass, handle: jlong) -> jstring {
    let result = (|| to_json(get_bridge(handle)?.next_command()))();

    create_result_string(&mut env, result)
}

// =============================================================================
// Helpers
// =============================================================================

fn get_bridge(handle: jlong) -> Result<Arc<HostBridge>, String> {
    let bridges = BRIDGES.lock();
    if handle < 0 {
        return Err(format!("Invalid handle: {}", handle));
    }
    bridges
        .get(handle as usize)
        .and_then(|slot| slot.clone())
        .ok_or_else(|| format!("Invalid handle: {}", handle))
}

fn read_json<T: serde::de::DeserializeOwned>(env: &JNIEnv, bytes: &JByteArray) -> Result<T, String> {
    let data: Vec<u8> = env
        .convert_byte_array(bytes)
        .map_err(|e| format!("Failed to read request bytes: {}", e))?;
    serde_json::from_slice(&data).map_err(|e| format!("Failed to parse request: {}", e))
}

fn to_json<T: Serialize>(data: T) -> Result<String, String> {
    let response: FfiResult<T> = FfiResult::success(data);
    serde_json::to_string(&response).map_err(|e| format!("Serialization error: {}", e))
}

fn create_result_string(env: &mut JNIEnv, result: Result<String, String>) -> jstring {
    let json = match result {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("FFI call failed: {}", e);
            log::warn!("FFI call failed: {}", e);
            let error_response: FfiResult<()> = FfiResult::error("ERR_INTERNAL", e);
            serde_json::to_string(&error_response)
                .unwrap_or_else(|_| r#"{"ok":false,"code":"ERR_FATAL","message":"Serialization failed"}"#.to_string())
        }
    };

    match env.new_string(json) {
        Ok(string) => string.into_raw(),
        Err(e) => {
            tracing::error!("Failed to create Java string: {}", e);
            std::ptr::null_mut()
        }
    }
}
