//! Async runtime management for FFI
//!
//! Maintains a small multi-threaded Tokio runtime that is initialized once and
//! drives the scan fold tasks and discovery feeds of every FFI handle.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

static RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Initialize the global async runtime
pub fn init_runtime() -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2) // Keep it lightweight for Android
        .thread_name("ble-common")
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    RUNTIME
        .set(Arc::new(runtime))
        .map_err(|_| "Runtime already initialized".to_string())
}

/// Get a reference to the global runtime
pub fn get_runtime() -> Result<Arc<Runtime>, String> {
    RUNTIME
        .get()
        .cloned()
        .ok_or_else(|| "Runtime not initialized".to_string())
}

/// Handle for spawning onto the global runtime
pub fn handle() -> Result<Handle, String> {
    Ok(get_runtime()?.handle().clone())
}

