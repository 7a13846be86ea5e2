//! FFI module for platform integration
//!
//! This module provides the interfaces a host platform uses to drive the Rust
//! core. It handles:
//! - Host-driven capability negotiation (platform state in, commands out)
//! - Scan result intake and snapshot queries
//! - JSON DTOs and the result envelope shared by every call

#[cfg(feature = "android")]
pub mod android;
pub mod host;
pub mod runtime;
pub mod types;

#[cfg(feature = "android")]
pub use android::*;
pub use host::HostBridge;
pub use types::*;
