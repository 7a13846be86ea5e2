//! Host-driven bridge
//!
//! The host platform (Android) owns the OS APIs: permission dialogs, the
//! enable-Bluetooth activity, the scan callback and the UI. Rust owns the
//! negotiation and aggregation state. The host pushes platform state and OS
//! results in, and drains [`HostCommand`]s out, executing each one.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::types::{
    CapabilityOutcome, CapabilityRequestDto, HostCommand, PermissionResultUpdate, PermissionState,
    PermissionStateUpdate, RadioStateUpdate, ScanSnapshotResponse,
};
use crate::ble::host::ScanControl;
use crate::ble::{AdapterInfo, BleError, HostDiscovery, RadioPort, ScanFilter, ScanRecord};
use crate::config::GateConfig;
use crate::permission::{
    CapabilityRequest, Dialog, InteractiveToken, Permission, PermissionPort, PermissionStatus, PromptSurface,
};
use crate::{BleCommon, BleCommonError};

// Unified logging macros for the bridge:
// - On Android: mirror all messages to log::debug! (for android_logger / logcat),
//   while still emitting via tracing.
// - On other platforms: just use tracing.
#[cfg(feature = "android")]
macro_rules! h_info {
    ($($arg:tt)*) => {{
        tracing::info!($($arg)*);
        log::debug!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! h_info {
    ($($arg:tt)*) => {{
        tracing::info!($($arg)*);
    }};
}

#[cfg(feature = "android")]
macro_rules! h_warn {
    ($($arg:tt)*) => {{
        tracing::warn!($($arg)*);
        log::warn!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! h_warn {
    ($($arg:tt)*) => {{
        tracing::warn!($($arg)*);
    }};
}

#[derive(Default)]
struct PlatformState {
    granted: HashSet<Permission>,
    rationale: HashSet<Permission>,
    adapter: Option<AdapterInfo>,
}

impl PlatformState {
    fn apply(&mut self, state: &PermissionState) {
        if state.granted {
            self.granted.insert(state.permission.clone());
        } else {
            self.granted.remove(&state.permission);
        }
        if state.should_show_rationale {
            self.rationale.insert(state.permission.clone());
        } else {
            self.rationale.remove(&state.permission);
        }
    }
}

/// Port implementations that turn OS requests into queued host commands
struct HostPorts {
    state: RwLock<PlatformState>,
    commands: Mutex<VecDeque<HostCommand>>,
    prompts: Mutex<HashMap<u64, InteractiveToken>>,
    next_prompt: AtomicU64,
}

impl HostPorts {
    fn push(&self, command: HostCommand) {
        tracing::debug!("Queued host command: {:?}", command);
        self.commands.lock().push_back(command);
    }
}

impl PermissionPort for HostPorts {
    fn check_granted(&self, permission: &Permission) -> bool {
        self.state.read().granted.contains(permission)
    }

    fn should_show_rationale(&self, permission: &Permission) -> bool {
        self.state.read().rationale.contains(permission)
    }

    fn request(&self, permissions: &[Permission]) -> Result<(), BleError> {
        self.push(HostCommand::RequestPermissions {
            permissions: permissions.to_vec(),
        });
        Ok(())
    }

    fn open_settings(&self) -> Result<(), BleError> {
        self.push(HostCommand::OpenSettings);
        Ok(())
    }
}

impl RadioPort for HostPorts {
    fn adapter(&self) -> Option<AdapterInfo> {
        self.state.read().adapter.clone()
    }

    fn request_enable(&self) -> Result<(), BleError> {
        self.push(HostCommand::RequestEnable);
        Ok(())
    }
}

impl PromptSurface for HostPorts {
    fn show(&self, dialog: Dialog, token: InteractiveToken) {
        let prompt_id = self.next_prompt.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().insert(prompt_id, token);
        self.push(HostCommand::ShowPrompt { prompt_id, dialog });
    }
}

/// Host-facing handle: one [`BleCommon`] plus the command queue
pub struct HostBridge {
    ports: Arc<HostPorts>,
    discovery: HostDiscovery,
    core: BleCommon,
    next_request: AtomicU64,
}

impl HostBridge {
    pub fn new(config: GateConfig, runtime: Handle) -> Result<Self, BleCommonError> {
        let ports = Arc::new(HostPorts {
            state: RwLock::new(PlatformState::default()),
            commands: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(HashMap::new()),
            next_prompt: AtomicU64::new(1),
        });

        let discovery = HostDiscovery::new();
        let sink = Arc::downgrade(&ports);
        discovery.set_control_listener(Arc::new(move |control| {
            let Some(ports) = sink.upgrade() else {
                return;
            };
            ports.push(match control {
                ScanControl::Start { subscription, filters } => HostCommand::StartScan { subscription, filters },
                ScanControl::Stop { subscription } => HostCommand::StopScan { subscription },
            });
        }));

        let core = BleCommon::new(config, ports.clone(), ports.clone(), Arc::new(discovery.clone()), runtime)?;
        h_info!("Host bridge ready (api level {})", core.config().api_level);

        Ok(Self {
            ports,
            discovery,
            core,
            next_request: AtomicU64::new(1),
        })
    }

    pub fn core(&self) -> &BleCommon {
        &self.core
    }

    // ------------------------------------------------------------------
    // Host -> core
    // ------------------------------------------------------------------

    pub fn set_permission_state(&self, update: &PermissionStateUpdate) {
        let mut state = self.ports.state.write();
        for permission in &update.permissions {
            state.apply(permission);
        }
    }

    pub fn set_radio_state(&self, update: &RadioStateUpdate) {
        let adapter = update.present.then(|| {
            AdapterInfo::new(
                "Android",
                update.name.clone().unwrap_or_else(|| "Bluetooth adapter".to_string()),
                update.address.clone().unwrap_or_else(|| "unknown".to_string()),
                update.powered,
            )
        });
        self.ports.state.write().adapter = adapter;
    }

    /// Record the OS permission answer, then resume waiting passes
    pub fn deliver_permission_result(&self, update: &PermissionResultUpdate) -> usize {
        {
            let mut state = self.ports.state.write();
            for result in &update.results {
                state.apply(result);
            }
        }
        self.core.negotiator().deliver_permission_result(update.grant_results())
    }

    /// Record the OS enable answer, then resume waiting passes
    pub fn deliver_enable_result(&self, enabled: bool) -> usize {
        if let Some(adapter) = self.ports.state.write().adapter.as_mut() {
            adapter.powered = enabled;
        }
        self.core.negotiator().deliver_enable_result(enabled)
    }

    pub fn push_scan_result(&self, record: ScanRecord) -> usize {
        self.discovery.push(record)
    }

    /// Resolve a prompt shown for a `ShowPrompt` command
    pub fn resolve_prompt(&self, prompt_id: u64, proceed: bool) -> Result<(), String> {
        let token = self
            .ports
            .prompts
            .lock()
            .remove(&prompt_id)
            .ok_or_else(|| format!("Unknown prompt id: {}", prompt_id))?;

        if proceed {
            token.proceed();
        } else {
            token.cancel();
        }
        Ok(())
    }

    /// Start a capability negotiation; its outcome arrives as a
    /// `CapabilityOutcome` command carrying the returned request id
    pub fn request_capabilities(&self, request: &CapabilityRequestDto) -> u64 {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);

        let mut capability = if request.use_dialogs {
            CapabilityRequest::with_dialogs(self.ports.clone())
        } else {
            CapabilityRequest::default()
        };
        capability.permissions.permissions = request.permissions.clone();

        let sink = Arc::downgrade(&self.ports);
        h_info!("Capability request #{} started", request_id);
        self.core.negotiator().with_capabilities(capability, move |result| {
            let outcome = CapabilityOutcome::from(result);
            match sink.upgrade() {
                Some(ports) => ports.push(HostCommand::CapabilityOutcome { request_id, outcome }),
                None => h_warn!("Capability request #{} finished after shutdown: {:?}", request_id, outcome),
            }
        });
        request_id
    }

    pub fn permission_status(&self, permission: &Permission) -> PermissionStatus {
        self.core.negotiator().status(permission)
    }

    pub fn start_scan(&self, filters: Vec<ScanFilter>) -> Result<(), BleCommonError> {
        Ok(self.core.scan(filters)?)
    }

    pub fn stop_scan(&self) {
        self.core.stop_scan();
    }

    pub fn scan_snapshot(&self) -> ScanSnapshotResponse {
        ScanSnapshotResponse {
            scanning: self.core.scanner().is_scanning(),
            records: self.core.latest_snapshot().records().to_vec(),
        }
    }

    // ------------------------------------------------------------------
    // Core -> host
    // ------------------------------------------------------------------

    pub fn next_command(&self) -> Option<HostCommand> {
        self.ports.commands.lock().pop_front()
    }

    pub fn drain_commands(&self) -> Vec<HostCommand> {
        self.ports.commands.lock().drain(..).collect()
    }

    pub fn pending_prompts(&self) -> usize {
        self.ports.prompts.lock().len()
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        self.core.stop_scan();
        // Dropping the tokens resolves them as cancel; take them out first so
        // their continuations cannot re-enter the prompt map
        let prompts: Vec<InteractiveToken> = self.ports.prompts.lock().drain().map(|(_, t)| t).collect();
        if !prompts.is_empty() {
            h_warn!("Cancelling {} unresolved prompt(s) on shutdown", prompts.len());
        }
        drop(prompts);
    }
}
