//! Capability negotiation engine
//!
//! A negotiation pass walks:
//!
//! ```text
//! Idle -> CheckingPermissions -> {AllGranted | AwaitingUserDecision}
//!      -> {CheckingRadio | Denied}
//!      -> AwaitingRadioDecision -> {Ready | RadioDisabled | Unavailable}
//! ```
//!
//! Every pass ends in exactly one outward callback. Nothing blocks: waiting
//! for the user or the OS is a listener parked in a [`CallbackRegistry`], and
//! the host resumes the pass by delivering the platform's answer through
//! [`CapabilityNegotiator::deliver_permission_result`] or
//! [`CapabilityNegotiator::deliver_enable_result`]. Callbacks run on the
//! thread that delivers the answer (or resolves the prompt token).

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

use super::denial_store::PermanentDenialStore;
use super::prompt::{DialogPrompt, EnablePrompt, PermissionPrompt, PromptSurface};
use super::registry::{CallbackRegistry, OperationKind};
use super::token::{InteractiveToken, PermissionToken};
use super::{GrantResults, Permission, PermissionPort, PermissionStatus};
use crate::ble::{AdapterInfo, RadioPort};

/// Permission negotiation settings
#[derive(Clone, Default)]
pub struct PermissionRequest {
    /// Required permissions; empty means the negotiator's platform set
    pub permissions: Vec<Permission>,
    /// Shown before (re-)requesting permissions that may still be asked for
    pub rationale: Option<Arc<dyn PermissionPrompt>>,
    /// Offers a settings redirect for permanently denied permissions
    pub permanently_denied: Option<Arc<dyn PermissionPrompt>>,
}

impl PermissionRequest {
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self {
            permissions,
            ..Self::default()
        }
    }

    pub fn with_rationale(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.rationale = Some(prompt);
        self
    }

    pub fn with_settings_redirect(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.permanently_denied = Some(prompt);
        self
    }
}

impl std::fmt::Debug for PermissionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionRequest")
            .field("permissions", &self.permissions)
            .field("rationale", &self.rationale.is_some())
            .field("permanently_denied", &self.permanently_denied.is_some())
            .finish()
    }
}

/// Radio-enable settings
#[derive(Clone, Default)]
pub struct EnableRequest {
    /// Asked before launching the OS enable request; `None` launches directly
    pub prompt: Option<Arc<dyn EnablePrompt>>,
}

impl EnableRequest {
    pub fn with_prompt(prompt: Arc<dyn EnablePrompt>) -> Self {
        Self { prompt: Some(prompt) }
    }
}

impl std::fmt::Debug for EnableRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnableRequest")
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

/// Full capability negotiation settings
#[derive(Debug, Clone, Default)]
pub struct CapabilityRequest {
    pub permissions: PermissionRequest,
    pub enable: EnableRequest,
}

impl CapabilityRequest {
    /// Request with the three stock dialogs rendered on `surface`
    pub fn with_dialogs(surface: Arc<dyn PromptSurface>) -> Self {
        Self {
            permissions: PermissionRequest::default()
                .with_rationale(Arc::new(DialogPrompt::rationale(surface.clone())))
                .with_settings_redirect(Arc::new(DialogPrompt::permanently_denied(surface.clone()))),
            enable: EnableRequest::with_prompt(Arc::new(DialogPrompt::enable_radio(surface))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionOutcome {
    Granted,
    /// Only the permissions still not granted at the end of the pass
    Denied(Vec<Permission>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioOutcome {
    Enabled(AdapterInfo),
    Disabled,
    FeatureUnavailable,
}

/// Why a capability negotiation did not end ready
///
/// Always delivered as a value through the outcome callback.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityError {
    /// Recoverable: the caller may negotiate again later
    #[error("Permissions denied: {}", join_permissions(.0))]
    PermissionDenied(Vec<Permission>),

    /// Recoverable: the user kept Bluetooth off
    #[error("Bluetooth is disabled")]
    RadioDisabled,

    /// No Bluetooth hardware or manager on this device
    #[error("Bluetooth is not available on this device")]
    FeatureUnavailable,

    /// The negotiator went away while the pass was waiting
    #[error("Negotiation interrupted before completion")]
    Interrupted,
}

fn join_permissions(permissions: &[Permission]) -> String {
    permissions.iter().map(Permission::as_str).collect::<Vec<_>>().join(", ")
}

/// State of one negotiation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassState {
    Idle,
    CheckingPermissions,
    AllGranted,
    AwaitingUserDecision,
    /// Terminal for permission-only passes
    Granted,
    Denied,
    CheckingRadio,
    AwaitingRadioDecision,
    Ready,
    RadioDisabled,
    Unavailable,
}

impl PassState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PassState::Granted
                | PassState::Denied
                | PassState::Ready
                | PassState::RadioDisabled
                | PassState::Unavailable
        )
    }
}

/// Observer of pass transitions: `(pass id, new state)`
pub type PassObserver = Arc<dyn Fn(u64, PassState) + Send + Sync>;

/// The four outward continuations of a capability negotiation
pub struct CapabilityCallbacks {
    on_ready: Box<dyn FnOnce(AdapterInfo) + Send>,
    on_permission_denied: Box<dyn FnOnce(Vec<Permission>) + Send>,
    on_ble_disabled: Box<dyn FnOnce() + Send>,
    on_feature_unavailable: Box<dyn FnOnce() + Send>,
}

impl CapabilityCallbacks {
    /// Callbacks with `on_ready`; the failure callbacks default to logging
    pub fn new(on_ready: impl FnOnce(AdapterInfo) + Send + 'static) -> Self {
        Self {
            on_ready: Box::new(on_ready),
            on_permission_denied: Box::new(|denied| {
                tracing::warn!("Permissions denied: {}", join_permissions(&denied));
            }),
            on_ble_disabled: Box::new(|| tracing::warn!("Bluetooth stays disabled")),
            on_feature_unavailable: Box::new(|| tracing::warn!("Bluetooth is not available on this device")),
        }
    }

    pub fn on_permission_denied(mut self, f: impl FnOnce(Vec<Permission>) + Send + 'static) -> Self {
        self.on_permission_denied = Box::new(f);
        self
    }

    pub fn on_ble_disabled(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_ble_disabled = Box::new(f);
        self
    }

    pub fn on_feature_unavailable(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_feature_unavailable = Box::new(f);
        self
    }

    /// Route a pass result to the matching callback
    pub fn dispatch(self, result: Result<AdapterInfo, CapabilityError>) {
        match result {
            Ok(adapter) => (self.on_ready)(adapter),
            Err(CapabilityError::PermissionDenied(denied)) => (self.on_permission_denied)(denied),
            Err(CapabilityError::RadioDisabled) | Err(CapabilityError::Interrupted) => (self.on_ble_disabled)(),
            Err(CapabilityError::FeatureUnavailable) => (self.on_feature_unavailable)(),
        }
    }
}

/// One-shot continuation reachable from several closures (both arms of a
/// token, or a token arm and a registry listener). Only the first call runs.
struct Completion<A> {
    slot: Arc<Mutex<Option<Box<dyn FnOnce(A) + Send>>>>,
}

impl<A> Clone for Completion<A> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<A> Completion<A> {
    fn new(f: impl FnOnce(A) + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    fn call(&self, value: A) {
        let f = self.slot.lock().take();
        if let Some(f) = f {
            f(value);
        }
    }
}

struct Pass {
    id: u64,
    state: Mutex<PassState>,
    observer: Option<PassObserver>,
}

impl Pass {
    fn advance(&self, next: PassState) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, next)
        };
        tracing::debug!("Negotiation pass #{}: {:?} -> {:?}", self.id, previous, next);
        if let Some(observer) = &self.observer {
            observer(self.id, next);
        }
    }
}

type DeferredRequest = Box<dyn FnOnce() + Send>;
type GrantListener = Box<dyn FnOnce(GrantResults) + Send>;

#[derive(Default)]
struct PermissionFlight {
    // What the OS request currently in flight asked for
    requested: Vec<Permission>,
    // Requests it does not cover; launched once its result is dispatched
    deferred: Vec<DeferredRequest>,
}

struct Inner {
    permissions: Arc<dyn PermissionPort>,
    radio: Arc<dyn RadioPort>,
    denials: PermanentDenialStore,
    required: Vec<Permission>,
    permission_results: CallbackRegistry<GrantResults>,
    permission_flight: Mutex<PermissionFlight>,
    enable_results: CallbackRegistry<bool>,
    next_pass: AtomicU64,
    observer: RwLock<Option<PassObserver>>,
}

/// Orchestrates permission and radio-enable consent flows
///
/// Cloning shares the same negotiator (and its pending operations).
#[derive(Clone)]
pub struct CapabilityNegotiator {
    inner: Arc<Inner>,
}

impl CapabilityNegotiator {
    /// Create a negotiator for the given platform permission set
    pub fn new(
        permissions: Arc<dyn PermissionPort>,
        radio: Arc<dyn RadioPort>,
        denials: PermanentDenialStore,
        required: Vec<Permission>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                permissions,
                radio,
                denials,
                required,
                permission_results: CallbackRegistry::new(OperationKind::PermissionRequest),
                permission_flight: Mutex::new(PermissionFlight::default()),
                enable_results: CallbackRegistry::new(OperationKind::RadioEnable),
                next_pass: AtomicU64::new(1),
                observer: RwLock::new(None),
            }),
        }
    }

    /// Platform permissions negotiated when a request lists none
    pub fn required_permissions(&self) -> &[Permission] {
        &self.inner.required
    }

    /// Install an observer for pass state transitions
    pub fn set_pass_observer(&self, observer: PassObserver) {
        *self.inner.observer.write() = Some(observer);
    }

    /// Current status of `permission`, derived from the OS and the denial store
    pub fn status(&self, permission: &Permission) -> PermissionStatus {
        if self.inner.permissions.check_granted(permission) {
            PermissionStatus::Granted
        } else if self.inner.denials.is_permanently_denied(permission) {
            PermissionStatus::PermanentlyDenied
        } else {
            PermissionStatus::Denied
        }
    }

    /// Negotiate runtime permissions
    ///
    /// `on_outcome` runs exactly once, possibly synchronously when every
    /// permission is already granted.
    pub fn request_permissions<F>(&self, request: PermissionRequest, on_outcome: F)
    where
        F: FnOnce(PermissionOutcome) + Send + 'static,
    {
        let pass = self.inner.start_pass();
        let finished = Arc::clone(&pass);
        self.inner.negotiate_permissions(pass, request, move |outcome| {
            finished.advance(match outcome {
                PermissionOutcome::Granted => PassState::Granted,
                PermissionOutcome::Denied(_) => PassState::Denied,
            });
            on_outcome(outcome);
        });
    }

    /// Make sure the radio is powered on
    pub fn enable_radio<F>(&self, request: EnableRequest, on_outcome: F)
    where
        F: FnOnce(RadioOutcome) + Send + 'static,
    {
        let pass = self.inner.start_pass();
        self.inner.negotiate_radio(pass, request, on_outcome);
    }

    /// Permissions first, then the radio; `on_result` runs exactly once
    pub fn with_capabilities<F>(&self, request: CapabilityRequest, on_result: F)
    where
        F: FnOnce(Result<AdapterInfo, CapabilityError>) + Send + 'static,
    {
        let pass = self.inner.start_pass();
        let inner = Arc::clone(&self.inner);
        let radio_pass = Arc::clone(&pass);
        let CapabilityRequest { permissions, enable } = request;

        self.inner.negotiate_permissions(pass, permissions, move |outcome| match outcome {
            PermissionOutcome::Granted => {
                inner.negotiate_radio(radio_pass, enable, move |radio| {
                    on_result(match radio {
                        RadioOutcome::Enabled(adapter) => Ok(adapter),
                        RadioOutcome::Disabled => Err(CapabilityError::RadioDisabled),
                        RadioOutcome::FeatureUnavailable => Err(CapabilityError::FeatureUnavailable),
                    })
                });
            }
            PermissionOutcome::Denied(denied) => {
                radio_pass.advance(PassState::Denied);
                on_result(Err(CapabilityError::PermissionDenied(denied)));
            }
        });
    }

    /// [`Self::with_capabilities`] routed to separate callbacks
    pub fn with_capabilities_callbacks(&self, request: CapabilityRequest, callbacks: CapabilityCallbacks) {
        self.with_capabilities(request, move |result| callbacks.dispatch(result));
    }

    /// Awaitable form of [`Self::with_capabilities`]
    pub async fn negotiate(&self, request: CapabilityRequest) -> Result<AdapterInfo, CapabilityError> {
        let (tx, rx) = oneshot::channel();
        self.with_capabilities(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(CapabilityError::Interrupted))
    }

    /// Deliver the platform's answer to the pending permission request
    ///
    /// Returns how many waiting passes were resumed.
    pub fn deliver_permission_result(&self, results: GrantResults) -> usize {
        tracing::info!("Permission result received: {:?}", results);
        self.inner.dispatch_permission_result(results)
    }

    /// Deliver the platform's answer to the pending enable request
    pub fn deliver_enable_result(&self, enabled: bool) -> usize {
        tracing::info!("Bluetooth enable result received: {}", enabled);
        self.inner.enable_results.dispatch(enabled)
    }

    pub fn is_permission_request_pending(&self) -> bool {
        self.inner.permission_results.is_in_flight()
    }

    pub fn is_enable_request_pending(&self) -> bool {
        self.inner.enable_results.is_in_flight()
    }
}

impl Inner {
    fn start_pass(&self) -> Arc<Pass> {
        let pass = Arc::new(Pass {
            id: self.next_pass.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(PassState::Idle),
            observer: self.observer.read().clone(),
        });
        tracing::debug!("Starting negotiation pass #{}", pass.id);
        pass
    }

    fn negotiate_permissions<F>(self: &Arc<Self>, pass: Arc<Pass>, request: PermissionRequest, done: F)
    where
        F: FnOnce(PermissionOutcome) + Send + 'static,
    {
        pass.advance(PassState::CheckingPermissions);

        let required = if request.permissions.is_empty() {
            self.required.clone()
        } else {
            request.permissions.clone()
        };
        let missing: Vec<Permission> = required
            .into_iter()
            .filter(|p| !self.permissions.check_granted(p))
            .collect();

        if missing.is_empty() {
            pass.advance(PassState::AllGranted);
            tracing::info!("All required permissions already granted");
            done(PermissionOutcome::Granted);
            return;
        }

        let (permanent, eligible): (Vec<Permission>, Vec<Permission>) = missing
            .into_iter()
            .partition(|p| self.denials.is_permanently_denied(p));
        tracing::info!(
            "Missing permissions: {} askable, {} permanently denied",
            eligible.len(),
            permanent.len()
        );
        pass.advance(PassState::AwaitingUserDecision);

        let inner = Arc::clone(self);
        let settings_prompt = request.permanently_denied.clone();
        self.resolve_eligible(eligible, request.rationale.clone(), move |mut denied| {
            inner.resolve_permanent(permanent, settings_prompt, move |still_denied| {
                denied.extend(still_denied);
                if denied.is_empty() {
                    done(PermissionOutcome::Granted);
                } else {
                    done(PermissionOutcome::Denied(denied));
                }
            });
        });
    }

    /// Permissions the user may still be asked for: rationale first if there
    /// is a prompt, otherwise straight to the OS request
    fn resolve_eligible<F>(self: &Arc<Self>, eligible: Vec<Permission>, rationale: Option<Arc<dyn PermissionPrompt>>, then: F)
    where
        F: FnOnce(Vec<Permission>) + Send + 'static,
    {
        if eligible.is_empty() {
            then(Vec::new());
            return;
        }

        let Some(prompt) = rationale else {
            self.launch_permission_request(eligible, then);
            return;
        };

        let then = Completion::new(then);
        let on_proceed = {
            let inner = Arc::clone(self);
            let then = then.clone();
            let requested = eligible.clone();
            move || inner.launch_permission_request(requested, move |denied| then.call(denied))
        };
        let on_cancel = {
            let declined = eligible.clone();
            move || {
                tracing::info!("Permission rationale declined");
                then.call(declined);
            }
        };
        prompt.prompt(PermissionToken::new(eligible, InteractiveToken::new(on_proceed, on_cancel)));
    }

    /// Permissions marked "don't ask again": only a settings redirect can
    /// help, and even an accepted redirect counts as denied for this pass
    fn resolve_permanent<F>(self: &Arc<Self>, permanent: Vec<Permission>, prompt: Option<Arc<dyn PermissionPrompt>>, then: F)
    where
        F: FnOnce(Vec<Permission>) + Send + 'static,
    {
        if permanent.is_empty() {
            then(Vec::new());
            return;
        }

        let Some(prompt) = prompt else {
            tracing::info!("Permanently denied permissions and no settings prompt: {}", join_permissions(&permanent));
            then(permanent);
            return;
        };

        let then = Completion::new(then);
        let on_proceed = {
            let inner = Arc::clone(self);
            let then = then.clone();
            let denied = permanent.clone();
            move || {
                tracing::info!("Redirecting to application settings");
                if let Err(e) = inner.permissions.open_settings() {
                    tracing::warn!("Failed to open application settings: {}", e);
                }
                then.call(denied);
            }
        };
        let on_cancel = {
            let denied = permanent.clone();
            move || {
                tracing::info!("Settings redirect declined");
                then.call(denied);
            }
        };
        prompt.prompt(PermissionToken::new(permanent, InteractiveToken::new(on_proceed, on_cancel)));
    }

    fn launch_permission_request<F>(self: &Arc<Self>, permissions: Vec<Permission>, then: F)
    where
        F: FnOnce(Vec<Permission>) + Send + 'static,
    {
        let inner = Arc::clone(self);
        let requested = permissions.clone();
        let listener = move |results: GrantResults| {
            let denied: Vec<Permission> = requested
                .iter()
                .filter(|p| !results.get(p).unwrap_or_else(|| inner.permissions.check_granted(p)))
                .cloned()
                .collect();

            // Only permissions the OS actually answered for can be judged: the
            // rationale signal is also off for never-asked permissions.
            let newly_permanent: Vec<Permission> = denied
                .iter()
                .filter(|p| results.get(p) == Some(false) && !inner.permissions.should_show_rationale(p))
                .cloned()
                .collect();
            if !newly_permanent.is_empty() {
                inner.denials.mark_permanently_denied(&newly_permanent);
            }

            then(denied);
        };
        self.request_or_defer(permissions, Box::new(listener));
    }

    /// Join the OS request in flight when it covers `permissions`, otherwise
    /// launch one, or queue behind the pending one
    fn request_or_defer(self: &Arc<Self>, permissions: Vec<Permission>, listener: GrantListener) {
        let launch = {
            let mut flight = self.permission_flight.lock();
            if self.permission_results.is_in_flight()
                && !permissions.iter().all(|p| flight.requested.contains(p))
            {
                tracing::info!(
                    "Permission request for {} queued behind the pending one",
                    join_permissions(&permissions)
                );
                let inner = Arc::clone(self);
                flight
                    .deferred
                    .push(Box::new(move || inner.request_or_defer(permissions, listener)));
                return;
            }

            let attachment = self.permission_results.attach(listener);
            if attachment.launch {
                flight.requested = permissions.clone();
            }
            attachment.launch
        };

        if launch {
            tracing::info!("Requesting permissions: {}", join_permissions(&permissions));
            if let Err(e) = self.permissions.request(&permissions) {
                tracing::warn!("Failed to launch permission request: {}", e);
                self.dispatch_permission_result(GrantResults::new());
            }
        } else {
            tracing::debug!("Permission request already pending, waiting for its result");
        }
    }

    /// Dispatch to the current listeners, then launch requests queued behind them
    fn dispatch_permission_result(self: &Arc<Self>, results: GrantResults) -> usize {
        let count = self.permission_results.dispatch(results);
        let deferred = std::mem::take(&mut self.permission_flight.lock().deferred);
        for launch in deferred {
            launch();
        }
        count
    }

    fn negotiate_radio<F>(self: &Arc<Self>, pass: Arc<Pass>, request: EnableRequest, done: F)
    where
        F: FnOnce(RadioOutcome) + Send + 'static,
    {
        pass.advance(PassState::CheckingRadio);

        let Some(adapter) = self.radio.adapter() else {
            pass.advance(PassState::Unavailable);
            tracing::warn!("No Bluetooth adapter available");
            done(RadioOutcome::FeatureUnavailable);
            return;
        };

        if adapter.powered {
            pass.advance(PassState::Ready);
            tracing::info!("Bluetooth ready on {}", adapter);
            done(RadioOutcome::Enabled(adapter));
            return;
        }

        pass.advance(PassState::AwaitingRadioDecision);
        let done = Completion::new(done);

        // Joining a pending request must not ask the user a second time
        if self.enable_results.is_in_flight() {
            self.launch_enable(pass, done);
            return;
        }

        let Some(prompt) = request.prompt else {
            self.launch_enable(pass, done);
            return;
        };

        let on_proceed = {
            let inner = Arc::clone(self);
            let pass = Arc::clone(&pass);
            let done = done.clone();
            move || inner.launch_enable(pass, done)
        };
        let on_cancel = move || {
            tracing::info!("Bluetooth enable prompt declined");
            pass.advance(PassState::RadioDisabled);
            done.call(RadioOutcome::Disabled);
        };
        prompt.prompt(InteractiveToken::new(on_proceed, on_cancel));
    }

    fn launch_enable(self: &Arc<Self>, pass: Arc<Pass>, done: Completion<RadioOutcome>) {
        let inner = Arc::clone(self);
        let attachment = self.enable_results.attach(move |enabled: bool| {
            if !enabled {
                pass.advance(PassState::RadioDisabled);
                done.call(RadioOutcome::Disabled);
                return;
            }
            match inner.radio.adapter() {
                Some(mut adapter) => {
                    adapter.powered = true;
                    pass.advance(PassState::Ready);
                    done.call(RadioOutcome::Enabled(adapter));
                }
                None => {
                    pass.advance(PassState::Unavailable);
                    done.call(RadioOutcome::FeatureUnavailable);
                }
            }
        });

        if attachment.launch {
            tracing::info!("Requesting Bluetooth enable");
            if let Err(e) = self.radio.request_enable() {
                tracing::warn!("Failed to launch Bluetooth enable request: {}", e);
                self.enable_results.dispatch(false);
            }
        } else {
            tracing::debug!("Bluetooth enable already pending, waiting for its result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::BleError;
    use std::collections::HashSet;

    #[derive(Default)]
    struct StubPermissions {
        granted: Mutex<HashSet<Permission>>,
        requests: Mutex<Vec<Vec<Permission>>>,
    }

    impl PermissionPort for StubPermissions {
        fn check_granted(&self, permission: &Permission) -> bool {
            self.granted.lock().contains(permission)
        }

        fn should_show_rationale(&self, _permission: &Permission) -> bool {
            true
        }

        fn request(&self, permissions: &[Permission]) -> Result<(), BleError> {
            self.requests.lock().push(permissions.to_vec());
            Ok(())
        }

        fn open_settings(&self) -> Result<(), BleError> {
            Ok(())
        }
    }

    struct StubRadio {
        adapter: Mutex<Option<AdapterInfo>>,
        launches: Mutex<usize>,
        fail_launch: bool,
    }

    impl RadioPort for StubRadio {
        fn adapter(&self) -> Option<AdapterInfo> {
            self.adapter.lock().clone()
        }

        fn request_enable(&self) -> Result<(), BleError> {
            *self.launches.lock() += 1;
            if self.fail_launch {
                Err(BleError::PlatformError("no activity".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn negotiator(powered: bool, fail_launch: bool) -> (CapabilityNegotiator, Arc<StubPermissions>, Arc<StubRadio>) {
        let permissions = Arc::new(StubPermissions::default());
        let radio = Arc::new(StubRadio {
            adapter: Mutex::new(Some(AdapterInfo::new("Test", "hci0", "00:00:00:00:00:01", powered))),
            launches: Mutex::new(0),
            fail_launch,
        });
        let negotiator = CapabilityNegotiator::new(
            permissions.clone(),
            radio.clone(),
            PermanentDenialStore::in_memory(),
            vec![Permission::BLUETOOTH_SCAN],
        );
        (negotiator, permissions, radio)
    }

    #[test]
    fn test_pass_states_for_denied_permission() {
        let (negotiator, _permissions, _radio) = negotiator(true, false);
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        negotiator.set_pass_observer(Arc::new(move |_, state| sink.lock().push(state)));

        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        negotiator.with_capabilities(CapabilityRequest::default(), move |r| *slot.lock() = Some(r));
        negotiator.deliver_permission_result(vec![(Permission::BLUETOOTH_SCAN, false)].into_iter().collect());

        assert_eq!(
            *result.lock(),
            Some(Err(CapabilityError::PermissionDenied(vec![Permission::BLUETOOTH_SCAN])))
        );
        assert_eq!(
            *states.lock(),
            vec![
                PassState::CheckingPermissions,
                PassState::AwaitingUserDecision,
                PassState::Denied
            ]
        );
        assert!(states.lock().last().copied().map(PassState::is_terminal).unwrap_or(false));
    }

    #[test]
    fn test_failed_enable_launch_reports_disabled() {
        let (negotiator, permissions, radio) = negotiator(false, true);
        permissions.granted.lock().insert(Permission::BLUETOOTH_SCAN);

        let outcome = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        negotiator.enable_radio(EnableRequest::default(), move |o| *slot.lock() = Some(o));

        assert_eq!(*outcome.lock(), Some(RadioOutcome::Disabled));
        assert_eq!(*radio.launches.lock(), 1);
        assert!(!negotiator.is_enable_request_pending());
    }

    #[test]
    fn test_status_derivation() {
        let (negotiator, permissions, _radio) = negotiator(true, false);
        assert_eq!(negotiator.status(&Permission::BLUETOOTH_SCAN), PermissionStatus::Denied);

        negotiator.inner.denials.mark_permanently_denied(&[Permission::BLUETOOTH_SCAN]);
        assert_eq!(negotiator.status(&Permission::BLUETOOTH_SCAN), PermissionStatus::PermanentlyDenied);

        permissions.granted.lock().insert(Permission::BLUETOOTH_SCAN);
        assert_eq!(negotiator.status(&Permission::BLUETOOTH_SCAN), PermissionStatus::Granted);
    }

    #[test]
    fn test_callbacks_route_each_outcome() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let callbacks = |hits: &Arc<Mutex<Vec<&'static str>>>| {
            let (a, b, c, d) = (hits.clone(), hits.clone(), hits.clone(), hits.clone());
            CapabilityCallbacks::new(move |_| a.lock().push("ready"))
                .on_permission_denied(move |_| b.lock().push("denied"))
                .on_ble_disabled(move || c.lock().push("disabled"))
                .on_feature_unavailable(move || d.lock().push("unavailable"))
        };

        callbacks(&hits).dispatch(Ok(AdapterInfo::new("Test", "hci0", "addr", true)));
        callbacks(&hits).dispatch(Err(CapabilityError::PermissionDenied(vec![])));
        callbacks(&hits).dispatch(Err(CapabilityError::RadioDisabled));
        callbacks(&hits).dispatch(Err(CapabilityError::FeatureUnavailable));

        assert_eq!(*hits.lock(), vec!["ready", "denied", "disabled", "unavailable"]);
    }

    #[test]
    fn test_capability_error_messages() {
        let err = CapabilityError::PermissionDenied(vec![Permission::BLUETOOTH_SCAN, Permission::BLUETOOTH_CONNECT]);
        assert_eq!(
            err.to_string(),
            "Permissions denied: android.permission.BLUETOOTH_SCAN, android.permission.BLUETOOTH_CONNECT"
        );
    }
}
