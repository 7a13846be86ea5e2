//! One-shot listener registry for OS-mediated results
//!
//! Each pending-operation kind (radio enable, permission request) owns one
//! [`CallbackRegistry`]. A listener fires at most once: [`CallbackRegistry::dispatch`]
//! takes the listener set captured at dispatch start, clears it, and invokes
//! the captured listeners in registration order. Listeners registered while a
//! dispatch is running wait for the next result.
//!
//! The registry also tracks whether an OS request of its kind is in flight, so
//! concurrent callers coalesce onto one request instead of launching duplicates.

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};

/// Kind of asynchronous OS operation a registry serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    RadioEnable,
    PermissionRequest,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::RadioEnable => f.write_str("radio-enable"),
            OperationKind::PermissionRequest => f.write_str("permission-request"),
        }
    }
}

/// Handle of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    kind: OperationKind,
    id: u64,
}

impl ListenerHandle {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

/// Result of attaching to a pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub handle: ListenerHandle,
    /// `true` if no request of this kind was in flight: the caller must
    /// launch the OS request. `false` means the listener joined a pending one.
    pub launch: bool,
}

type Listener<T> = Box<dyn FnOnce(T) + Send + 'static>;

struct Slots<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
    in_flight: bool,
}

/// Per-kind registry of one-shot result listeners
pub struct CallbackRegistry<T> {
    kind: OperationKind,
    slots: Mutex<Slots<T>>,
    // Serializes dispatches of this kind across threads. Reentrant so that a
    // listener whose continuation synchronously triggers another result of
    // the same kind does not deadlock.
    dispatching: ReentrantMutex<()>,
}

impl<T: Clone + Send + 'static> CallbackRegistry<T> {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            slots: Mutex::new(Slots {
                next_id: 0,
                listeners: Vec::new(),
                in_flight: false,
            }),
            dispatching: ReentrantMutex::new(()),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Register a listener without touching the in-flight state
    pub fn register<F>(&self, listener: F) -> ListenerHandle
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let handle = self.push(&mut slots, Box::new(listener));
        tracing::debug!("Registered {} listener #{} ({} waiting)", self.kind, handle.id, slots.listeners.len());
        handle
    }

    /// Register a listener and claim the in-flight slot if it is free
    pub fn attach<F>(&self, listener: F) -> Attachment
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let handle = self.push(&mut slots, Box::new(listener));
        let launch = !slots.in_flight;
        slots.in_flight = true;
        tracing::debug!(
            "Attached {} listener #{} ({}, {} waiting)",
            self.kind,
            handle.id,
            if launch { "launching request" } else { "joining pending request" },
            slots.listeners.len()
        );
        Attachment { handle, launch }
    }

    fn push(&self, slots: &mut Slots<T>, listener: Listener<T>) -> ListenerHandle {
        let id = slots.next_id;
        slots.next_id += 1;
        slots.listeners.push((id, listener));
        ListenerHandle { kind: self.kind, id }
    }

    /// Remove a listener that has not fired yet. Returns `false` if it
    /// already fired or was removed.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        if handle.kind != self.kind {
            return false;
        }
        let mut slots = self.slots.lock();
        let before = slots.listeners.len();
        slots.listeners.retain(|(id, _)| *id != handle.id);
        let removed = slots.listeners.len() != before;
        if removed {
            tracing::debug!("Unregistered {} listener #{}", self.kind, handle.id);
        }
        removed
    }

    /// Deliver a result to every listener registered at dispatch start
    ///
    /// Clears the in-flight flag and the captured listener set before any
    /// listener runs. Returns the number of listeners notified.
    pub fn dispatch(&self, result: T) -> usize {
        let _serial = self.dispatching.lock();

        let captured = {
            let mut slots = self.slots.lock();
            slots.in_flight = false;
            std::mem::take(&mut slots.listeners)
        };

        if captured.is_empty() {
            tracing::debug!("{} result arrived with no listeners waiting", self.kind);
            return 0;
        }

        let count = captured.len();
        tracing::debug!("Dispatching {} result to {} listener(s)", self.kind, count);
        for (_, listener) in captured {
            listener(result.clone());
        }
        count
    }

    pub fn is_in_flight(&self) -> bool {
        self.slots.lock().in_flight
    }

    pub fn pending_listeners(&self) -> usize {
        self.slots.lock().listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_in_registration_order_then_clear() {
        let registry = CallbackRegistry::<u32>::new(OperationKind::RadioEnable);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.register(move |value| seen.lock().push((tag, value)));
        }

        assert_eq!(registry.dispatch(7), 3);
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7), ("third", 7)]);

        // Listeners are one-shot
        assert_eq!(registry.dispatch(8), 0);
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_empty_dispatch_is_noop() {
        let registry = CallbackRegistry::<bool>::new(OperationKind::PermissionRequest);
        assert_eq!(registry.dispatch(true), 0);
        assert!(!registry.is_in_flight());
    }

    #[test]
    fn test_listener_registered_during_dispatch_waits_for_next_result() {
        let registry = Arc::new(CallbackRegistry::<u32>::new(OperationKind::RadioEnable));
        let late_calls = Arc::new(Mutex::new(Vec::new()));

        let reg = Arc::clone(&registry);
        let late = Arc::clone(&late_calls);
        registry.register(move |_| {
            let late = Arc::clone(&late);
            reg.register(move |value| late.lock().push(value));
        });

        assert_eq!(registry.dispatch(1), 1);
        assert!(late_calls.lock().is_empty());
        assert_eq!(registry.pending_listeners(), 1);

        assert_eq!(registry.dispatch(2), 1);
        assert_eq!(*late_calls.lock(), vec![2]);
    }

    #[test]
    fn test_attach_coalesces_onto_pending_request() {
        let registry = CallbackRegistry::<bool>::new(OperationKind::RadioEnable);

        let first = registry.attach(|_| {});
        let second = registry.attach(|_| {});
        assert!(first.launch);
        assert!(!second.launch);
        assert!(registry.is_in_flight());

        assert_eq!(registry.dispatch(true), 2);
        assert!(!registry.is_in_flight());

        let third = registry.attach(|_| {});
        assert!(third.launch);
    }

    #[test]
    fn test_unregister_removes_only_that_listener() {
        let registry = CallbackRegistry::<u32>::new(OperationKind::PermissionRequest);
        let fired = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let fired = Arc::clone(&fired);
            registry.register(move |_| fired.lock().push("a"))
        };
        {
            let fired = Arc::clone(&fired);
            registry.register(move |_| fired.lock().push("b"));
        }

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        registry.dispatch(0);
        assert_eq!(*fired.lock(), vec!["b"]);
    }

    #[test]
    fn test_nested_dispatch_of_same_kind_does_not_deadlock() {
        let registry = Arc::new(CallbackRegistry::<u32>::new(OperationKind::PermissionRequest));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reg = Arc::clone(&registry);
        let s = Arc::clone(&seen);
        registry.register(move |value| {
            s.lock().push(value);
            let s = Arc::clone(&s);
            reg.register(move |value| s.lock().push(value));
            reg.dispatch(value + 1);
        });

        registry.dispatch(10);
        assert_eq!(*seen.lock(), vec![10, 11]);
    }
}
