//! Two-outcome continuations handed to UI prompts
//!
//! A token resolves exactly once. The first call to [`InteractiveToken::proceed`]
//! or [`InteractiveToken::cancel`] runs the matching continuation; later calls
//! are no-ops that return `false`. A token dropped without being resolved is
//! resolved as `cancel`, so a prompt that disappears cannot leave a
//! negotiation pass waiting forever.

use parking_lot::Mutex;

use super::Permission;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

struct Continuations {
    proceed: Continuation,
    cancel: Continuation,
}

/// Proceed/cancel continuation for a single prompt
pub struct InteractiveToken {
    continuations: Mutex<Option<Continuations>>,
}

impl InteractiveToken {
    pub fn new<P, C>(on_proceed: P, on_cancel: C) -> Self
    where
        P: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self {
            continuations: Mutex::new(Some(Continuations {
                proceed: Box::new(on_proceed),
                cancel: Box::new(on_cancel),
            })),
        }
    }

    /// Accept the prompt. Returns `false` if the token was already resolved.
    pub fn proceed(&self) -> bool {
        self.resolve(true)
    }

    /// Decline the prompt. Returns `false` if the token was already resolved.
    pub fn cancel(&self) -> bool {
        self.resolve(false)
    }

    pub fn is_resolved(&self) -> bool {
        self.continuations.lock().is_none()
    }

    fn resolve(&self, proceed: bool) -> bool {
        // The guard must be released before running user code: a continuation
        // may inspect this token again.
        let continuations = self.continuations.lock().take();
        match continuations {
            Some(c) => {
                if proceed {
                    (c.proceed)();
                } else {
                    (c.cancel)();
                }
                true
            }
            None => {
                tracing::debug!("Interactive token already resolved, ignoring {}", if proceed { "proceed" } else { "cancel" });
                false
            }
        }
    }
}

impl Drop for InteractiveToken {
    fn drop(&mut self) {
        if let Some(c) = self.continuations.get_mut().take() {
            tracing::warn!("Interactive token dropped without a decision, treating as cancel");
            (c.cancel)();
        }
    }
}

impl std::fmt::Debug for InteractiveToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveToken")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Token for a permission prompt, carrying the permissions it is about
#[derive(Debug)]
pub struct PermissionToken {
    permissions: Vec<Permission>,
    token: InteractiveToken,
}

impl PermissionToken {
    pub fn new(permissions: Vec<Permission>, token: InteractiveToken) -> Self {
        Self { permissions, token }
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn proceed(&self) -> bool {
        self.token.proceed()
    }

    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    pub fn is_resolved(&self) -> bool {
        self.token.is_resolved()
    }

    pub fn into_token(self) -> InteractiveToken {
        self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_token() -> (InteractiveToken, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let proceeded = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&proceeded);
        let c = Arc::clone(&cancelled);
        let token = InteractiveToken::new(
            move || {
                p.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );
        (token, proceeded, cancelled)
    }

    #[test]
    fn test_token_resolves_once() {
        let (token, proceeded, cancelled) = counting_token();

        assert!(token.proceed());
        assert!(!token.proceed());
        assert!(!token.cancel());
        assert!(token.is_resolved());

        drop(token);
        assert_eq!(proceeded.load(Ordering::SeqCst), 1);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_token_cancels() {
        let (token, proceeded, cancelled) = counting_token();
        drop(token);

        assert_eq!(proceeded.load(Ordering::SeqCst), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_permission_token_exposes_permissions() {
        let (token, _, cancelled) = counting_token();
        let token = PermissionToken::new(vec![Permission::BLUETOOTH_SCAN], token);

        assert_eq!(token.permissions(), &[Permission::BLUETOOTH_SCAN]);
        assert!(token.cancel());
        assert!(!token.proceed());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
