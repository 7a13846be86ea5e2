//! Prompt strategies
//!
//! The negotiator never decides how a question is presented. Callers inject a
//! strategy per prompt slot; an empty slot means "act silently". Any
//! `Fn(PermissionToken)` / `Fn(InteractiveToken)` closure is a strategy, and
//! [`DialogPrompt`] renders the stock modal dialogs through a host
//! [`PromptSurface`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::token::{InteractiveToken, PermissionToken};

/// Strategy for the rationale and permanently-denied permission prompts
pub trait PermissionPrompt: Send + Sync {
    fn prompt(&self, token: PermissionToken);
}

/// Strategy for the radio-enable prompt
pub trait EnablePrompt: Send + Sync {
    fn prompt(&self, token: InteractiveToken);
}

impl<F> PermissionPrompt for F
where
    F: Fn(PermissionToken) + Send + Sync,
{
    fn prompt(&self, token: PermissionToken) {
        self(token)
    }
}

impl<F> EnablePrompt for F
where
    F: Fn(InteractiveToken) + Send + Sync,
{
    fn prompt(&self, token: InteractiveToken) {
        self(token)
    }
}

/// Modal dialog description handed to the host UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub title: String,
    pub message: String,
    /// Label of the button that resolves the token with `proceed`
    pub positive: String,
    /// Label of the button that resolves the token with `cancel`
    pub negative: String,
    pub cancelable: bool,
}

impl Dialog {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        positive: impl Into<String>,
        negative: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            positive: positive.into(),
            negative: negative.into(),
            cancelable: false,
        }
    }

    pub fn rationale() -> Self {
        Self::new(
            "Allow Bluetooth data transfer?",
            "This app exchanges data with your device over Bluetooth.",
            "Allow",
            "Deny",
        )
    }

    pub fn permanently_denied() -> Self {
        Self::new(
            "Permission required",
            "This app needs the Bluetooth scan and connect permissions to find and connect to your device. Grant them in Settings.",
            "Open settings",
            "Cancel",
        )
    }

    pub fn enable_radio() -> Self {
        Self::new(
            "Bluetooth is off",
            "Turn on Bluetooth to find and connect to your device.",
            "Turn on",
            "Cancel",
        )
    }
}

/// Host UI able to show a modal dialog
///
/// The surface must eventually resolve the token with exactly one of
/// `proceed` (positive button) or `cancel` (negative button / dismissal).
pub trait PromptSurface: Send + Sync {
    fn show(&self, dialog: Dialog, token: InteractiveToken);
}

/// Prompt strategy rendering a fixed [`Dialog`] on a [`PromptSurface`]
#[derive(Clone)]
pub struct DialogPrompt {
    surface: Arc<dyn PromptSurface>,
    dialog: Dialog,
}

impl DialogPrompt {
    pub fn new(surface: Arc<dyn PromptSurface>, dialog: Dialog) -> Self {
        Self { surface, dialog }
    }

    /// Default "why we need Bluetooth" prompt shown before re-requesting
    pub fn rationale(surface: Arc<dyn PromptSurface>) -> Self {
        Self::new(surface, Dialog::rationale())
    }

    /// Default settings-redirect prompt for permanently denied permissions
    pub fn permanently_denied(surface: Arc<dyn PromptSurface>) -> Self {
        Self::new(surface, Dialog::permanently_denied())
    }

    /// Default "turn Bluetooth on" prompt
    pub fn enable_radio(surface: Arc<dyn PromptSurface>) -> Self {
        Self::new(surface, Dialog::enable_radio())
    }

    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }
}

impl PermissionPrompt for DialogPrompt {
    fn prompt(&self, token: PermissionToken) {
        tracing::debug!("Showing '{}' for {:?}", self.dialog.title, token.permissions());
        self.surface.show(self.dialog.clone(), token.into_token());
    }
}

impl EnablePrompt for DialogPrompt {
    fn prompt(&self, token: InteractiveToken) {
        tracing::debug!("Showing '{}'", self.dialog.title);
        self.surface.show(self.dialog.clone(), token);
    }
}

impl std::fmt::Debug for DialogPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogPrompt").field("dialog", &self.dialog).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permission;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSurface {
        shown: Mutex<Vec<Dialog>>,
    }

    impl PromptSurface for RecordingSurface {
        fn show(&self, dialog: Dialog, token: InteractiveToken) {
            self.shown.lock().push(dialog);
            token.proceed();
        }
    }

    #[test]
    fn test_dialog_prompt_renders_on_surface() {
        let surface = Arc::new(RecordingSurface::default());
        let prompt = DialogPrompt::enable_radio(surface.clone());

        let proceeded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&proceeded);
        EnablePrompt::prompt(&prompt, InteractiveToken::new(move || flag.store(true, Ordering::SeqCst), || {}));

        assert!(proceeded.load(Ordering::SeqCst));
        assert_eq!(surface.shown.lock()[0], Dialog::enable_radio());
        assert!(!surface.shown.lock()[0].cancelable);
    }

    #[test]
    fn test_closures_are_strategies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let strategy = move |token: PermissionToken| {
            sink.lock().extend(token.permissions().to_vec());
            token.cancel();
        };

        let prompt: Arc<dyn PermissionPrompt> = Arc::new(strategy);
        prompt.prompt(PermissionToken::new(
            vec![Permission::BLUETOOTH_SCAN],
            InteractiveToken::new(|| {}, || {}),
        ));
        assert_eq!(*seen.lock(), vec![Permission::BLUETOOTH_SCAN]);
    }
}
