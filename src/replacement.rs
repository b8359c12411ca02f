//! Replacing the typed keyword inside the foreign application.
//!
//! The engine has no access to the foreign document, so it erases the keyword
//! with synthetic backspaces and pastes the replacement through the clipboard.

use crate::clipboard::{ClipboardBridge, ClipboardSnapshot};
use crate::config::ReplacementSettings;
use crate::errors::ReplacementError;
use crate::keyboard_api::SyntheticInputInjector;
use crate::overlay::CandidateOverlay;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRequest {
    /// Letters typed after the trigger, without the trigger itself.
    pub typed_keyword: String,
    pub replacement_text: String,
}

impl ReplacementRequest {
    pub fn new(typed_keyword: impl Into<String>, replacement_text: impl Into<String>) -> Self {
        Self { typed_keyword: typed_keyword.into(), replacement_text: replacement_text.into() }
    }

    /// Characters to erase: the keyword plus the trigger character.
    pub fn erase_count(&self) -> usize {
        self.typed_keyword.chars().count() + 1
    }
}

pub struct ReplacementEngine {
    injector: Box<dyn SyntheticInputInjector>,
    clipboard: Box<dyn ClipboardBridge>,
}

impl ReplacementEngine {
    pub fn new(injector: Box<dyn SyntheticInputInjector>, clipboard: Box<dyn ClipboardBridge>) -> Self {
        Self { injector, clipboard }
    }

    pub fn injector(&self) -> &dyn SyntheticInputInjector {
        self.injector.as_ref()
    }

    /// Runs the whole sequence. The clipboard is prepared before anything is
    /// sent to the foreign application, so a failure up to the paste leaves
    /// the typed keyword in the document. A paste that fails after the erase
    /// cannot be undone and is reported as degraded.
    pub fn perform(
        &self,
        request: &ReplacementRequest,
        overlay: &mut dyn CandidateOverlay,
        settings: &ReplacementSettings,
    ) -> Result<(), ReplacementError> {
        debug!(keyword = %request.typed_keyword, "starting replacement");

        overlay
            .release_focus()
            .map_err(|e| ReplacementError::Overlay(e.to_string()))?;

        let saved = if settings.restore_clipboard {
            Some(self.clipboard.save()?)
        } else {
            None
        };
        if let Err(e) = self.clipboard.set_text(&request.replacement_text) {
            self.put_back(saved);
            return Err(e.into());
        }

        if let Err(e) = self.injector.erase(request.erase_count(), settings.key_delay_ms) {
            self.put_back(saved);
            return Err(e.into());
        }

        if let Err(e) = self.injector.paste() {
            error!(
                keyword = %request.typed_keyword,
                error = %e,
                "Paste failed after the keyword was erased"
            );
            // the replacement text must not linger on the user's clipboard
            self.put_back(saved);
            return Err(e.into());
        }

        thread::sleep(Duration::from_millis(settings.paste_settle_ms));
        match saved {
            Some(snapshot) => self.clipboard.restore(snapshot)?,
            None => self.clipboard.clear()?,
        }

        info!(
            keyword = %request.typed_keyword,
            replacement_len = request.replacement_text.chars().count(),
            "replacement completed"
        );
        Ok(())
    }

    fn put_back(&self, saved: Option<ClipboardSnapshot>) {
        let result = match saved {
            Some(snapshot) => self.clipboard.restore(snapshot),
            None => self.clipboard.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to restore clipboard after aborted replacement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::mock::MockClipboard;
    use crate::keyboard_api::mock::{InputAction, MockInjector};
    use crate::keyboard_api::Key;
    use crate::overlay::mock::{MockOverlay, OverlayAction};

    fn settings() -> ReplacementSettings {
        ReplacementSettings { paste_settle_ms: 0, key_delay_ms: 0, restore_clipboard: true }
    }

    fn engine(injector: &MockInjector, clipboard: &MockClipboard) -> ReplacementEngine {
        ReplacementEngine::new(Box::new(injector.clone()), Box::new(clipboard.clone()))
    }

    #[test]
    fn test_erase_count_includes_trigger() {
        assert_eq!(ReplacementRequest::new("happy", "^_^").erase_count(), 6);
        assert_eq!(ReplacementRequest::new("", "x").erase_count(), 1);
    }

    #[test]
    fn test_happy_sends_six_backspaces_then_paste() {
        let injector = MockInjector::new();
        let clipboard = MockClipboard::with_text("previous");
        let mut overlay = MockOverlay::new();

        engine(&injector, &clipboard)
            .perform(&ReplacementRequest::new("happy", "^_^"), &mut overlay, &settings())
            .unwrap();

        let actions = injector.get_actions();
        assert_eq!(actions.len(), 13);
        assert_eq!(injector.backspace_downs(), 6);
        for pair in actions[..12].chunks(2) {
            assert_eq!(pair, [InputAction::KeyDown(Key::Backspace), InputAction::KeyUp(Key::Backspace)]);
        }
        assert_eq!(actions[12], InputAction::Paste);
        assert_eq!(overlay.get_actions(), vec![OverlayAction::ReleaseFocus]);
    }

    #[test]
    fn test_clipboard_is_restored_after_paste() {
        let injector = MockInjector::new();
        let clipboard = MockClipboard::with_text("previous");
        let mut overlay = MockOverlay::new();

        engine(&injector, &clipboard)
            .perform(&ReplacementRequest::new("arrow", "→"), &mut overlay, &settings())
            .unwrap();

        assert_eq!(
            clipboard.history(),
            vec![Some("→".to_string()), Some("previous".to_string())]
        );
        assert_eq!(clipboard.content().as_deref(), Some("previous"));
    }

    #[test]
    fn test_without_restore_the_clipboard_is_cleared() {
        let injector = MockInjector::new();
        let clipboard = MockClipboard::with_text("previous");
        let mut overlay = MockOverlay::new();
        let settings = ReplacementSettings { restore_clipboard: false, ..settings() };

        engine(&injector, &clipboard)
            .perform(&ReplacementRequest::new("arrow", "→"), &mut overlay, &settings)
            .unwrap();

        assert_eq!(clipboard.content(), None);
    }

    #[test]
    fn test_failed_backspace_puts_clipboard_back() {
        let injector = MockInjector::new();
        injector.set_fail_next(true);
        let clipboard = MockClipboard::with_text("keep me");
        let mut overlay = MockOverlay::new();

        let result = engine(&injector, &clipboard).perform(
            &ReplacementRequest::new("tm", "™"),
            &mut overlay,
            &settings(),
        );

        assert!(matches!(result, Err(ReplacementError::Input(_))));
        assert!(injector.get_actions().is_empty());
        assert_eq!(clipboard.history(), vec![Some("™".to_string()), Some("keep me".to_string())]);
        assert_eq!(clipboard.content().as_deref(), Some("keep me"));
    }

    #[test]
    fn test_failed_clipboard_write_leaves_keyword_in_place() {
        let injector = MockInjector::new();
        let clipboard = MockClipboard::with_text("keep me");
        clipboard.set_fail_writes(true);
        let mut overlay = MockOverlay::new();

        let result = engine(&injector, &clipboard).perform(
            &ReplacementRequest::new("happy", "^_^"),
            &mut overlay,
            &settings(),
        );

        assert!(matches!(result, Err(ReplacementError::Clipboard(_))));
        assert_eq!(injector.backspace_downs(), 0);
        assert!(injector.get_actions().is_empty());
        assert_eq!(clipboard.content().as_deref(), Some("keep me"));
    }

    #[test]
    fn test_failed_paste_puts_clipboard_back() {
        let injector = MockInjector::new();
        injector.set_fail_paste(true);
        let clipboard = MockClipboard::with_text("keep me");
        let mut overlay = MockOverlay::new();

        let result = engine(&injector, &clipboard).perform(
            &ReplacementRequest::new("tm", "™"),
            &mut overlay,
            &settings(),
        );

        assert!(result.is_err());
        assert_eq!(injector.backspace_downs(), 3);
        assert_eq!(clipboard.content().as_deref(), Some("keep me"));
    }
}
