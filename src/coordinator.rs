//! The search coordinator: feeds observed input into the capture machine,
//! positions and drives the overlay, and runs replacements on selection.

use crate::capture::{CaptureMachine, CaptureState, Forward, OverlayUpdate, Step};
use crate::config::PreferencesSource;
use crate::keyboard_api::{FrontmostApplication, KeySource, ObservedKey};
use crate::overlay::{CandidateItem, CandidateOverlay};
use crate::placement::{overlay_origin, Point, ScreenGeometry};
use crate::probe::AccessibilityProbe;
use crate::replacement::{ReplacementEngine, ReplacementRequest};
use crate::EngineEvent;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Key-downs from the global observer or from the focused overlay.
pub trait KeyEventHandler {
    fn on_key_event(&mut self, observed: ObservedKey);
}

/// A candidate picked in the overlay.
pub trait SelectionHandler {
    fn on_candidate_selected(&mut self, item: CandidateItem);
}

/// The overlay closed itself (click outside, its own cancel).
pub trait DismissalHandler {
    fn on_overlay_dismissed(&mut self);
}

pub struct SearchCoordinator {
    machine: CaptureMachine,
    preferences: Arc<dyn PreferencesSource>,
    overlay: Box<dyn CandidateOverlay>,
    probe: Box<dyn AccessibilityProbe>,
    screen: Box<dyn ScreenGeometry>,
    engine: ReplacementEngine,
    frontmost: Option<FrontmostApplication>,
}

impl SearchCoordinator {
    pub fn new(
        preferences: Arc<dyn PreferencesSource>,
        overlay: Box<dyn CandidateOverlay>,
        probe: Box<dyn AccessibilityProbe>,
        screen: Box<dyn ScreenGeometry>,
        engine: ReplacementEngine,
    ) -> Self {
        Self {
            machine: CaptureMachine::new(),
            preferences,
            overlay,
            probe,
            screen,
            engine,
            frontmost: None,
        }
    }

    pub fn capture_state(&self) -> &CaptureState {
        self.machine.state()
    }

    pub fn frontmost(&self) -> Option<&FrontmostApplication> {
        self.frontmost.as_ref()
    }

    pub fn on_focus_changed(&mut self, app: FrontmostApplication) {
        if self.frontmost.as_ref() == Some(&app) {
            return;
        }
        info!(app = %app.id, pid = app.pid, "frontmost application changed");
        self.frontmost = Some(app);
        let step = self.machine.on_focus_changed();
        self.apply_overlay(step.overlay);
    }

    /// Handles one event; returns `false` once the loop should stop.
    pub fn handle_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Key(observed) => self.on_key_event(observed),
            EngineEvent::FocusChanged(app) => self.on_focus_changed(app),
            EngineEvent::CandidateSelected(item) => self.on_candidate_selected(item),
            EngineEvent::OverlayDismissed => self.on_overlay_dismissed(),
            EngineEvent::PreferencesReloaded => {
                let config = self.preferences.trigger_config();
                info!(trigger = %config.trigger, exceptions = config.exceptions.len(), "using new preferences");
            }
            EngineEvent::Quit => return false,
        }
        true
    }

    /// Serial dispatch loop. Returns when `Quit` arrives or every sender is gone.
    pub fn run(&mut self, receiver: &Receiver<EngineEvent>) {
        info!("event loop started");
        while let Ok(event) = receiver.recv() {
            if !self.handle_event(event) {
                break;
            }
        }
        if self.machine.is_capturing() {
            let step = self.machine.reset();
            self.apply_overlay(step.overlay);
        }
        info!("event loop stopped");
    }

    fn apply(&mut self, step: Step, observed: ObservedKey) {
        if step.forward == Forward::Replay && observed.source == KeySource::Overlay {
            self.replay(observed);
        }
        self.apply_overlay(step.overlay);
    }

    fn replay(&self, observed: ObservedKey) {
        let Some(app) = &self.frontmost else {
            warn!(key = ?observed.key, "no foreign application to replay into");
            return;
        };
        if let Err(e) = self.engine.injector().replay(app, observed.key) {
            warn!(app = %app.id, key = ?observed.key, error = %e, "Failed to replay keystroke");
        }
    }

    fn apply_overlay(&mut self, update: OverlayUpdate) {
        match update {
            OverlayUpdate::Unchanged => {}
            OverlayUpdate::Query(query) => self.show_query(&query),
            OverlayUpdate::Dismiss => self.dismiss(),
        }
    }

    fn show_query(&mut self, query: &str) {
        if !self.overlay.is_visible() {
            let origin = self.overlay_origin();
            debug!(x = origin.x, y = origin.y, "placing overlay");
            if let Err(e) = self.overlay.show_near(origin) {
                warn!(error = %e, "Failed to show overlay");
            }
        }
        if let Err(e) = self.overlay.set_query(query) {
            warn!(query, error = %e, "Failed to update overlay query");
        }
    }

    fn dismiss(&mut self) {
        if let Err(e) = self.overlay.hide() {
            warn!(error = %e, "Failed to hide overlay");
        }
    }

    fn overlay_origin(&self) -> Point {
        let caret = self.frontmost.as_ref().and_then(|app| self.probe.caret_rect(app.pid));
        let screen = self.screen.work_area(caret.map(|rect| rect.origin()));
        overlay_origin(caret, screen, &self.preferences.placement())
    }
}

impl KeyEventHandler for SearchCoordinator {
    fn on_key_event(&mut self, observed: ObservedKey) {
        let config = self.preferences.trigger_config();
        let app_id = self.frontmost.as_ref().map(|app| app.id.as_str());
        let step = self.machine.on_key(observed.key, app_id, &config);
        self.apply(step, observed);
    }
}

impl SelectionHandler for SearchCoordinator {
    fn on_candidate_selected(&mut self, item: CandidateItem) {
        let Some(keyword) = self.machine.keyword().map(str::to_owned) else {
            warn!(item = %item.display_text, "selection arrived outside a capture episode");
            return;
        };

        let request = ReplacementRequest::new(keyword, item.insert_text);
        let settings = self.preferences.replacement();
        if let Err(e) = self.engine.perform(&request, self.overlay.as_mut(), &settings) {
            error!(keyword = %request.typed_keyword, error = %e, "Replacement aborted, keyword left in place");
        }

        let step = self.machine.reset();
        self.apply_overlay(step.overlay);
    }
}

impl DismissalHandler for SearchCoordinator {
    fn on_overlay_dismissed(&mut self) {
        let step = self.machine.reset();
        self.apply_overlay(step.overlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::mock::MockClipboard;
    use crate::config::{ReplacementSettings, TriggerConfig};
    use crate::keyboard_api::mock::{InputAction, MockInjector};
    use crate::keyboard_api::Key;
    use crate::overlay::mock::{MockOverlay, OverlayAction};
    use crate::placement::{PlacementConfig, Rect};
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SCREEN: Rect = Rect { x: 0, y: 0, width: 1920, height: 1080 };

    struct TestPreferences {
        trigger: RwLock<TriggerConfig>,
    }

    impl PreferencesSource for TestPreferences {
        fn trigger_config(&self) -> TriggerConfig {
            self.trigger.read().clone()
        }

        fn placement(&self) -> PlacementConfig {
            PlacementConfig { width: 300, height: 200, caret_gap: 4 }
        }

        fn replacement(&self) -> ReplacementSettings {
            ReplacementSettings { paste_settle_ms: 0, key_delay_ms: 0, restore_clipboard: true }
        }
    }

    struct FixedProbe {
        rect: Option<Rect>,
        calls: Arc<AtomicUsize>,
    }

    impl AccessibilityProbe for FixedProbe {
        fn caret_rect(&self, _pid: u32) -> Option<Rect> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rect
        }
    }

    struct FixedScreen;

    impl ScreenGeometry for FixedScreen {
        fn work_area(&self, _near: Option<Point>) -> Rect {
            SCREEN
        }
    }

    struct Harness {
        coordinator: SearchCoordinator,
        overlay: MockOverlay,
        injector: MockInjector,
        clipboard: MockClipboard,
        probe_calls: Arc<AtomicUsize>,
    }

    fn harness(caret: Option<Rect>, config: TriggerConfig) -> Harness {
        let overlay = MockOverlay::new();
        let injector = MockInjector::new();
        let clipboard = MockClipboard::with_text("clipboard before");
        let probe_calls = Arc::new(AtomicUsize::new(0));

        let mut coordinator = SearchCoordinator::new(
            Arc::new(TestPreferences { trigger: RwLock::new(config) }),
            Box::new(overlay.clone()),
            Box::new(FixedProbe { rect: caret, calls: probe_calls.clone() }),
            Box::new(FixedScreen),
            ReplacementEngine::new(Box::new(injector.clone()), Box::new(clipboard.clone())),
        );
        coordinator.on_focus_changed(FrontmostApplication::new("notepad.exe", 1200, 0x1234));

        Harness { coordinator, overlay, injector, clipboard, probe_calls }
    }

    fn default_harness() -> Harness {
        harness(Some(Rect::new(500, 300, 2, 18)), TriggerConfig::default())
    }

    fn type_keys(h: &mut Harness, text: &str) {
        for c in text.chars() {
            h.coordinator.on_key_event(ObservedKey::global(Key::Char(c), 0));
        }
    }

    fn press(h: &mut Harness, key: Key) {
        h.coordinator.on_key_event(ObservedKey::global(key, 0));
    }

    #[test]
    fn test_plain_typing_never_touches_overlay() {
        let mut h = default_harness();
        type_keys(&mut h, "the quick brown fox; 42");
        press(&mut h, Key::Backspace);

        assert!(h.overlay.get_actions().is_empty());
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
        assert_eq!(h.probe_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_happy_selection_replaces_keyword() {
        let mut h = default_harness();
        type_keys(&mut h, ":happy");
        h.coordinator.on_candidate_selected(CandidateItem::new("happy ^_^", "^_^"));

        let actions = h.injector.get_actions();
        let paste_at = actions.iter().position(|a| *a == InputAction::Paste).unwrap();
        let backspaces_before = actions[..paste_at]
            .iter()
            .filter(|a| **a == InputAction::KeyDown(Key::Backspace))
            .count();
        assert_eq!(backspaces_before, 6);
        assert_eq!(h.injector.backspace_downs(), 6);

        assert_eq!(h.overlay.queries(), vec!["h", "ha", "hap", "happ", "happy"]);
        assert_eq!(h.overlay.count(&OverlayAction::ReleaseFocus), 1);
        assert_eq!(h.overlay.count(&OverlayAction::Hide), 1);
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
        assert_eq!(h.clipboard.content().as_deref(), Some("clipboard before"));
    }

    #[test]
    fn test_backspacing_out_hides_once() {
        let mut h = default_harness();
        type_keys(&mut h, ":abc");
        for _ in 0..3 {
            press(&mut h, Key::Backspace);
        }

        assert_eq!(h.overlay.count(&OverlayAction::Hide), 1);
        assert_eq!(h.overlay.queries(), vec!["a", "ab", "abc", "ab", "a"]);
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
    }

    #[test]
    fn test_focus_change_mid_capture_hides_once() {
        let mut h = default_harness();
        type_keys(&mut h, ":whatever");
        h.coordinator.on_focus_changed(FrontmostApplication::new("chrome.exe", 4400, 0x99));

        assert_eq!(h.overlay.count(&OverlayAction::Hide), 1);
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
        assert_eq!(h.coordinator.frontmost().map(|a| a.id.as_str()), Some("chrome.exe"));
    }

    #[test]
    fn test_repeated_focus_value_is_ignored() {
        let mut h = default_harness();
        type_keys(&mut h, ":ab");
        h.coordinator.on_focus_changed(FrontmostApplication::new("notepad.exe", 1200, 0x1234));

        assert_eq!(h.overlay.count(&OverlayAction::Hide), 0);
        assert!(matches!(h.coordinator.capture_state(), CaptureState::Capturing { .. }));
    }

    #[test]
    fn test_exempt_application_is_left_alone() {
        let mut config = TriggerConfig::default();
        config.exceptions.insert("notepad.exe".into(), "Notepad".into());
        let mut h = harness(None, config);

        type_keys(&mut h, ":happy");

        assert!(h.overlay.get_actions().is_empty());
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
    }

    #[test]
    fn test_overlay_flips_above_caret_near_bottom() {
        let caret = Rect::new(700, 1000, 2, 20);
        let mut h = harness(Some(caret), TriggerConfig::default());
        type_keys(&mut h, ":x");

        assert_eq!(h.overlay.shown_at(), vec![Point::new(700, 1000 - 4 - 200)]);
    }

    #[test]
    fn test_unavailable_caret_uses_centered_position() {
        let mut h = harness(None, TriggerConfig::default());
        type_keys(&mut h, ":x");

        assert_eq!(h.overlay.shown_at(), vec![Point::new(810, 440)]);
    }

    #[test]
    fn test_position_computed_once_per_episode() {
        let mut h = default_harness();
        type_keys(&mut h, ":abcdef");
        press(&mut h, Key::Backspace);

        assert_eq!(h.overlay.shown_at().len(), 1);
        assert_eq!(h.probe_calls.load(Ordering::SeqCst), 1);
        assert!(h.overlay.is_visible());

        press(&mut h, Key::Escape);
        assert!(!h.overlay.is_visible());
        type_keys(&mut h, ":q");
        assert_eq!(h.overlay.shown_at().len(), 2);
        assert_eq!(h.probe_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bare_trigger_does_not_show_overlay() {
        let mut h = default_harness();
        type_keys(&mut h, ":");

        assert!(h.overlay.get_actions().is_empty());
        assert_eq!(h.probe_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_keys_swallowed_by_overlay_are_replayed() {
        let mut h = default_harness();
        type_keys(&mut h, ":h");
        h.coordinator.on_key_event(ObservedKey::from_overlay(Key::Char('a')));
        h.coordinator.on_key_event(ObservedKey::from_overlay(Key::Backspace));

        assert_eq!(
            h.injector.get_actions(),
            vec![
                InputAction::Replay { app: "notepad.exe".into(), key: Key::Char('a') },
                InputAction::Replay { app: "notepad.exe".into(), key: Key::Backspace },
            ]
        );
    }

    #[test]
    fn test_global_keys_and_escape_are_not_replayed() {
        let mut h = default_harness();
        type_keys(&mut h, ":ha");
        h.coordinator.on_key_event(ObservedKey::from_overlay(Key::Escape));

        assert!(h.injector.get_actions().is_empty());
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
    }

    #[test]
    fn test_overlay_key_ending_capture_reaches_document() {
        let mut h = default_harness();
        type_keys(&mut h, ":ab");
        h.coordinator.on_key_event(ObservedKey::from_overlay(Key::Char(' ')));

        assert_eq!(
            h.injector.get_actions(),
            vec![InputAction::Replay { app: "notepad.exe".into(), key: Key::Char(' ') }]
        );
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
        assert_eq!(h.overlay.count(&OverlayAction::Hide), 1);
    }

    #[test]
    fn test_global_key_ending_capture_is_not_doubled() {
        let mut h = default_harness();
        type_keys(&mut h, ":ab");
        h.coordinator.on_key_event(ObservedKey::global(Key::Char('X'), 0));

        assert!(h.injector.get_actions().is_empty());
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
    }

    #[test]
    fn test_selection_outside_episode_is_ignored() {
        let mut h = default_harness();
        h.coordinator.on_candidate_selected(CandidateItem::new("x", "y"));

        assert!(h.injector.get_actions().is_empty());
        assert!(h.overlay.get_actions().is_empty());
    }

    #[test]
    fn test_failed_replacement_still_ends_episode() {
        let mut h = default_harness();
        type_keys(&mut h, ":tm");
        h.injector.set_fail_next(true);
        h.coordinator.on_candidate_selected(CandidateItem::new("trademark", "™"));

        assert!(!h.injector.get_actions().contains(&InputAction::Paste));
        assert_eq!(h.overlay.count(&OverlayAction::Hide), 1);
        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
        assert_eq!(h.clipboard.content().as_deref(), Some("clipboard before"));
    }

    #[test]
    fn test_overlay_dismissal_resets_capture() {
        let mut h = default_harness();
        type_keys(&mut h, ":ab");
        h.coordinator.on_overlay_dismissed();

        assert_eq!(h.coordinator.capture_state(), &CaptureState::Idle);
        type_keys(&mut h, "c");
        assert_eq!(h.overlay.queries(), vec!["a", "ab"]);
    }

    #[test]
    fn test_run_loop_processes_until_quit() {
        let mut h = default_harness();
        let (tx, rx) = crossbeam_channel::unbounded();
        for c in ":ok".chars() {
            tx.send(EngineEvent::Key(ObservedKey::global(Key::Char(c), 0))).unwrap();
        }
        tx.send(EngineEvent::Quit).unwrap();
        tx.send(EngineEvent::Key(ObservedKey::global(Key::Char('x'), 0))).unwrap();

        h.coordinator.run(&rx);

        assert_eq!(h.overlay.queries(), vec!["o", "ok"]);
        // shutting down mid-episode closes the overlay
        assert_eq!(h.overlay.count(&OverlayAction::Hide), 1);
        assert_eq!(rx.len(), 1);
    }
}
