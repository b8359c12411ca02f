//! Keyword capture state machine.
//!
//! Turns the stream of observed keystrokes into capture transitions plus two
//! decisions per key: what the overlay should do and whether the keystroke has
//! to be forwarded to the foreign application.

use crate::config::TriggerConfig;
use crate::keyboard_api::Key;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    /// Letters typed since the trigger, always lowercase ASCII.
    Capturing { buffer: String },
}

/// What the overlay collaborator should do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayUpdate {
    Unchanged,
    /// Show (if hidden) and filter with this non-empty keyword.
    Query(String),
    Dismiss,
}

/// Whether the keystroke must be re-delivered to the foreign application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    /// Nothing to do; the key already reached its destination or is UI-only.
    Untouched,
    /// The key belongs in the foreign document and goes through the injector
    /// if the overlay swallowed it.
    Replay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub forward: Forward,
    pub overlay: OverlayUpdate,
}

impl Step {
    fn ignored() -> Self {
        Self { forward: Forward::Untouched, overlay: OverlayUpdate::Unchanged }
    }

    fn new(forward: Forward, overlay: OverlayUpdate) -> Self {
        Self { forward, overlay }
    }
}

#[derive(Debug, Default)]
pub struct CaptureMachine {
    state: CaptureState,
}

impl CaptureMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Capturing { .. })
    }

    /// The keyword typed so far, `None` while idle.
    pub fn keyword(&self) -> Option<&str> {
        match &self.state {
            CaptureState::Capturing { buffer } => Some(buffer),
            CaptureState::Idle => None,
        }
    }

    pub fn on_key(&mut self, key: Key, app_id: Option<&str>, config: &TriggerConfig) -> Step {
        if app_id.is_some_and(|id| config.is_exempt(id)) {
            return Step::ignored();
        }

        let buffer = match &mut self.state {
            CaptureState::Idle => {
                if key == Key::Char(config.trigger) {
                    debug!(trigger = %config.trigger, "capture started");
                    self.state = CaptureState::Capturing { buffer: String::new() };
                }
                return Step::ignored();
            }
            CaptureState::Capturing { buffer } => buffer,
        };

        match key {
            Key::Char(c) if key.is_lowercase_letter() => {
                buffer.push(c);
                Step::new(Forward::Replay, OverlayUpdate::Query(buffer.clone()))
            }
            Key::Backspace => {
                if buffer.len() > 1 {
                    buffer.pop();
                    Step::new(Forward::Replay, OverlayUpdate::Query(buffer.clone()))
                } else {
                    // erased back past the trigger
                    Step::new(Forward::Replay, self.finish("erased"))
                }
            }
            Key::Escape => Step::new(Forward::Untouched, self.finish("escape")),
            // the key itself still belongs to the document
            _ => Step::new(Forward::Replay, self.finish("unrecognized key")),
        }
    }

    /// Capture never survives a focus switch.
    pub fn on_focus_changed(&mut self) -> Step {
        Step::new(Forward::Untouched, self.finish("focus changed"))
    }

    /// Ends the episode after a replacement or an overlay-side dismissal.
    pub fn reset(&mut self) -> Step {
        Step::new(Forward::Untouched, self.finish("reset"))
    }

    fn finish(&mut self, reason: &'static str) -> OverlayUpdate {
        match std::mem::take(&mut self.state) {
            CaptureState::Capturing { buffer } => {
                debug!(reason, keyword = %buffer, "capture ended");
                OverlayUpdate::Dismiss
            }
            CaptureState::Idle => OverlayUpdate::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> TriggerConfig {
        TriggerConfig { trigger: ':', exceptions: BTreeMap::new() }
    }

    fn type_str(machine: &mut CaptureMachine, text: &str, config: &TriggerConfig) -> Vec<Step> {
        text.chars()
            .map(|c| machine.on_key(Key::Char(c), Some("notepad.exe"), config))
            .collect()
    }

    fn dismissals(steps: &[Step]) -> usize {
        steps.iter().filter(|s| s.overlay == OverlayUpdate::Dismiss).count()
    }

    #[test]
    fn test_text_without_trigger_stays_idle() {
        let mut machine = CaptureMachine::new();
        let cfg = config();
        let mut steps = type_str(&mut machine, "hello world; a-b=c", &cfg);
        steps.push(machine.on_key(Key::Backspace, None, &cfg));
        steps.push(machine.on_key(Key::Escape, None, &cfg));
        steps.push(machine.on_key(Key::Other(0x0D), None, &cfg));

        assert_eq!(machine.state(), &CaptureState::Idle);
        assert!(steps.iter().all(|s| *s == Step::ignored()));
    }

    #[test]
    fn test_trigger_starts_capture_without_query() {
        let mut machine = CaptureMachine::new();
        let step = machine.on_key(Key::Char(':'), None, &config());

        assert_eq!(step, Step::ignored());
        assert_eq!(machine.keyword(), Some(""));
    }

    #[test]
    fn test_queries_are_prefixes_of_typed_letters() {
        let mut machine = CaptureMachine::new();
        let cfg = config();
        let steps = type_str(&mut machine, ":smile", &cfg);

        let queries: Vec<_> = steps
            .iter()
            .filter_map(|s| match &s.overlay {
                OverlayUpdate::Query(q) => Some(q.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(queries, vec!["s", "sm", "smi", "smil", "smile"]);
        assert!(steps[1..].iter().all(|s| s.forward == Forward::Replay));
    }

    #[test]
    fn test_three_backspaces_after_abc_dismiss_once() {
        let mut machine = CaptureMachine::new();
        let cfg = config();
        type_str(&mut machine, ":abc", &cfg);

        let steps: Vec<_> = (0..3).map(|_| machine.on_key(Key::Backspace, None, &cfg)).collect();

        assert_eq!(steps[0].overlay, OverlayUpdate::Query("ab".into()));
        assert_eq!(steps[1].overlay, OverlayUpdate::Query("a".into()));
        assert_eq!(dismissals(&steps), 1);
        assert_eq!(steps[2].overlay, OverlayUpdate::Dismiss);
        assert!(steps.iter().all(|s| s.forward == Forward::Replay));
        assert_eq!(machine.state(), &CaptureState::Idle);
        assert_eq!(machine.keyword(), None);
    }

    #[test]
    fn test_backspace_over_bare_trigger_returns_idle() {
        let mut machine = CaptureMachine::new();
        let cfg = config();
        machine.on_key(Key::Char(':'), None, &cfg);
        let step = machine.on_key(Key::Backspace, None, &cfg);

        assert_eq!(step.overlay, OverlayUpdate::Dismiss);
        assert!(!machine.is_capturing());
    }

    #[test]
    fn test_escape_cancels_without_forwarding() {
        let mut machine = CaptureMachine::new();
        let cfg = config();
        type_str(&mut machine, ":ok", &cfg);
        let step = machine.on_key(Key::Escape, None, &cfg);

        assert_eq!(step, Step::new(Forward::Untouched, OverlayUpdate::Dismiss));
        assert!(!machine.is_capturing());
    }

    #[test]
    fn test_unrecognized_keys_end_capture() {
        let cfg = config();
        for key in [Key::Char('A'), Key::Char('1'), Key::Char(' '), Key::Char(':'), Key::Other(0x25)] {
            let mut machine = CaptureMachine::new();
            type_str(&mut machine, ":ab", &cfg);
            let step = machine.on_key(key, None, &cfg);
            assert_eq!(step, Step::new(Forward::Replay, OverlayUpdate::Dismiss), "key {:?}", key);
            assert!(!machine.is_capturing());
        }
    }

    #[test]
    fn test_focus_change_forces_idle() {
        let mut machine = CaptureMachine::new();
        type_str(&mut machine, ":longword", &config());

        assert_eq!(machine.on_focus_changed().overlay, OverlayUpdate::Dismiss);
        assert_eq!(machine.state(), &CaptureState::Idle);
        // already idle, nothing to dismiss
        assert_eq!(machine.on_focus_changed().overlay, OverlayUpdate::Unchanged);
    }

    #[test]
    fn test_exempt_application_never_captures() {
        let mut machine = CaptureMachine::new();
        let mut cfg = config();
        cfg.exceptions.insert("code.exe".into(), "Visual Studio Code".into());

        for c in ":abc".chars() {
            let step = machine.on_key(Key::Char(c), Some("code.exe"), &cfg);
            assert_eq!(step, Step::ignored());
        }
        assert_eq!(machine.state(), &CaptureState::Idle);
    }

    #[test]
    fn test_custom_trigger_character() {
        let mut machine = CaptureMachine::new();
        let mut cfg = config();
        cfg.trigger = ';';

        machine.on_key(Key::Char(':'), None, &cfg);
        assert!(!machine.is_capturing());
        machine.on_key(Key::Char(';'), None, &cfg);
        assert!(machine.is_capturing());
    }

    #[test]
    fn test_capture_can_restart_after_reset() {
        let mut machine = CaptureMachine::new();
        let cfg = config();
        type_str(&mut machine, ":tm", &cfg);
        assert_eq!(machine.reset().overlay, OverlayUpdate::Dismiss);

        let steps = type_str(&mut machine, ":x", &cfg);
        assert_eq!(steps[1].overlay, OverlayUpdate::Query("x".into()));
    }
}
