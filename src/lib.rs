//! Snipkey - trigger capture and in-place replacement
//!
//! Watches system-wide typing for a trigger character followed by letters,
//! drives a candidate picker near the caret, and swaps the typed keyword for the
//! chosen text inside whatever application has focus.

pub mod capture;
pub mod clipboard;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod ipc;
pub mod keyboard_api;
pub mod overlay;
pub mod placement;
pub mod platform;
pub mod probe;
pub mod replacement;

pub use capture::{CaptureMachine, CaptureState};
pub use clipboard::{ClipboardBridge, SystemClipboard};
pub use config::{PreferenceStore, Preferences, PreferencesSource, TriggerConfig};
pub use coordinator::SearchCoordinator;
pub use errors::{ClipboardError, ConfigError, InputError, ProbeError, ReplacementError, Result, SnipError};
pub use keyboard_api::{FrontmostApplication, InputObserver, Key, KeySource, ObservedKey, SyntheticInputInjector};
pub use overlay::{CandidateItem, CandidateOverlay, IpcOverlay};
pub use placement::{Point, Rect};
pub use probe::{AccessibilityProbe, CaretProbe};
pub use replacement::{ReplacementEngine, ReplacementRequest};

#[cfg(windows)]
pub const DAEMON_PIPE_NAME: &str = r"\\.\pipe\snipkey-daemon";
#[cfg(windows)]
pub const OVERLAY_PIPE_NAME: &str = r"\\.\pipe\snipkey-overlay";
#[cfg(not(windows))]
pub const DAEMON_PIPE_NAME: &str = "@snipkey-daemon";
#[cfg(not(windows))]
pub const OVERLAY_PIPE_NAME: &str = "@snipkey-overlay";

pub const SERVICE_NAME: &str = "snipkey";

/// Everything the engine reacts to, funnelled through one channel so events are
/// handled strictly one at a time.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Key(ObservedKey),
    FocusChanged(FrontmostApplication),
    CandidateSelected(CandidateItem),
    OverlayDismissed,
    PreferencesReloaded,
    Quit,
}
