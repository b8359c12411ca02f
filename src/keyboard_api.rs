//! Keyboard observation and synthetic input abstractions.
//! Platform backends implement these traits; the engine only talks to the traits.

use crate::errors::InputError;
use crate::{EngineEvent, Result};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// A key-down as the engine sees it, after the backend has translated the raw
/// platform event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Char(char),
    Backspace,
    Escape,
    /// Anything else, carrying the raw platform key code.
    Other(u32),
}

impl Key {
    pub fn is_lowercase_letter(&self) -> bool {
        matches!(self, Key::Char(c) if c.is_ascii_lowercase())
    }
}

/// Where a keystroke was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySource {
    /// Passive system-wide observer; the foreign application already got the key.
    Global,
    /// The overlay held keyboard focus and handed the key to us; the foreign
    /// application never saw it.
    Overlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedKey {
    pub key: Key,
    pub key_code: u32,
    pub source: KeySource,
}

impl ObservedKey {
    pub fn global(key: Key, key_code: u32) -> Self {
        Self { key, key_code, source: KeySource::Global }
    }

    pub fn from_overlay(key: Key) -> Self {
        let key_code = match key {
            Key::Other(code) => code,
            _ => 0,
        };
        Self { key, key_code, source: KeySource::Overlay }
    }
}

/// The process that currently holds input focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontmostApplication {
    /// Stable identifier used for exemptions, e.g. the executable name.
    pub id: String,
    pub pid: u32,
    /// Raw top-level window handle, 0 when the backend has none.
    pub window: usize,
}

impl FrontmostApplication {
    pub fn new(id: impl Into<String>, pid: u32, window: usize) -> Self {
        Self { id: id.into(), pid, window }
    }
}

/// Passive, non-consuming subscription to system-wide key-downs and focus changes.
pub trait InputObserver: Send {
    /// Start delivering `EngineEvent::Key` and `EngineEvent::FocusChanged` on `bus`.
    fn start(&mut self, bus: Sender<EngineEvent>) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Posts synthetic keyboard input into the global input stream.
pub trait SyntheticInputInjector: Send {
    fn key_down(&self, key: Key) -> std::result::Result<(), InputError>;

    fn key_up(&self, key: Key) -> std::result::Result<(), InputError>;

    /// Sends the platform paste shortcut to the focused application.
    fn paste(&self) -> std::result::Result<(), InputError>;

    /// Re-delivers a keystroke the overlay swallowed to the foreign application.
    fn replay(&self, app: &FrontmostApplication, key: Key) -> std::result::Result<(), InputError>;

    /// Sends `count` backspaces, each a key-down followed by its key-up.
    fn erase(&self, count: usize, delay_ms: u64) -> std::result::Result<(), InputError> {
        for _ in 0..count {
            self.key_down(Key::Backspace)?;
            self.key_up(Key::Backspace)?;
            if delay_ms > 0 {
                thread::sleep(Duration::from_millis(delay_ms));
            }
        }
        Ok(())
    }
}
