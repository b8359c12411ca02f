//! System clipboard access with save/restore semantics.

use crate::errors::ClipboardError;
use arboard::Clipboard;
use tracing::{debug, warn};

/// Text held by the clipboard before we borrowed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    text: Option<String>,
    non_text: bool,
}

impl ClipboardSnapshot {
    /// `None` when the clipboard held no text.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// True when the clipboard held something other than text, which
    /// restoring cannot bring back.
    pub fn loses_content(&self) -> bool {
        self.text.is_none() && self.non_text
    }
}

pub trait ClipboardBridge: Send {
    fn get_text(&self) -> Result<Option<String>, ClipboardError>;

    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;

    fn clear(&self) -> Result<(), ClipboardError>;

    /// Whether the clipboard holds data that is not text, such as an image.
    fn holds_non_text(&self) -> bool {
        false
    }

    fn save(&self) -> Result<ClipboardSnapshot, ClipboardError> {
        let text = self.get_text()?;
        let non_text = text.is_none() && self.holds_non_text();
        if non_text {
            warn!("Clipboard holds non-text content that will not be restored after the replacement");
        }
        Ok(ClipboardSnapshot { text, non_text })
    }

    /// Puts the saved text back, or empties the clipboard if there was none.
    fn restore(&self, snapshot: ClipboardSnapshot) -> Result<(), ClipboardError> {
        match snapshot.text {
            Some(text) => self.set_text(&text),
            None => self.clear(),
        }
    }
}

/// The OS clipboard. A handle is opened per operation so no platform handle
/// outlives the call that needed it.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }

    fn open() -> Result<Clipboard, ClipboardError> {
        Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
}

impl ClipboardBridge for SystemClipboard {
    fn get_text(&self) -> Result<Option<String>, ClipboardError> {
        match Self::open()?.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => {
                debug!("clipboard holds no text");
                Ok(None)
            }
            Err(e) => Err(ClipboardError::Read(e.to_string())),
        }
    }

    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        Self::open()?
            .set_text(text.to_owned())
            .map_err(|e| ClipboardError::Write(e.to_string()))
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        Self::open()?.clear().map_err(|e| ClipboardError::Write(e.to_string()))
    }

    /// Only images are detected; file lists read as an empty clipboard.
    fn holds_non_text(&self) -> bool {
        Self::open().map(|mut clipboard| clipboard.get_image().is_ok()).unwrap_or(false)
    }
}
