// src/errors.rs
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum InputError {
    #[error("Failed to install input observer: {0}")]
    HookError(String),

    #[error("Synthetic input was rejected: {0}")]
    InjectError(String),
}

#[derive(Debug, Error, Clone)]
pub enum ClipboardError {
    #[error("Clipboard is not available: {0}")]
    Unavailable(String),
    #[error("Failed to read clipboard: {0}")]
    Read(String),
    #[error("Failed to write clipboard: {0}")]
    Write(String),
}

/// Reasons a caret introspection query came back empty. These are routine and
/// never leave the probe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("process {0} denied introspection")]
    AccessDenied(u32),
    #[error("no focused element")]
    NoFocusedElement,
    #[error("focused element has no selected range")]
    NoSelectedRange,
    #[error("selected range has no bounds")]
    NoBoundsForRange,
    #[error("focused element has no frame")]
    NoFrame,
    #[error("focused element role {0:?} is not a text input")]
    UnrecognizedRole(String),
    #[error("introspection call failed: {0}")]
    System(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse preferences: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Could not find a configuration directory")]
    ConfigDirectoryNotFound,
    #[error("Failed to create configuration directory: {source}")]
    CreateConfigDir { source: std::io::Error },
    #[error("Failed to read preferences at {path}: {source}")]
    ReadConfig { path: PathBuf, source: std::io::Error },
    #[error("Failed to write preferences at {path}: {source}")]
    WriteConfig { path: PathBuf, source: std::io::Error },
    #[error("Failed to watch preferences: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Error)]
pub enum ReplacementError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
    #[error("Overlay did not release focus: {0}")]
    Overlay(String),
}

#[derive(Debug, Error)]
pub enum SnipError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
    #[error(transparent)]
    Replacement(#[from] ReplacementError),
    #[error("IPC communication failed: {0}")]
    Ipc(String),
    #[error("I/O error: {source}")]
    Io { #[from] source: std::io::Error },
    #[error("Serde JSON error: {source}")]
    SerdeJson { #[from] source: serde_json::Error },
    #[error("No platform backend is available on this system")]
    UnsupportedPlatform,
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

// Global Result type alias
pub type Result<T> = std::result::Result<T, SnipError>;
