//! Preferences store: trigger character, per-application exceptions, overlay
//! placement and replacement timing, persisted as TOML.

use crate::errors::ConfigError;
use crate::placement::{PlacementConfig, MAX_CARET_GAP, MAX_OVERLAY_EDGE};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const CONFIG_DIR_NAME: &str = "snipkey";
pub const CONFIG_FILE_NAME: &str = "preferences.toml";
pub const DEFAULT_TRIGGER: char = ':';

/// Read-only snapshot the capture machine consults on every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConfig {
    pub trigger: char,
    /// Application identifier to display name.
    pub exceptions: BTreeMap<String, String>,
}

impl TriggerConfig {
    pub fn is_exempt(&self, app_id: &str) -> bool {
        self.exceptions.contains_key(app_id)
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self { trigger: DEFAULT_TRIGGER, exceptions: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplacementSettings {
    /// How long the pasted text owns the clipboard before it is restored.
    pub paste_settle_ms: u64,
    /// Pause between synthetic backspaces.
    pub key_delay_ms: u64,
    pub restore_clipboard: bool,
}

impl Default for ReplacementSettings {
    fn default() -> Self {
        Self { paste_settle_ms: 150, key_delay_ms: 0, restore_clipboard: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub trigger: String,
    pub exceptions: BTreeMap<String, String>,
    pub overlay: PlacementConfig,
    pub replacement: ReplacementSettings,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            trigger: DEFAULT_TRIGGER.to_string(),
            exceptions: BTreeMap::new(),
            overlay: PlacementConfig::default(),
            replacement: ReplacementSettings::default(),
        }
    }
}

impl Preferences {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let prefs: Preferences = toml::from_str(input)?;
        prefs.validate()?;
        Ok(prefs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_trigger(&self.trigger)?;
        if let Some(id) = self.exceptions.keys().find(|id| id.trim().is_empty()) {
            return Err(ConfigError::Validation(format!("empty application identifier {:?}", id)));
        }
        let edges = 1..=MAX_OVERLAY_EDGE;
        if !edges.contains(&self.overlay.width) || !edges.contains(&self.overlay.height) {
            return Err(ConfigError::Validation(format!(
                "overlay size must be between 1 and {} pixels, got {}x{}",
                MAX_OVERLAY_EDGE, self.overlay.width, self.overlay.height
            )));
        }
        if !(0..=MAX_CARET_GAP).contains(&self.overlay.caret_gap) {
            return Err(ConfigError::Validation(format!(
                "overlay caret_gap must be between 0 and {} pixels, got {}",
                MAX_CARET_GAP, self.overlay.caret_gap
            )));
        }
        Ok(())
    }

    pub fn trigger_char(&self) -> char {
        self.trigger.chars().next().unwrap_or(DEFAULT_TRIGGER)
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig { trigger: self.trigger_char(), exceptions: self.exceptions.clone() }
    }
}

fn validate_trigger(trigger: &str) -> Result<char, ConfigError> {
    let mut chars = trigger.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return Err(ConfigError::Validation(format!(
            "trigger must be exactly one character, got {:?}",
            trigger
        )));
    };
    if c.is_whitespace() || c.is_control() {
        return Err(ConfigError::Validation("trigger cannot be whitespace".into()));
    }
    if c.is_ascii_lowercase() {
        return Err(ConfigError::Validation(format!(
            "trigger {:?} would be swallowed by the keyword itself",
            c
        )));
    }
    Ok(c)
}

/// What the coordinator needs from the preferences collaborator.
pub trait PreferencesSource: Send + Sync {
    fn trigger_config(&self) -> TriggerConfig;

    fn placement(&self) -> PlacementConfig;

    fn replacement(&self) -> ReplacementSettings;
}

/// File-backed preferences shared between the event loop, the watcher and the CLI.
#[derive(Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    current: Arc<RwLock<Preferences>>,
}

impl PreferenceStore {
    /// Opens the store at `path`, writing the default file first if it is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            create_default_config(&path)?;
        }
        let prefs = load_preferences(&path)?;
        Ok(Self { path, current: Arc::new(RwLock::new(prefs)) })
    }

    /// Opens the default location; a broken file is logged and replaced by
    /// in-memory defaults so the daemon can still start.
    pub fn open_default() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        match Self::open(&path) {
            Ok(store) => Ok(store),
            Err(e @ (ConfigError::Parse(_) | ConfigError::Validation(_))) => {
                warn!(path = %path.display(), error = %e, "Preferences invalid, using defaults");
                Ok(Self { path, current: Arc::new(RwLock::new(Preferences::default())) })
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Preferences {
        self.current.read().clone()
    }

    /// Re-reads the file. The previous preferences stay active if it is invalid.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let prefs = load_preferences(&self.path)?;
        *self.current.write() = prefs;
        info!(path = %self.path.display(), "Preferences reloaded");
        Ok(())
    }

    pub fn set_trigger(&self, trigger: &str) -> Result<(), ConfigError> {
        validate_trigger(trigger)?;
        self.update(|prefs| prefs.trigger = trigger.to_string())
    }

    pub fn add_exception(&self, app_id: &str, display_name: &str) -> Result<(), ConfigError> {
        if app_id.trim().is_empty() {
            return Err(ConfigError::Validation("application identifier cannot be empty".into()));
        }
        self.update(|prefs| {
            prefs.exceptions.insert(app_id.to_string(), display_name.to_string());
        })
    }

    /// Returns whether the identifier was present.
    pub fn remove_exception(&self, app_id: &str) -> Result<bool, ConfigError> {
        let mut removed = false;
        self.update(|prefs| removed = prefs.exceptions.remove(app_id).is_some())?;
        Ok(removed)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.write_file(&self.current.read())
    }

    /// Memory only changes once the edited preferences are on disk.
    fn update(&self, change: impl FnOnce(&mut Preferences)) -> Result<(), ConfigError> {
        let mut current = self.current.write();
        let mut next = current.clone();
        change(&mut next);
        self.write_file(&next)?;
        *current = next;
        Ok(())
    }

    fn write_file(&self, prefs: &Preferences) -> Result<(), ConfigError> {
        let serialized = toml::to_string_pretty(prefs)?;
        fs::write(&self.path, serialized)
            .map_err(|source| ConfigError::WriteConfig { path: self.path.clone(), source })
    }

    /// Reloads the store whenever the preferences file changes, then calls
    /// `on_reload`. The returned watcher must be kept alive.
    pub fn watch<F>(&self, on_reload: F) -> Result<RecommendedWatcher, ConfigError>
    where
        F: Fn() + Send + 'static,
    {
        let store = self.clone();
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| CONFIG_FILE_NAME.into());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    if !event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
                        return;
                    }
                    debug!(?event, "Preferences watcher event");
                    match store.reload() {
                        Ok(()) => on_reload(),
                        Err(e) => error!(error = %e, "Failed to reload preferences, keeping previous"),
                    }
                }
                Err(e) => error!(error = ?e, "Preferences watcher error"),
            }
        })?;

        let dir = self.path.parent().ok_or(ConfigError::ConfigDirectoryNotFound)?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "Watching preferences directory");
        Ok(watcher)
    }
}

impl PreferencesSource for PreferenceStore {
    fn trigger_config(&self) -> TriggerConfig {
        self.current.read().trigger_config()
    }

    fn placement(&self) -> PlacementConfig {
        self.current.read().overlay
    }

    fn replacement(&self) -> ReplacementSettings {
        self.current.read().replacement
    }
}

pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirectoryNotFound)?
        .join(CONFIG_DIR_NAME);
    fs::create_dir_all(&config_dir).map_err(|source| ConfigError::CreateConfigDir { source })?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::CreateConfigDir { source })?;
    }
    fs::write(path, DEFAULT_PREFERENCES)
        .map_err(|source| ConfigError::WriteConfig { path: path.to_path_buf(), source })
}

pub fn load_preferences(path: &Path) -> Result<Preferences, ConfigError> {
    let content = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadConfig { path: path.to_path_buf(), source })?;
    Preferences::parse(&content)
}

const DEFAULT_PREFERENCES: &str = r#"# snipkey preferences
#
# Type the trigger followed by a few letters anywhere, pick a symbol from the
# list and it replaces what you typed.

trigger = ":"

# Applications where typing the trigger does nothing.
# executable name = display name
[exceptions]
# "Code.exe" = "Visual Studio Code"

[overlay]
width = 320
height = 240
caret_gap = 4

[replacement]
paste_settle_ms = 150
key_delay_ms = 0
restore_clipboard = true
"#;
