//! Native input, focus and caret backends.
//!
//! Only Windows is implemented. Elsewhere [`native_backend`] reports
//! [`SnipError::UnsupportedPlatform`] and the daemon refuses to start.

use crate::keyboard_api::{InputObserver, SyntheticInputInjector};
use crate::placement::ScreenGeometry;
use crate::probe::AccessibilityProbe;
use crate::Result;

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use self::windows::{MonitorGeometry, Win32Introspection, WindowsInjector, WindowsInputObserver};

/// Executable of the candidate picker. Its windows never count as a focus
/// change and keys typed into it arrive through the picker itself.
pub const PICKER_EXECUTABLE: &str = "snipkey-picker.exe";

/// Everything the daemon needs from the operating system.
pub struct Backend {
    pub observer: Box<dyn InputObserver>,
    pub injector: Box<dyn SyntheticInputInjector>,
    pub probe: Box<dyn AccessibilityProbe>,
    pub screen: Box<dyn ScreenGeometry>,
}

#[cfg(windows)]
pub fn native_backend() -> Result<Backend> {
    use crate::probe::CaretProbe;

    let mut ignored = vec![PICKER_EXECUTABLE.to_string()];
    if let Some(own) = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
    {
        ignored.push(own);
    }

    Ok(Backend {
        observer: Box::new(WindowsInputObserver::new(ignored)),
        injector: Box::new(WindowsInjector::new()),
        probe: Box::new(CaretProbe::new(Win32Introspection::new())),
        screen: Box::new(MonitorGeometry),
    })
}

#[cfg(not(windows))]
pub fn native_backend() -> Result<Backend> {
    Err(crate::SnipError::UnsupportedPlatform)
}
