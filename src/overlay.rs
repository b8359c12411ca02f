//! Boundary to the candidate picker.
//!
//! The picker renders and filters candidates in its own process. The daemon
//! drives it with [`OverlayCommand`]s and receives [`OverlayEvent`]s back.

use crate::keyboard_api::{Key, ObservedKey};
use crate::placement::Point;
use crate::{ipc, EngineEvent, Result, SnipError};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One row of the picker. Only `insert_text` matters to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub display_text: String,
    pub insert_text: String,
}

impl CandidateItem {
    pub fn new(display_text: impl Into<String>, insert_text: impl Into<String>) -> Self {
        Self { display_text: display_text.into(), insert_text: insert_text.into() }
    }
}

pub trait CandidateOverlay: Send {
    fn show_near(&mut self, origin: Point) -> Result<()>;

    fn hide(&mut self) -> Result<()>;

    fn set_query(&mut self, query: &str) -> Result<()>;

    fn is_visible(&self) -> bool;

    /// Hands keyboard focus back to whatever was focused before the overlay.
    fn release_focus(&mut self) -> Result<()>;
}

/// Daemon → picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OverlayCommand {
    ShowNear { x: i32, y: i32 },
    Hide,
    SetQuery { query: String },
    ReleaseFocus,
}

/// Picker → daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OverlayEvent {
    /// A key typed while the picker held keyboard focus.
    KeyPressed { key: Key },
    CandidateSelected { item: CandidateItem },
    Dismissed,
}

impl From<OverlayEvent> for EngineEvent {
    fn from(event: OverlayEvent) -> Self {
        match event {
            OverlayEvent::KeyPressed { key } => EngineEvent::Key(ObservedKey::from_overlay(key)),
            OverlayEvent::CandidateSelected { item } => EngineEvent::CandidateSelected(item),
            OverlayEvent::Dismissed => EngineEvent::OverlayDismissed,
        }
    }
}

/// Overlay living in the picker process, reached over IPC.
pub struct IpcOverlay {
    pipe_name: String,
    visible: bool,
}

impl IpcOverlay {
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self { pipe_name: pipe_name.into(), visible: false }
    }

    fn send(&self, command: &OverlayCommand) -> Result<()> {
        debug!(?command, "overlay command");
        ipc::send_message(&self.pipe_name, command)
    }
}

impl CandidateOverlay for IpcOverlay {
    fn show_near(&mut self, origin: Point) -> Result<()> {
        self.send(&OverlayCommand::ShowNear { x: origin.x, y: origin.y })?;
        self.visible = true;
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        // an unreachable picker is not showing anything either
        self.visible = false;
        self.send(&OverlayCommand::Hide)
    }

    fn set_query(&mut self, query: &str) -> Result<()> {
        self.send(&OverlayCommand::SetQuery { query: query.to_string() })
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn release_focus(&mut self) -> Result<()> {
        self.send(&OverlayCommand::ReleaseFocus)
    }
}

/// Forwards picker events onto the engine bus, one event per message.
pub fn listen_for_overlay_events(pipe_name: &str, bus: Sender<EngineEvent>) -> Result<()> {
    ipc::listen(pipe_name, move |event: OverlayEvent| {
        bus.send(event.into())
            .map_err(|e| SnipError::Ipc(format!("engine bus closed: {}", e)))
    })
}
