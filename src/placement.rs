//! Screen geometry and the overlay placement policy.
//!
//! Coordinates are physical screen pixels with the origin at the top-left of
//! the primary display and `y` growing downward.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new(left, top, right.saturating_sub(left), bottom.saturating_sub(top))
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }
}

/// Largest accepted panel edge, in pixels.
pub const MAX_OVERLAY_EDGE: i32 = 4096;

/// Largest accepted distance between caret and panel, in pixels.
pub const MAX_CARET_GAP: i32 = 256;

/// Size and spacing of the picker panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub width: i32,
    pub height: i32,
    /// Vertical distance between the caret and the panel edge.
    pub caret_gap: i32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            caret_gap: 4,
        }
    }
}

/// Work area of the display that should host the overlay.
pub trait ScreenGeometry: Send {
    /// Returns the work area of the display containing `near`, or of the
    /// primary display when `near` is `None`.
    fn work_area(&self, near: Option<Point>) -> Rect;
}

/// Computes the top-left corner of the overlay for one capture episode.
///
/// With a caret rectangle the panel goes just below it, or just above it when
/// below would cross the bottom of the screen. Without one it is centered on
/// the screen.
pub fn overlay_origin(caret: Option<Rect>, screen: Rect, config: &PlacementConfig) -> Point {
    let Some(caret) = caret else {
        return centered(screen, config);
    };

    let below = caret.bottom().saturating_add(config.caret_gap);
    let y = if below.saturating_add(config.height) > screen.bottom() {
        caret.y.saturating_sub(config.caret_gap).saturating_sub(config.height)
    } else {
        below
    };

    Point::new(clamp_x(caret.x, screen, config), y.max(screen.y))
}

fn centered(screen: Rect, config: &PlacementConfig) -> Point {
    Point::new(
        screen.x.saturating_add(screen.width.saturating_sub(config.width) / 2),
        screen.y.saturating_add(screen.height.saturating_sub(config.height) / 2),
    )
}

fn clamp_x(x: i32, screen: Rect, config: &PlacementConfig) -> i32 {
    let max_x = screen.right().saturating_sub(config.width);
    if max_x < screen.x {
        return screen.x;
    }
    x.clamp(screen.x, max_x)
}
