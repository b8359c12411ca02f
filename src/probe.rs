//! Caret introspection.
//!
//! [`CaretProbe`] walks the dependent queries of an [`IntrospectionLayer`]
//! (focused element, selected range, bounds for that range, and the element
//! frame as a fallback) and collapses every failure into "unavailable".

use crate::errors::ProbeError;
use crate::placement::Rect;
use std::ops::Range;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementRole {
    TextField,
    TextArea,
    /// Any other role, with the platform's own name for it.
    Other(String),
}

impl ElementRole {
    pub fn is_text_input(&self) -> bool {
        matches!(self, ElementRole::TextField | ElementRole::TextArea)
    }
}

/// The OS accessibility layer, one fallible query per attribute.
pub trait IntrospectionLayer: Send {
    type Element;

    fn focused_element(&self, pid: u32) -> Result<Self::Element, ProbeError>;

    fn role(&self, element: &Self::Element) -> Result<ElementRole, ProbeError>;

    fn selected_range(&self, element: &Self::Element) -> Result<Range<usize>, ProbeError>;

    fn bounds_for_range(&self, element: &Self::Element, range: Range<usize>) -> Result<Rect, ProbeError>;

    /// Screen position and size of the element itself.
    fn frame(&self, element: &Self::Element) -> Result<Rect, ProbeError>;
}

pub trait AccessibilityProbe: Send {
    /// Screen rectangle of the caret (or of the focused text input) in `pid`,
    /// `None` when the application cannot tell us.
    fn caret_rect(&self, pid: u32) -> Option<Rect>;
}

pub struct CaretProbe<L> {
    layer: L,
}

impl<L: IntrospectionLayer> CaretProbe<L> {
    pub fn new(layer: L) -> Self {
        Self { layer }
    }

    fn locate(&self, pid: u32) -> Result<Rect, ProbeError> {
        let element = self.layer.focused_element(pid)?;

        match self.selection_bounds(&element) {
            Ok(rect) => return Ok(rect),
            Err(e) => debug!(pid, reason = %e, "no caret bounds, trying element frame"),
        }

        let role = self.layer.role(&element)?;
        if !role.is_text_input() {
            let name = match role {
                ElementRole::Other(name) => name,
                other => format!("{:?}", other),
            };
            return Err(ProbeError::UnrecognizedRole(name));
        }
        self.layer.frame(&element)
    }

    fn selection_bounds(&self, element: &L::Element) -> Result<Rect, ProbeError> {
        let range = self.layer.selected_range(element)?;
        self.layer.bounds_for_range(element, range)
    }
}

impl<L: IntrospectionLayer> AccessibilityProbe for CaretProbe<L> {
    fn caret_rect(&self, pid: u32) -> Option<Rect> {
        match self.locate(pid) {
            Ok(rect) => Some(rect),
            Err(e) => {
                debug!(pid, reason = %e, "caret introspection unavailable");
                None
            }
        }
    }
}
