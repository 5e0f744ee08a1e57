//! Document Automation Driver — the seam between the form pipeline and whatever
//! actually drives the browser.
//!
//! The pipeline only ever talks to `dyn DocumentDriver`. Production uses the
//! W3C WebDriver client in `webdriver`; tests use the in-memory `fake`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
pub mod fake;
pub mod webdriver;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Session could not be acquired: {0}")]
    SessionUnavailable(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element is stale or no longer attached: {0}")]
    StaleElement(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("Option '{0}' not available")]
    OptionNotFound(String),

    #[error("Driver protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Opaque reference to one element in the current document or frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub String);

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A nested frame of the top-level document, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    pub index: usize,
    pub name: Option<String>,
}

/// Where a control lives: the top-level document or one nested frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPath {
    pub frame: Option<FrameRef>,
}

impl ContainerPath {
    pub fn top() -> Self {
        Self { frame: None }
    }

    pub fn frame(frame: FrameRef) -> Self {
        Self { frame: Some(frame) }
    }
}

impl std::fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.frame {
            None => f.write_str("top"),
            Some(frame) => write!(f, "frame[{}]", frame.index),
        }
    }
}

/// Rendered size of an element in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementSize {
    pub width: f64,
    pub height: f64,
}

/// Structural / textual element queries understood by every driver.
///
/// Relative criteria (`PrecedingLabel`, `PrecedingText`, `Options`) are
/// evaluated against the `scope` passed to `find_all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criteria {
    /// Native `<select>` list controls.
    NativeSelects,
    /// Single-line text inputs and textareas.
    TextEntries,
    /// `input[role=combobox]` style type-ahead controls.
    Comboboxes,
    /// Checkbox inputs.
    Checkboxes,
    /// Radio inputs.
    Radios,
    /// File inputs.
    FileInputs,
    /// Clickable containers that may be custom dropdown widgets.
    Clickables,
    /// Any interactive form control (inputs, selects, textareas).
    FormControls,
    /// `<label for=...>` elements bound to the given element id.
    LabelFor(String),
    /// The nearest `<label>` preceding the scope element in document order.
    PrecedingLabel,
    /// Text-bearing elements preceding the scope element, nearest first.
    PrecedingText,
    /// Element with the given id.
    ById(String),
    /// Options of the scope `<select>`, or visible listbox options when unscoped.
    Options,
    /// `button[type=submit]`, `input[type=submit]`.
    SubmitControls,
    /// Buttons or links whose visible text contains the given text.
    ButtonsWithText(String),
    /// Any visible element whose text contains the given text.
    TextContaining(String),
    /// Error-styled validation messages.
    ValidationMessages,
}

/// Primitive operations the form pipeline needs from a browser.
///
/// One instance is one exclusive session. Frame-scoped calls operate on the
/// frame last selected with `enter_frame`.
#[async_trait]
pub trait DocumentDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Nested frames of the top-level document, in document order.
    async fn frames(&self) -> Result<Vec<FrameRef>, DriverError>;

    /// Switches to a nested frame, or back to the top-level document on `None`.
    async fn enter_frame(&self, frame: Option<&FrameRef>) -> Result<(), DriverError>;

    async fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        criteria: &Criteria,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    async fn text(&self, element: &ElementHandle) -> Result<String, DriverError>;

    async fn attr(&self, element: &ElementHandle, name: &str)
        -> Result<Option<String>, DriverError>;

    /// Current value of an input, the selected option label of a select, or
    /// `"true"` / `""` for a checked / unchecked checkbox.
    async fn value(&self, element: &ElementHandle) -> Result<String, DriverError>;

    async fn size(&self, element: &ElementHandle) -> Result<ElementSize, DriverError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), DriverError>;

    async fn select_option(&self, element: &ElementHandle, label: &str)
        -> Result<(), DriverError>;

    async fn upload(&self, element: &ElementHandle, path: &std::path::Path)
        -> Result<(), DriverError>;

    /// PNG screenshot of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    /// Releases the underlying browser session.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Hands out one exclusive driver session per automation attempt.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn DocumentDriver>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_path_display() {
        assert_eq!(ContainerPath::top().to_string(), "top");
        let path = ContainerPath::frame(FrameRef {
            index: 2,
            name: Some("grnhse_iframe".to_string()),
        });
        assert_eq!(path.to_string(), "frame[2]");
    }
}
