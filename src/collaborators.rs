//! Presentation-side collaborators consumed by the coordinator
//!
//! Notifications are fire-and-forget. Visual debugging aids are optional: a
//! missing inspector or environment visualizer reports
//! [`VisualizerUnavailable`], which callers swallow.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{Context, Location};
use crate::types::LineRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Success,
    Warning,
}

/// Transient user-facing message sink
pub trait Notifier: Send + Sync {
    fn show_message(&self, text: &str, duration: Duration, kind: MessageKind);
}

/// Forwards messages to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_message(&self, text: &str, duration: Duration, kind: MessageKind) {
        let duration_ms = duration.as_millis() as u64;
        match kind {
            MessageKind::Success => info!(duration_ms, "{}", text),
            MessageKind::Warning => warn!(duration_ms, "{}", text),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum VisualizerUnavailable {
    #[error("inspector not loaded")]
    Inspector,
    #[error("environment visualizer not enabled")]
    EnvVisualizer,
}

/// Optional inspector and environment visualizer.
///
/// The default methods behave as if nothing is loaded.
pub trait Visualizer: Send + Sync {
    /// Highlight editor lines, or clear the highlight with `None`
    fn highlight_lines(&self, _range: Option<LineRange>) -> Result<(), VisualizerUnavailable> {
        Err(VisualizerUnavailable::Inspector)
    }

    /// Show a context in the inspector, or reset it with `None`
    fn update_context(&self, _context: Option<&Context>) -> Result<(), VisualizerUnavailable> {
        Err(VisualizerUnavailable::Inspector)
    }

    fn draw_environment(
        &self,
        _context: &Context,
        _location: Option<&Location>,
    ) -> Result<(), VisualizerUnavailable> {
        Err(VisualizerUnavailable::EnvVisualizer)
    }
}

/// No inspector, no environment visualizer
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVisualizer;

impl Visualizer for NoVisualizer {}
