//! External libraries and library readiness
//!
//! A workspace's library configuration (chapter, external library, host
//! globals) is what every context reset is built from. Host globals travel
//! inside the configuration into context creation; nothing here touches a
//! process-wide namespace.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExternalLibraryName {
    #[default]
    None,
    Runes,
    Curves,
    Sound,
}

impl ExternalLibraryName {
    /// Symbols the library makes visible inside the engine
    pub fn symbols(&self) -> Vec<String> {
        let names: &[&str] = match self {
            ExternalLibraryName::None => &[],
            ExternalLibraryName::Runes => &[
                "show", "beside", "stack", "flip_horiz", "flip_vert", "quarter_turn_left",
                "quarter_turn_right", "turn_upside_down", "heart", "nova", "circle", "square",
                "blank", "rcross", "sail", "corner", "ribbon",
            ],
            ExternalLibraryName::Curves => &[
                "make_point", "x_of", "y_of", "draw_connected", "draw_points_on",
                "draw_connected_squeezed_to_window", "draw_connected_full_view", "unit_circle",
                "unit_line", "alternative_unit_circle", "arc", "translate", "rotate_around_origin",
            ],
            ExternalLibraryName::Sound => &[
                "make_sound", "get_wave", "get_duration", "play", "stop", "sine_sound",
                "silence_sound", "consecutively", "simultaneously", "adsr",
            ],
        };
        names.iter().map(|name| name.to_string()).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalLibraryName::None => "NONE",
            ExternalLibraryName::Runes => "RUNES",
            ExternalLibraryName::Curves => "CURVES",
            ExternalLibraryName::Sound => "SOUND",
        }
    }
}

impl fmt::Display for ExternalLibraryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown external library: {0}")]
pub struct UnknownLibrary(String);

impl FromStr for ExternalLibraryName {
    type Err = UnknownLibrary;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(ExternalLibraryName::None),
            "RUNES" => Ok(ExternalLibraryName::Runes),
            "CURVES" => Ok(ExternalLibraryName::Curves),
            "SOUND" => Ok(ExternalLibraryName::Sound),
            _ => Err(UnknownLibrary(s.to_string())),
        }
    }
}

/// External library name plus the symbols it exposes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLibrary {
    pub name: ExternalLibraryName,
    pub symbols: Vec<String>,
}

impl ExternalLibrary {
    pub fn named(name: ExternalLibraryName) -> Self {
        Self {
            name,
            symbols: name.symbols(),
        }
    }
}

/// Everything a context reset is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub chapter: u8,
    pub external: ExternalLibrary,
    pub globals: Vec<(String, JsonValue)>,
}

impl LibraryConfig {
    pub fn new(chapter: u8) -> Self {
        Self {
            chapter,
            external: ExternalLibrary::default(),
            globals: Vec::new(),
        }
    }
}

/* ===================== Loading ===================== */

/// Host-side loader for external libraries
pub trait LibraryLoader: Send + Sync {
    /// Whether the host finished loading its library scripts
    fn is_ready(&self) -> bool {
        true
    }

    /// Prepare host resources for a library before a context is built for it
    fn load(&self, _library: ExternalLibraryName) {}
}

/// Loader for libraries compiled into the host; always ready
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledLibraries;

impl LibraryLoader for BundledLibraries {}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("external libraries not ready after {}ms", waited.as_millis())]
pub struct LibraryLoadTimeout {
    pub waited: Duration,
}

/// Poll the loader until it reports readiness or the timeout elapses
pub async fn wait_until_ready(
    loader: &dyn LibraryLoader,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<(), LibraryLoadTimeout> {
    let poll = async {
        while !loader.is_ready() {
            tokio::time::sleep(poll_interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| LibraryLoadTimeout { waited: timeout })
}
