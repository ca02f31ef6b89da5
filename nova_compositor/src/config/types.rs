//! Configuration data structures.
//!
//! Every struct denies unknown fields and falls back to [`super::defaults`]
//! for missing ones, so an empty file yields [`CompositorConfig::default`].

use std::path::PathBuf;

use serde::Deserialize;

use super::defaults;
use crate::backend::Mode;
use crate::buffer::Color;
use crate::output::ModePolicy;

/// Settings for the logging subsystem.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of "trace", "debug", "info", "warn", "error" (case-insensitive).
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Optional log file. Relative paths are resolved against the user data
    /// directory.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// "text" or "json".
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::default_log_level(),
            file_path: None,
            format: defaults::default_log_format(),
        }
    }
}

/// Settings for the frame pipeline and output configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    /// Color every frame is cleared to, as `[r, g, b, a]`.
    #[serde(default = "defaults::default_clear_color")]
    pub clear_color: Color,
    /// How a mode is picked from an output's mode list.
    #[serde(default)]
    pub mode_policy: ModePolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: defaults::default_clear_color(),
            mode_policy: ModePolicy::default(),
        }
    }
}

/// One virtual output created by the headless backend at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadlessOutputConfig {
    pub name: String,
    /// Advertised modes, in the order the backend reports them.
    #[serde(default)]
    pub modes: Vec<Mode>,
    /// Size used while no mode is applied.
    #[serde(default = "defaults::default_output_width")]
    pub width: u32,
    #[serde(default = "defaults::default_output_height")]
    pub height: u32,
    /// Make every mode change fail. Useful to exercise unconfigured outputs.
    #[serde(default)]
    pub reject_modes: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadlessConfig {
    #[serde(default = "defaults::default_headless_outputs")]
    pub outputs: Vec<HeadlessOutputConfig>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            outputs: defaults::default_headless_outputs(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositorConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub headless: HeadlessConfig,
    /// Stop the compositor after this many milliseconds. Runs until a
    /// termination signal when unset.
    #[serde(default)]
    pub run_for_ms: Option<u64>,
}
