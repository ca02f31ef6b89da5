//! Default configuration values.

use crate::backend::Mode;
use crate::buffer::Color;

use super::types::HeadlessOutputConfig;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "NOVA_COMPOSITOR_CONFIG";

pub const CONFIG_FILE_NAME: &str = "config.toml";

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "text".to_string()
}

pub fn default_clear_color() -> Color {
    Color::RED
}

pub fn default_output_width() -> u32 {
    1920
}

pub fn default_output_height() -> u32 {
    1080
}

pub fn default_headless_outputs() -> Vec<HeadlessOutputConfig> {
    vec![HeadlessOutputConfig {
        name: "HEADLESS-1".to_string(),
        modes: vec![Mode::new(1280, 720, 60_000), Mode::new(1920, 1080, 60_000)],
        width: default_output_width(),
        height: default_output_height(),
        reject_modes: false,
    }]
}
