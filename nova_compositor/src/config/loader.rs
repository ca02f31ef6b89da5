//! Configuration loading for the Nova compositor.
//!
//! [`ConfigLoader::load`] looks for the configuration file in this order:
//!
//! 1. the path passed on the command line;
//! 2. the path named by `$NOVA_COMPOSITOR_CONFIG`;
//! 3. `config.toml` in the user configuration directory.
//!
//! A file named explicitly (1 or 2) must exist. A missing user configuration
//! file yields the default configuration. Every loaded configuration is
//! validated before it is returned.

use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories_next::ProjectDirs;
use tracing::debug;

use super::defaults::{CONFIG_FILE_NAME, CONFIG_PATH_ENV};
use super::types::CompositorConfig;
use crate::buffer::MAX_DIMENSION;
use crate::error::ConfigError;

/// Where a configuration file path came from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSource {
    /// Named by the user. Must exist.
    Explicit(PathBuf),
    /// The per-user default location. May be absent.
    UserDefault(PathBuf),
}

/// Namespace for configuration loading and validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates the compositor configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotFound`] if an explicitly named file does not exist.
    /// - [`ConfigError::Read`] for any other I/O failure.
    /// - [`ConfigError::Parse`] if the file is not valid for the schema.
    /// - [`ConfigError::Validation`] if a value is out of range.
    pub fn load(explicit: Option<&Path>) -> Result<CompositorConfig, ConfigError> {
        let source = Self::locate(explicit, env::var_os(CONFIG_PATH_ENV), project_dirs().as_ref());
        match source {
            Some(ConfigSource::Explicit(path)) => Self::load_file(&path),
            Some(ConfigSource::UserDefault(path)) => match Self::load_file(&path) {
                Err(ConfigError::NotFound { .. }) => {
                    debug!(path = %path.display(), "No user configuration file, using defaults");
                    Self::from_str("")
                }
                other => other,
            },
            None => {
                debug!("No configuration directory available, using defaults");
                Self::from_str("")
            }
        }
    }

    /// Parses and validates a configuration document.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<CompositorConfig, ConfigError> {
        let mut config: CompositorConfig = toml::from_str(content)?;
        Self::validate_config(&mut config)?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<CompositorConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_str(&content)
    }

    fn locate(
        explicit: Option<&Path>,
        env_value: Option<OsString>,
        dirs: Option<&ProjectDirs>,
    ) -> Option<ConfigSource> {
        if let Some(path) = explicit {
            return Some(ConfigSource::Explicit(path.to_path_buf()));
        }
        if let Some(value) = env_value.filter(|value| !value.is_empty()) {
            return Some(ConfigSource::Explicit(PathBuf::from(value)));
        }
        dirs.map(|dirs| ConfigSource::UserDefault(dirs.config_dir().join(CONFIG_FILE_NAME)))
    }

    /// Validates `config` in place, normalizing case-insensitive values and
    /// resolving a relative log file path against the user data directory.
    fn validate_config(config: &mut CompositorConfig) -> Result<(), ConfigError> {
        let level = config.logging.level.to_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => config.logging.level = level,
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Invalid log level: '{}'. Must be one of trace, debug, info, warn, error.",
                    config.logging.level
                )))
            }
        }

        let format = config.logging.format.to_lowercase();
        match format.as_str() {
            "text" | "json" => config.logging.format = format,
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Invalid log format: '{}'. Must be one of text, json.",
                    config.logging.format
                )))
            }
        }

        if let Some(path) = config.logging.file_path.as_ref().filter(|path| path.is_relative()) {
            let dirs = project_dirs().ok_or_else(|| {
                ConfigError::Validation(
                    "Cannot resolve a relative log file path: no user data directory".to_string(),
                )
            })?;
            config.logging.file_path = Some(dirs.data_local_dir().join(path));
        }

        if !config.render.clear_color.is_normalized() {
            return Err(ConfigError::Validation(format!(
                "render.clear_color components must be within 0.0..=1.0, got {:?}",
                config.render.clear_color.components()
            )));
        }

        let mut names = HashSet::new();
        for output in &config.headless.outputs {
            if output.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "headless output names must not be empty".to_string(),
                ));
            }
            if !names.insert(output.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate headless output name '{}'",
                    output.name
                )));
            }
            if output.width == 0 || output.height == 0 {
                return Err(ConfigError::Validation(format!(
                    "headless output '{}' has an empty fallback size {}x{}",
                    output.name, output.width, output.height
                )));
            }
            if output.width > MAX_DIMENSION || output.height > MAX_DIMENSION {
                return Err(ConfigError::Validation(format!(
                    "headless output '{}' fallback size {}x{} exceeds {MAX_DIMENSION} pixels",
                    output.name, output.width, output.height
                )));
            }
            if let Some(mode) = output
                .modes
                .iter()
                .find(|mode| {
                    !(1..=MAX_DIMENSION).contains(&mode.width)
                        || !(1..=MAX_DIMENSION).contains(&mode.height)
                        || mode.refresh_mhz == 0
                })
            {
                return Err(ConfigError::Validation(format!(
                    "headless output '{}' advertises an invalid mode {}",
                    output.name, mode
                )));
            }
        }

        if config.run_for_ms == Some(0) {
            return Err(ConfigError::Validation(
                "run_for_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "novade", "nova-compositor")
}
