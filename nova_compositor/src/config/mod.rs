//! Configuration for the Nova compositor.
//!
//! - [`types`]: the configuration schema ([`CompositorConfig`] and friends).
//! - [`defaults`]: default values used for missing fields.
//! - [`loader`]: [`ConfigLoader`], which locates, parses, and validates the
//!   TOML configuration file.
//!
//! ```toml
//! run_for_ms = 5000
//!
//! [logging]
//! level = "debug"
//!
//! [render]
//! clear_color = [0.0, 0.0, 1.0, 1.0]
//! mode_policy = "best"
//!
//! [[headless.outputs]]
//! name = "HEADLESS-1"
//! modes = [
//!     { width = 1280, height = 720, refresh_mhz = 60000 },
//!     { width = 1920, height = 1080, refresh_mhz = 60000 },
//! ]
//! ```

pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{
    CompositorConfig, HeadlessConfig, HeadlessOutputConfig, LoggingConfig, RenderConfig,
};
