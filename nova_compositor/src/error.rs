//! Error types for the Nova compositor.
//!
//! Errors follow the compositor's failure taxonomy:
//! - [`CompositorError`] covers fatal startup and event loop failures. These
//!   surface to process exit.
//! - [`OutputError`] covers output configuration and commit failures. A
//!   rejected mode leaves the output unconfigured.
//! - [`FrameError`] covers the per-frame pipeline. It is logged and the frame
//!   is dropped; it never unwinds past a signal handler.
//! - [`AllocError`] and [`RenderError`] are reported by the allocator and
//!   renderer capabilities and wrapped by [`FrameError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::OutputId;

/// Fatal errors raised while bringing up or running the compositor.
#[derive(Debug, Error)]
pub enum CompositorError {
    /// The calloop event loop could not be created or dispatched.
    #[error("Event loop error: {0}")]
    EventLoop(#[from] calloop::Error),

    /// The backend could not be created or started.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The global tracing subscriber could not be installed.
    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to configuration loading, parsing, or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration file from {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found: {path:?}")]
    NotFound { path: PathBuf },
}

/// Errors raised by a backend outside of the per-frame path.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend already started")]
    AlreadyStarted,

    /// The backend's command channel is closed, usually because the event
    /// loop that owned the receiving end has been dropped.
    #[error("Backend command channel closed")]
    ChannelClosed,

    #[error("Failed to register backend event source: {0}")]
    EventSource(#[from] calloop::Error),
}

/// Errors raised while configuring or presenting on an output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// The output refused to apply a mode it advertises.
    #[error("Output {output} rejected mode {mode}")]
    ModeRejected { output: String, mode: String },

    /// The requested mode is not in the output's mode list.
    #[error("Output {output} does not support mode {mode}")]
    UnsupportedMode { output: String, mode: String },

    /// The attached buffer does not match the output's current size.
    #[error("Buffer is {buffer_width}x{buffer_height}, output is {output_width}x{output_height}")]
    BufferSizeMismatch {
        buffer_width: u32,
        buffer_height: u32,
        output_width: u32,
        output_height: u32,
    },

    #[error("Commit without an attached buffer")]
    NothingAttached,

    /// The output refused to present its pending state.
    #[error("Output {output} rejected the commit")]
    CommitRejected { output: String },

    /// An entity with the same identity is already registered.
    #[error("Output {0:?} is already registered")]
    AlreadyRegistered(OutputId),
}

/// Errors reported by an allocator or swapchain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Invalid swapchain size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Every buffer in the swapchain is currently acquired.
    #[error("Swapchain exhausted ({capacity} buffers in use)")]
    Exhausted { capacity: usize },

    #[error("Allocator unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a renderer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("A render pass is already in progress")]
    PassActive,

    #[error("Renderer unavailable: {0}")]
    Unavailable(String),
}

/// A recoverable failure of one frame pipeline invocation.
///
/// Each variant names the stage that failed. Resources acquired by earlier
/// stages have already been released when this error is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("No renderer available")]
    RendererUnavailable,

    #[error("Failed to create allocator: {0}")]
    Allocator(AllocError),

    #[error("Failed to create swapchain: {0}")]
    Swapchain(AllocError),

    #[error("Failed to acquire buffer: {0}")]
    BufferAcquire(AllocError),

    #[error("Failed to begin render pass: {0}")]
    RenderPass(RenderError),

    #[error("Failed to commit output: {0}")]
    Commit(OutputError),
}

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;
