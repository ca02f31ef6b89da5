//! Nova compositor core: output lifecycle and per-frame rendering.
//!
//! The compositor learns about outputs from a [`backend::Backend`], keeps an
//! [`output::OutputEntity`] for each active one in the
//! [`registry::OutputRegistry`], and renders one frame through the
//! [`pipeline::FramePipeline`] every time an output signals that it is ready.
//!
//! Everything runs on a single calloop event loop owned by
//! [`state::Compositor`].

pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod signal;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::{CompositorConfig, ConfigLoader};
pub use error::{CompositorError, Result};
pub use state::{Compositor, CompositorState, OutputSummary};

use tracing::info;

use backend::headless::{HeadlessBackend, HeadlessHandle};

/// Builds a compositor on the headless backend and queues the outputs
/// listed in `config`.
///
/// The outputs are announced on the first dispatch of the returned
/// compositor's event loop.
pub fn init_compositor(config: &CompositorConfig) -> Result<(Compositor, HeadlessHandle)> {
    info!("Nova compositor initializing");
    let (compositor, backend) =
        Compositor::new(config, |_| Ok(HeadlessBackend::<CompositorState>::new()))?;
    let handle = backend.handle();
    for output in &config.headless.outputs {
        handle.add_output(output.clone())?;
    }
    Ok((compositor, handle))
}
