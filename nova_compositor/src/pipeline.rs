//! The per-frame render pipeline.
//!
//! One call to [`FramePipeline::render`] produces and commits one frame for
//! one output:
//!
//! renderer → allocator → swapchain → buffer → render pass → clear →
//! attach → commit.
//!
//! Every resource acquired along the way is held by a guard that hands it
//! back when the guard goes out of scope, so each early return releases
//! exactly what was acquired before it. Nothing created here outlives the
//! call.

use tracing::trace;

use crate::backend::{Backend, Output, Renderer, Size, Swapchain};
use crate::buffer::{Buffer, BufferFormat, BufferId, Color};
use crate::error::{AllocError, FrameError, RenderError};

/// What a successful pass presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub buffer: BufferId,
    pub size: Size,
}

/// Renders frames in a fixed format, cleared to a fixed color.
#[derive(Debug, Clone)]
pub struct FramePipeline {
    format: BufferFormat,
    clear_color: Color,
}

impl FramePipeline {
    /// Pixel format of every swapchain the pipeline creates.
    pub const FORMAT: BufferFormat = BufferFormat::Argb8888;

    pub fn new(clear_color: Color) -> Self {
        Self {
            format: Self::FORMAT,
            clear_color,
        }
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn clear_color(&self) -> Color {
        self.clear_color
    }

    /// Renders one frame for `output` using the capabilities of `backend`.
    ///
    /// # Errors
    ///
    /// Returns the [`FrameError`] of the first stage that failed. All
    /// resources acquired by earlier stages have been released by then.
    pub fn render<D>(
        &self,
        backend: &dyn Backend<D>,
        output: &dyn Output,
    ) -> Result<FrameReport, FrameError> {
        let renderer = backend.renderer().ok_or(FrameError::RendererUnavailable)?;
        let allocator = backend
            .create_allocator(renderer.as_ref())
            .map_err(FrameError::Allocator)?;

        let size = output.size();
        let swapchain = SwapchainGuard::new(
            allocator
                .create_swapchain(size.width, size.height, self.format)
                .map_err(FrameError::Swapchain)?,
        );
        let buffer = swapchain.acquire().map_err(FrameError::BufferAcquire)?;

        {
            let pass = RenderPass::begin(renderer.as_ref(), buffer.buffer())
                .map_err(FrameError::RenderPass)?;
            pass.clear(self.clear_color);
        }

        let id = buffer.buffer().id();
        buffer.attach_to(output);
        output.commit().map_err(FrameError::Commit)?;

        trace!(output = %output.name(), buffer = id.as_u64(), "Frame committed");
        Ok(FrameReport { buffer: id, size })
    }
}

/// Owns a swapchain for the duration of a frame and destroys it on drop.
struct SwapchainGuard {
    swapchain: Option<Box<dyn Swapchain>>,
}

impl SwapchainGuard {
    fn new(swapchain: Box<dyn Swapchain>) -> Self {
        Self {
            swapchain: Some(swapchain),
        }
    }

    fn acquire(&self) -> Result<BufferGuard<'_>, AllocError> {
        let swapchain = self
            .swapchain
            .as_deref()
            .ok_or_else(|| AllocError::Unavailable("swapchain already destroyed".to_string()))?;
        let buffer = swapchain.acquire()?;
        Ok(BufferGuard {
            swapchain,
            buffer,
            attached: false,
        })
    }
}

impl Drop for SwapchainGuard {
    fn drop(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy();
        }
    }
}

/// An acquired buffer. Returned to its swapchain on drop unless it was
/// handed to an output.
struct BufferGuard<'a> {
    swapchain: &'a dyn Swapchain,
    buffer: Buffer,
    attached: bool,
}

impl BufferGuard<'_> {
    fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Transfers the buffer to `output`.
    fn attach_to(mut self, output: &dyn Output) {
        self.attached = true;
        output.attach_buffer(self.buffer.clone());
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        if !self.attached {
            self.swapchain.release(self.buffer.clone());
        }
    }
}

/// An open render pass. Ended on drop.
struct RenderPass<'a> {
    renderer: &'a dyn Renderer,
}

impl<'a> RenderPass<'a> {
    fn begin(renderer: &'a dyn Renderer, target: &Buffer) -> Result<Self, RenderError> {
        renderer.begin(target)?;
        Ok(Self { renderer })
    }

    fn clear(&self, color: Color) {
        self.renderer.clear(color);
    }
}

impl Drop for RenderPass<'_> {
    fn drop(&mut self) {
        self.renderer.end();
    }
}
