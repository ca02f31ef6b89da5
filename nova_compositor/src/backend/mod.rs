//! Capability contracts between the compositor core and its collaborators.
//!
//! The core never talks to hardware. It consumes:
//! - a [`Backend`] that announces outputs and binds a renderer and allocator;
//! - per-output [`Output`] handles with a mode list, attach and commit;
//! - a [`Renderer`] that records passes into buffers;
//! - an [`Allocator`] producing [`Swapchain`]s of buffers.
//!
//! Lifecycle notifications travel over [`Signal`]s that hand the compositor
//! state to each listener. [`headless`] provides an in-process backend and
//! [`software`] a CPU renderer and allocator.

pub mod headless;
pub mod software;

use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use calloop::LoopHandle;
use serde::Deserialize;

use crate::buffer::{Buffer, BufferFormat, Color};
use crate::error::{AllocError, BackendError, OutputError, RenderError};
use crate::signal::Signal;

/// Identity of an output, stable for the output's lifetime and never reused
/// by the backend that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

impl OutputId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output-{}", self.0)
    }
}

/// A display mode: size in pixels and refresh rate in mHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    pub refresh_mhz: u32,
}

impl Mode {
    pub const fn new(width: u32, height: u32, refresh_mhz: u32) -> Self {
        Self {
            width,
            height,
            refresh_mhz,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}.{:03}Hz",
            self.width,
            self.height,
            self.refresh_mhz / 1000,
            self.refresh_mhz % 1000
        )
    }
}

/// Physical size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Payload of an output's frame signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEvent {
    pub output: OutputId,
    /// When the backend decided the output is ready for a new frame.
    pub when: Instant,
}

/// Payload of an output's destroy signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyEvent {
    pub output: OutputId,
}

/// The signals a backend exposes for one output.
pub struct OutputEvents<D> {
    pub frame: Signal<FrameEvent, D>,
    pub destroy: Signal<DestroyEvent, D>,
}

impl<D> OutputEvents<D> {
    pub fn new() -> Self {
        Self {
            frame: Signal::new("output.frame"),
            destroy: Signal::new("output.destroy"),
        }
    }
}

impl<D> Default for OutputEvents<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Clone for OutputEvents<D> {
    fn clone(&self) -> Self {
        Self {
            frame: self.frame.clone(),
            destroy: self.destroy.clone(),
        }
    }
}

impl<D> fmt::Debug for OutputEvents<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputEvents")
            .field("frame", &self.frame)
            .field("destroy", &self.destroy)
            .finish()
    }
}

/// Payload of the backend's new-output signal.
pub struct NewOutput<D> {
    pub output: Rc<dyn Output>,
    pub events: OutputEvents<D>,
}

impl<D> fmt::Debug for NewOutput<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewOutput")
            .field("id", &self.output.id())
            .field("name", &self.output.name())
            .finish()
    }
}

/// The signals a backend exposes for itself.
pub struct BackendEvents<D> {
    pub new_output: Signal<NewOutput<D>, D>,
}

impl<D> BackendEvents<D> {
    pub fn new() -> Self {
        Self {
            new_output: Signal::new("backend.new_output"),
        }
    }
}

impl<D> Default for BackendEvents<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for BackendEvents<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEvents")
            .field("new_output", &self.new_output)
            .finish()
    }
}

/// The low-level input/output backend.
///
/// `D` is the data type handed to every signal listener.
pub trait Backend<D> {
    fn name(&self) -> &str;

    fn events(&self) -> &BackendEvents<D>;

    /// Starts emitting signals. Event sources are registered on `handle`.
    fn start(&self, handle: &LoopHandle<'static, D>) -> Result<(), BackendError>;

    /// The renderer bound to this backend, if one could be created.
    fn renderer(&self) -> Option<Rc<dyn Renderer>>;

    /// Creates an allocator suited to this backend and `renderer`.
    fn create_allocator(&self, renderer: &dyn Renderer) -> Result<Rc<dyn Allocator>, AllocError>;
}

/// A display sink owned by the backend.
pub trait Output {
    fn id(&self) -> OutputId;

    fn name(&self) -> &str;

    /// Supported modes, in backend-defined order.
    fn modes(&self) -> Vec<Mode>;

    fn current_mode(&self) -> Option<Mode>;

    fn set_mode(&self, mode: Mode) -> Result<(), OutputError>;

    /// Current size in pixels.
    fn size(&self) -> Size;

    /// Stages `buffer` for the next commit. The output takes ownership.
    fn attach_buffer(&self, buffer: Buffer);

    /// Presents the pending state.
    fn commit(&self) -> Result<(), OutputError>;
}

/// Records render passes into buffers.
pub trait Renderer {
    fn name(&self) -> &str;

    fn begin(&self, target: &Buffer) -> Result<(), RenderError>;

    fn clear(&self, color: Color);

    fn end(&self);
}

/// Creates swapchains.
pub trait Allocator {
    fn create_swapchain(
        &self,
        width: u32,
        height: u32,
        format: BufferFormat,
    ) -> Result<Box<dyn Swapchain>, AllocError>;
}

/// A small pool of buffers of one size and format.
pub trait Swapchain {
    fn size(&self) -> Size;

    fn format(&self) -> BufferFormat;

    fn acquire(&self) -> Result<Buffer, AllocError>;

    /// Returns an acquired buffer to the pool without presenting it.
    fn release(&self, buffer: Buffer);

    fn destroy(self: Box<Self>);
}
