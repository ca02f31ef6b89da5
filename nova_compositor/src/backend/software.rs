//! CPU renderer, allocator, and swapchain.

use std::cell::{Cell, RefCell};

use tracing::trace;

use super::{Allocator, Renderer, Size, Swapchain};
use crate::buffer::{Buffer, BufferFormat, Color};
use crate::error::{AllocError, RenderError};

/// Maximum number of buffers a swapchain hands out at once.
pub const SWAPCHAIN_CAPACITY: usize = 4;

/// Renders by writing pixels directly into CPU buffers.
#[derive(Debug, Default)]
pub struct SoftwareRenderer {
    target: RefCell<Option<Buffer>>,
    passes: Cell<u64>,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of render passes completed so far.
    pub fn passes(&self) -> u64 {
        self.passes.get()
    }

    pub fn in_pass(&self) -> bool {
        self.target.borrow().is_some()
    }
}

impl Renderer for SoftwareRenderer {
    fn name(&self) -> &str {
        "software"
    }

    fn begin(&self, target: &Buffer) -> Result<(), RenderError> {
        let mut current = self.target.borrow_mut();
        if current.is_some() {
            return Err(RenderError::PassActive);
        }
        *current = Some(target.clone());
        Ok(())
    }

    fn clear(&self, color: Color) {
        if let Some(target) = self.target.borrow().as_ref() {
            target.fill(color);
        }
    }

    fn end(&self) {
        if self.target.borrow_mut().take().is_some() {
            self.passes.set(self.passes.get() + 1);
        }
    }
}

/// Allocates zero-filled CPU buffers.
#[derive(Debug, Default)]
pub struct SoftwareAllocator;

impl SoftwareAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl Allocator for SoftwareAllocator {
    fn create_swapchain(
        &self,
        width: u32,
        height: u32,
        format: BufferFormat,
    ) -> Result<Box<dyn Swapchain>, AllocError> {
        if Buffer::layout(width, height, format).is_none() {
            return Err(AllocError::InvalidSize { width, height });
        }
        Ok(Box::new(SoftwareSwapchain::new(Size::new(width, height), format)))
    }
}

#[derive(Debug)]
struct SwapchainSlot {
    buffer: Buffer,
    acquired: bool,
}

/// A swapchain of at most [`SWAPCHAIN_CAPACITY`] CPU buffers.
///
/// Released buffers are reused before new ones are allocated.
#[derive(Debug)]
pub struct SoftwareSwapchain {
    size: Size,
    format: BufferFormat,
    slots: RefCell<Vec<SwapchainSlot>>,
}

impl SoftwareSwapchain {
    pub fn new(size: Size, format: BufferFormat) -> Self {
        Self {
            size,
            format,
            slots: RefCell::new(Vec::with_capacity(SWAPCHAIN_CAPACITY)),
        }
    }

    pub fn acquired_count(&self) -> usize {
        self.slots.borrow().iter().filter(|slot| slot.acquired).count()
    }
}

impl Swapchain for SoftwareSwapchain {
    fn size(&self) -> Size {
        self.size
    }

    fn format(&self) -> BufferFormat {
        self.format
    }

    fn acquire(&self) -> Result<Buffer, AllocError> {
        let mut slots = self.slots.borrow_mut();
        if let Some(slot) = slots.iter_mut().find(|slot| !slot.acquired) {
            slot.acquired = true;
            return Ok(slot.buffer.clone());
        }
        if slots.len() >= SWAPCHAIN_CAPACITY {
            return Err(AllocError::Exhausted {
                capacity: SWAPCHAIN_CAPACITY,
            });
        }
        let buffer = Buffer::new(self.size.width, self.size.height, self.format)?;
        trace!(buffer = ?buffer.id(), "Allocated swapchain buffer");
        slots.push(SwapchainSlot {
            buffer: buffer.clone(),
            acquired: true,
        });
        Ok(buffer)
    }

    fn release(&self, buffer: Buffer) {
        let mut slots = self.slots.borrow_mut();
        if let Some(slot) = slots.iter_mut().find(|slot| slot.buffer == buffer) {
            slot.acquired = false;
        }
    }

    fn destroy(self: Box<Self>) {
        trace!(buffers = self.slots.borrow().len(), "Destroying swapchain");
    }
}
