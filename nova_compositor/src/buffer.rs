//! Render buffers, pixel formats, and clear colors.
//!
//! A [`Buffer`] is a shared handle to one renderable image owned by a
//! swapchain. Handles are cheap to clone; identity is the [`BufferId`].

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::error::AllocError;

/// Largest width or height a buffer may have.
pub const MAX_DIMENSION: u32 = 16384;

/// Unique identifier for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    /// Creates a new, unique `BufferId` from a process-wide counter.
    pub(crate) fn new_unique() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Pixel formats a swapchain can be created with.
///
/// Names follow DRM fourcc conventions: `Argb8888` stores each pixel as a
/// little-endian 32-bit word, so the bytes in memory are B, G, R, A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    /// 32-bit ARGB, 8 bits per channel.
    Argb8888,
    /// 32-bit RGB with the alpha byte ignored.
    Xrgb8888,
}

impl BufferFormat {
    /// The DRM fourcc code for this format.
    pub const fn fourcc(self) -> u32 {
        match self {
            BufferFormat::Argb8888 => fourcc(b"AR24"),
            BufferFormat::Xrgb8888 => fourcc(b"XR24"),
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        4
    }

    pub const fn has_alpha(self) -> bool {
        matches!(self, BufferFormat::Argb8888)
    }
}

impl fmt::Display for BufferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferFormat::Argb8888 => f.write_str("ARGB8888"),
            BufferFormat::Xrgb8888 => f.write_str("XRGB8888"),
        }
    }
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// Dimensions and format of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDetails {
    pub id: BufferId,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub format: BufferFormat,
}

/// A shared handle to a CPU-visible render buffer.
#[derive(Clone)]
pub struct Buffer {
    details: Rc<BufferDetails>,
    pixels: Rc<RefCell<Vec<u8>>>,
}

impl Buffer {
    /// Allocates a zero-filled buffer with a fresh identity.
    ///
    /// Fails with [`AllocError::InvalidSize`] when either dimension is zero
    /// or larger than [`MAX_DIMENSION`].
    pub fn new(width: u32, height: u32, format: BufferFormat) -> Result<Self, AllocError> {
        let (stride, len) = Self::layout(width, height, format)
            .ok_or(AllocError::InvalidSize { width, height })?;
        Ok(Self {
            details: Rc::new(BufferDetails {
                id: BufferId::new_unique(),
                width,
                height,
                stride,
                format,
            }),
            pixels: Rc::new(RefCell::new(vec![0; len])),
        })
    }

    /// Row stride and total byte length of a `width`x`height` buffer, or
    /// `None` if no such buffer can be allocated.
    pub fn layout(width: u32, height: u32, format: BufferFormat) -> Option<(u32, usize)> {
        if !(1..=MAX_DIMENSION).contains(&width) || !(1..=MAX_DIMENSION).contains(&height) {
            return None;
        }
        let stride = width.checked_mul(format.bytes_per_pixel())?;
        let len = usize::try_from(stride)
            .ok()?
            .checked_mul(usize::try_from(height).ok()?)?;
        Some((stride, len))
    }

    pub fn id(&self) -> BufferId {
        self.details.id
    }

    pub fn details(&self) -> &BufferDetails {
        &self.details
    }

    pub fn width(&self) -> u32 {
        self.details.width
    }

    pub fn height(&self) -> u32 {
        self.details.height
    }

    pub fn format(&self) -> BufferFormat {
        self.details.format
    }

    pub fn pixels(&self) -> Ref<'_, Vec<u8>> {
        self.pixels.borrow()
    }

    /// Fills every pixel with `color` encoded in the buffer's format.
    pub fn fill(&self, color: Color) {
        let word = color.to_argb8888(self.details.format.has_alpha()).to_le_bytes();
        let mut pixels = self.pixels.borrow_mut();
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&word);
        }
    }

    /// Reads the pixel at `(x, y)` as a packed ARGB word.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.details.width || y >= self.details.height {
            return None;
        }
        let offset = y as usize * self.details.stride as usize
            + x as usize * self.details.format.bytes_per_pixel() as usize;
        let pixels = self.pixels.borrow();
        let bytes: [u8; 4] = pixels.get(offset..offset + 4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.details.id)
            .field("size", &(self.details.width, self.details.height))
            .field("format", &self.details.format)
            .finish()
    }
}

/// An RGBA color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f32; 4]")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn components(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn is_normalized(&self) -> bool {
        self.components().iter().all(|c| (0.0..=1.0).contains(c))
    }

    /// Packs the color into a 32-bit ARGB word. Without alpha the top byte
    /// is forced to `0xff`.
    pub fn to_argb8888(&self, with_alpha: bool) -> u32 {
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        let a = if with_alpha { channel(self.a) } else { 0xff };
        a << 24 | channel(self.r) << 16 | channel(self.g) << 8 | channel(self.b)
    }
}

impl From<[f32; 4]> for Color {
    fn from([r, g, b, a]: [f32; 4]) -> Self {
        Color::new(r, g, b, a)
    }
}
