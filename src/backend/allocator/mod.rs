//! Buffer allocation and management.
//!
//! Collection of common traits around the buffers the scheduler moves between
//! clients and the display hardware.
//!
//! Helpers:
//! - [`SwapBuffer`], a reference counted client attachment whose backing storage can be exchanged
//! - [`RotationRing`] to triple-buffer planes that are flipped directly from client buffers

mod rotation;
mod swap_buffer;

pub use rotation::RotationRing;
pub use swap_buffer::SwapBuffer;

pub use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier, UnrecognizedFourcc};

/// Common trait describing common properties of most types of buffers.
pub trait Buffer {
    /// Width of the two-dimensional buffer
    fn width(&self) -> u32;
    /// Height of the two-dimensional buffer
    fn height(&self) -> u32;
    /// Size (w x h) of the two-dimensional buffer
    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
    /// Pixel format of the buffer
    fn format(&self) -> Fourcc;
    /// Number of bytes between two consecutive rows
    fn stride(&self) -> u32;
    /// Number of bits per pixel
    fn bpp(&self) -> u32;
}

/// Global name under which a buffer is shared with clients and the modesetting device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferName(pub u32);

/// Interface to create and export Buffers
pub trait Allocator<B: Buffer> {
    /// Error type thrown if allocations fail
    type Error: std::error::Error + Send + Sync + 'static;

    /// Try to create a buffer matching the dimensions, layout and pixel format of `template`
    fn alloc_matching(&mut self, template: &B) -> Result<B, Self::Error>;

    /// Export a global name for `buffer`
    fn export_name(&mut self, buffer: &B) -> Result<BufferName, Self::Error>;
}

/// A buffer together with the name it is exported under
#[derive(Debug)]
pub struct ExportedBuffer<B> {
    buffer: B,
    name: BufferName,
}

impl<B: Buffer> ExportedBuffer<B> {
    /// Wrap an already exported buffer
    pub fn new(buffer: B, name: BufferName) -> Self {
        ExportedBuffer { buffer, name }
    }

    /// Allocate and export a new buffer matching `template`
    pub fn allocate<A: Allocator<B>>(allocator: &mut A, template: &B) -> Result<Self, A::Error> {
        let buffer = allocator.alloc_matching(template)?;
        let name = allocator.export_name(&buffer)?;
        Ok(ExportedBuffer { buffer, name })
    }

    /// Access the underlying buffer
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Name of the buffer
    pub fn name(&self) -> BufferName {
        self.name
    }

    /// Checks if the buffer can stand in for `template`
    pub fn matches(&self, template: &B) -> bool {
        self.buffer.size() == template.size()
            && self.buffer.stride() == template.stride()
            && self.buffer.format() == template.format()
    }

    /// Unwrap the underlying buffer
    pub fn into_inner(self) -> B {
        self.buffer
    }
}
