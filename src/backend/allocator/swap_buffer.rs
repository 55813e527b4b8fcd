use std::cell::{Ref, RefCell};
use std::rc::Rc;

use super::{Buffer, BufferName, ExportedBuffer};

/// A client visible attachment (front or back buffer) of a surface.
///
/// Cloning the handle retains the attachment, dropping it releases it again.
/// The buffer object backing the attachment is shared by all handles and can be exchanged,
/// e.g. after flipping a back buffer to the front.
#[derive(Debug)]
pub struct SwapBuffer<B: Buffer>(Rc<RefCell<ExportedBuffer<B>>>);

impl<B: Buffer> Clone for SwapBuffer<B> {
    fn clone(&self) -> Self {
        SwapBuffer(self.0.clone())
    }
}

impl<B: Buffer> SwapBuffer<B> {
    /// Create a new attachment backed by an exported buffer
    pub fn new(buffer: B, name: BufferName) -> Self {
        SwapBuffer(Rc::new(RefCell::new(ExportedBuffer::new(buffer, name))))
    }

    /// Current backing storage of the attachment
    pub fn backing(&self) -> Ref<'_, ExportedBuffer<B>> {
        self.0.borrow()
    }

    /// Name of the buffer currently backing the attachment
    pub fn name(&self) -> BufferName {
        self.0.borrow().name()
    }

    /// Number of live handles to this attachment
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Checks if both handles refer to the same attachment
    pub fn is_same(&self, other: &SwapBuffer<B>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Checks whether the contents of `other` could be scanned out in place of this attachment
    pub fn same_layout(&self, other: &SwapBuffer<B>) -> bool {
        let this = self.0.borrow();
        let other = other.0.borrow();
        this.buffer().size() == other.buffer().size() && this.buffer().bpp() == other.buffer().bpp()
    }

    /// Swap the backing storage of two attachments
    pub fn exchange(&self, other: &SwapBuffer<B>) {
        if !self.is_same(other) {
            self.0.swap(&other.0);
        }
    }

    pub(crate) fn swap_backing(&self, other: &mut ExportedBuffer<B>) {
        std::mem::swap(&mut *self.0.borrow_mut(), other);
    }
}
