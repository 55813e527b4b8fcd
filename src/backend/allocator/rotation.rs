use tracing::{debug, trace};

use super::{Allocator, Buffer, ExportedBuffer, SwapBuffer};

/// Number of rotation buffers kept next to the buffer being scanned out
pub const ROTATION_CAP: usize = 2;

/// Triple-buffering ring of a plane flipped directly from client buffers.
///
/// ## How does this work?
///
/// A plane scanning out a client's back buffer cannot hand that buffer object back to the
/// client for rendering until the hardware moved on to the next one. The ring holds two
/// additional buffers next to the one being displayed. After every successful flip
/// [`exchange`](RotationRing::exchange) rotates the three buffer objects, so the client always
/// renders into a buffer that is neither on screen nor queued for scanout.
///
/// The ring allocates its buffers lazily through [`ensure`](RotationRing::ensure) and
/// transparently re-creates them if the client buffers change their layout, e.g. when the
/// window is resized.
#[derive(Debug)]
pub struct RotationRing<B: Buffer> {
    slots: [Option<ExportedBuffer<B>>; ROTATION_CAP],
}

impl<B: Buffer> Default for RotationRing<B> {
    fn default() -> Self {
        RotationRing {
            slots: [None, None],
        }
    }
}

impl<B: Buffer> RotationRing<B> {
    /// Create an empty ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated rotation buffers
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no rotation buffer is allocated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if both rotation buffers are allocated
    pub fn is_provisioned(&self) -> bool {
        self.len() == ROTATION_CAP
    }

    /// Access the rotation buffers
    pub fn buffers(&self) -> impl Iterator<Item = &ExportedBuffer<B>> {
        self.slots.iter().flatten()
    }

    /// Make sure both rotation buffers exist and match the layout of `template`.
    ///
    /// Missing buffers are allocated, buffers not matching `template` anymore are re-created.
    /// On error the ring may be left partially provisioned.
    #[profiling::function]
    pub fn ensure<A: Allocator<B>>(&mut self, template: &B, allocator: &mut A) -> Result<(), A::Error> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Some(existing) = slot.as_ref() {
                if existing.matches(template) {
                    continue;
                }
                debug!(
                    slot = idx,
                    old = ?existing.buffer().size(),
                    new = ?template.size(),
                    "Re-creating outdated rotation buffer"
                );
                *slot = None;
            }

            let buffer = ExportedBuffer::allocate(allocator, template)?;
            trace!(slot = idx, name = ?buffer.name(), "Allocated rotation buffer");
            *slot = Some(buffer);
        }
        Ok(())
    }

    /// Rotate the buffer objects after `displayed` got flipped onto the plane.
    ///
    /// The buffer object backing `displayed` becomes the first rotation buffer, the first
    /// rotation buffer moves to the second one and the second rotation buffer becomes the new
    /// backing storage of `displayed`.
    ///
    /// Returns `false` without touching anything if the ring is not fully provisioned.
    pub fn exchange(&mut self, displayed: &SwapBuffer<B>) -> bool {
        let [first, second] = &mut self.slots;
        match (first.as_mut(), second.as_mut()) {
            (Some(first), Some(second)) => {
                std::mem::swap(first, second);
                displayed.swap_backing(first);
                true
            }
            _ => false,
        }
    }

    /// Release both rotation buffers
    pub fn destroy(&mut self) {
        if !self.is_empty() {
            debug!("Destroying rotation buffers");
        }
        self.slots = [None, None];
    }
}
