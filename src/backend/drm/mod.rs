//! Modesetting interface and hardware plane handling
//!
//! This module describes the narrow interface the presentation scheduler needs from a
//! kms device: querying and waiting for retraces (vblanks), queueing page flips on outputs
//! and overlay planes and managing framebuffers.
//!
//! The actual device access is provided by an implementation of the [`Modesetting`] trait,
//! usually wrapping the driver's device node. Events the device delivers for requests
//! carrying a [`SwapToken`] have to be fed back into the scheduler, e.g. through a
//! [`PresentEventSource`](crate::present::PresentEventSource).
//!
//! ## Planes
//!
//! Besides the primary scanout, most display engines offer a handful of overlay planes
//! ("sprites"), that can scan out a buffer at a different position and size than the primary
//! surface. The [`PlaneRegistry`](planes::PlaneRegistry) enumerates them once and arbitrates
//! exclusive ownership between surfaces.
//!
//! ```rust,ignore
//! use planeswap::backend::drm::planes::PlaneRegistry;
//! use planeswap::present::PresentConfig;
//!
//! let config = PresentConfig::from_env();
//! let registry = PlaneRegistry::from_device(&device, &config.plane_assignments)?;
//! for plane in registry.planes() {
//!     println!("{:?} drives {:?}", plane.id(), plane.possible_outputs());
//! }
//! ```

use std::time::Duration;

use smallvec::SmallVec;

use crate::backend::allocator::{Buffer, BufferName, Fourcc};
use crate::present::SwapToken;
use crate::utils::{Buffer as BufferCoords, Physical, Rectangle, Sequence};

mod error;
pub mod planes;

pub use self::error::Error;

/// Index of an output (crtc) of a modesetting device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

/// Identifier of a hardware plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaneId(pub u32);

/// Identifier of a framebuffer registered with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Set of outputs, indexed by [`OutputId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputMask(pub u32);

impl OutputMask {
    /// Mask containing every output
    pub const ALL: OutputMask = OutputMask(u32::MAX);

    /// Checks if the output is part of the mask
    #[inline]
    pub fn contains(&self, output: OutputId) -> bool {
        output.0 < 32 && self.0 & (1 << output.0) != 0
    }
}

impl FromIterator<OutputId> for OutputMask {
    fn from_iter<T: IntoIterator<Item = OutputId>>(iter: T) -> Self {
        OutputMask(
            iter.into_iter()
                .filter(|output| output.0 < 32)
                .fold(0, |mask, output| mask | (1 << output.0)),
        )
    }
}

/// Description of a hardware plane as reported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Identifier of the plane
    pub id: PlaneId,
    /// Outputs the plane can be attached to
    pub possible_outputs: OutputMask,
    /// Pixel formats the plane can scan out
    pub formats: SmallVec<[Fourcc; 4]>,
}

/// Timing metadata of a retrace or page-flip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMetadata {
    /// The sequence number of the frame
    pub sequence: Sequence,
    /// Monotonic timestamp of the retrace
    pub time: Duration,
}

impl EventMetadata {
    /// Metadata without any valid timing information
    pub const ZERO: EventMetadata = EventMetadata {
        sequence: Sequence::ZERO,
        time: Duration::ZERO,
    };
}

/// Retrace a wait request resolves on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetraceTarget {
    /// Absolute sequence number
    Absolute(Sequence),
    /// Number of retraces relative to the current one
    Relative(u32),
}

/// Request to wait for a retrace on an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetraceRequest {
    /// Output whose retraces are counted
    pub output: OutputId,
    /// Retrace to wait for
    pub target: RetraceTarget,
    /// Resolve on the next retrace if the target has already passed
    pub next_on_miss: bool,
    /// Token the resulting retrace event carries.
    ///
    /// Requests without a token only query the current sequence and never produce an event.
    pub token: Option<SwapToken>,
}

impl RetraceRequest {
    /// Request querying the current sequence of `output`
    pub fn query(output: OutputId) -> Self {
        RetraceRequest {
            output,
            target: RetraceTarget::Relative(0),
            next_on_miss: false,
            token: None,
        }
    }
}

/// Target of a page flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipTarget {
    /// Flip the primary scanout of an output
    Output(OutputId),
    /// Flip an overlay plane attached to an output
    Plane {
        /// Plane to flip
        plane: PlaneId,
        /// Output the plane is attached to
        output: OutputId,
        /// Area of the framebuffer to scan out
        src: Rectangle<i32, BufferCoords>,
        /// Area of the output to scan out to
        dst: Rectangle<i32, Physical>,
    },
}

impl FlipTarget {
    /// Output the flip happens on
    pub fn output(&self) -> OutputId {
        match self {
            FlipTarget::Output(output) => *output,
            FlipTarget::Plane { output, .. } => *output,
        }
    }
}

/// Access to a kms device as needed by the presentation scheduler
///
/// Completed retrace waits and page flips carrying a [`SwapToken`] are reported asynchronously
/// and have to be dispatched to the [`PresentScheduler`](crate::present::PresentScheduler).
pub trait Modesetting {
    /// Enumerate the overlay planes of the device
    fn plane_resources(&self) -> Result<Vec<PlaneInfo>, Error>;

    /// Wait for a retrace.
    ///
    /// Returns the sequence and timestamp the request resolved to. With a token present the
    /// device reports the retrace later on, otherwise the call returns the current values.
    fn request_retrace_wait(&mut self, request: RetraceRequest) -> Result<EventMetadata, Error>;

    /// Queue a page flip to `framebuffer` for the next retrace.
    ///
    /// The device reports a flip-complete event carrying `token` once the flip happened.
    fn submit_page_flip(
        &mut self,
        target: FlipTarget,
        framebuffer: FramebufferId,
        token: Option<SwapToken>,
    ) -> Result<(), Error>;

    /// Register `buffer` as a framebuffer
    fn register_framebuffer<B: Buffer>(
        &mut self,
        buffer: &B,
        name: BufferName,
    ) -> Result<FramebufferId, Error>;

    /// Release a framebuffer again
    fn unregister_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Detach any framebuffer from a plane and turn it off
    fn disable_plane(&mut self, plane: PlaneId, output: OutputId) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::{OutputId, OutputMask};

    #[test]
    fn output_mask_membership() {
        let mask = [OutputId(0), OutputId(2)].into_iter().collect::<OutputMask>();

        assert!(mask.contains(OutputId(0)));
        assert!(!mask.contains(OutputId(1)));
        assert!(mask.contains(OutputId(2)));
        assert!(!mask.contains(OutputId(40)));
        assert!(OutputMask::ALL.contains(OutputId(31)));
    }
}
