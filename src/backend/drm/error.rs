use super::{OutputId, PlaneId};
use crate::backend::allocator::Fourcc;

/// Errors thrown by implementations of [`Modesetting`](super::Modesetting)
/// and the [`PlaneRegistry`](super::planes::PlaneRegistry).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device encountered an access error
    #[error("DRM access error: {errmsg} on output `{output:?}` ({source:})")]
    Access {
        /// Error message associated to the access error
        errmsg: &'static str,
        /// Output on which the error was generated
        output: Option<OutputId>,
        /// Underlying device error
        source: std::io::Error,
    },
    /// Device is currently paused
    #[error("Device is currently paused, operation rejected")]
    DeviceInactive,
    /// The plane cannot be used on the given output
    #[error("Plane `{1:?}` is not compatible for use with output `{0:?}`")]
    PlaneNotCompatible(OutputId, PlaneId),
    /// The plane is not part of the registry
    #[error("Unknown plane `{0:?}`")]
    UnknownPlane(PlaneId),
    /// The plane cannot scan out the given format
    #[error("Plane `{plane:?}` does not support format {format:?}")]
    UnsupportedFormat {
        /// Plane the format was requested for
        plane: PlaneId,
        /// Requested format
        format: Fourcc,
    },
    /// No scanout format exists for the given pixel depth
    #[error("No scanout format for buffers with {0} bits per pixel")]
    UnsupportedPixelDepth(u32),
}
