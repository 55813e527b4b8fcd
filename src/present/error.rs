use super::SurfaceId;
use crate::backend::drm::{Error as DrmError, OutputId};

/// Reasons a swap cannot take its preferred path
///
/// None of these are fatal, the scheduler falls back to a cheaper presentation path and
/// reports the cause through its logs.
#[derive(thiserror::Error, Debug)]
pub enum PresentError {
    /// The modesetting device rejected a request
    #[error(transparent)]
    Drm(#[from] DrmError),
    /// Rotation buffers could not be allocated
    #[error("Failed to allocate rotation buffers: {0}")]
    Allocation(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The surface is not displayed on any output
    #[error("Surface `{0:?}` is not visible on any output")]
    NotVisible(SurfaceId),
    /// The surface is not known to the surface directory
    #[error("Unknown surface `{0:?}`")]
    UnknownSurface(SurfaceId),
    /// The output scans out with a transform, which overlay planes cannot follow
    #[error("Output `{0:?}` is rotated")]
    OutputRotated(OutputId),
    /// Every plane able to drive the output is in use
    #[error("No plane available on output `{0:?}`")]
    NoPlaneAvailable(OutputId),
}
