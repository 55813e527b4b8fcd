//! Hardware facing interfaces
//!
//! The presentation scheduler talks to the display hardware through two narrow interfaces:
//!
//! - [`allocator`] describes the buffers clients render into and how additional buffers with
//!   the same layout are allocated
//! - [`drm`] describes the modesetting device: retrace counters, page flips, framebuffers
//!   and the overlay planes it offers
//!
//! Neither module talks to a device itself, implementations are provided by the driver
//! embedding the scheduler.

pub mod allocator;
pub mod drm;
