//! Frame presentation scheduling
//!
//! For every buffer swap of a rendering client the [`PresentScheduler`] decides how the new
//! contents become visible and when the client learns about it:
//!
//! - **Blit**: the back buffer is copied into the front buffer on the requested retrace
//! - **Flip**: the back buffer is scanned out directly, either as the whole output or on a
//!   hardware overlay plane, and the buffers are exchanged afterwards
//! - **Wait**: nothing is presented, the client only waits for a retrace
//!
//! Swaps are tracked as [`SwapRecord`]s until the modesetting device reports the retrace or
//! page flip they waited for. These events have to be handed to
//! [`PresentScheduler::dispatch`], usually by inserting a [`PresentEventSource`] into the
//! event loop.
//!
//! The scheduler does not know about clients, surfaces or outputs itself. Everything it needs
//! to know about them is queried from a [`PresentHandler`], which also receives the
//! completion notifications and carries out the copies.
//!
//! ```rust,ignore
//! use planeswap::present::{PresentConfig, PresentEventSource, PresentScheduler, SwapRequest};
//!
//! let mut scheduler = PresentScheduler::new(device, allocator, PresentConfig::from_env())?;
//! let (sender, source) = PresentEventSource::new();
//! event_loop.handle().insert_source(source, |event, _, state: &mut State| {
//!     state.scheduler.dispatch(&mut state.handler, event);
//! })?;
//!
//! // when a client swaps its buffers
//! let scheduled = scheduler.schedule_swap(&mut handler, SwapRequest {
//!     client,
//!     surface,
//!     front: &front,
//!     back: &back,
//!     target: 0,
//!     divisor: 0,
//!     remainder: 0,
//!     sprite: None,
//! });
//! ```

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, info, info_span, instrument};

use crate::backend::{
    allocator::{Allocator, Buffer, SwapBuffer},
    drm::{planes::PlaneRegistry, FramebufferId, Modesetting, OutputId},
};
use crate::utils::{Buffer as BufferCoords, Physical, Point, Rectangle, Sequence, Transform};

mod config;
mod decision;
mod dispatch;
mod error;
mod events;
mod lifecycle;
mod record;
mod schedule;


pub use self::config::{
    parse_assignments, PresentConfig, ENV_SHADOW_FB, ENV_SPRITE_ASSIGNMENT_D1,
    ENV_SPRITE_ASSIGNMENT_D2, ENV_TEAR_FB, PLANES_PER_DISPLAY,
};
pub use self::error::PresentError;
pub use self::events::{PresentEvent, PresentEventSender, PresentEventSource};
pub use self::lifecycle::LifecycleIndex;
pub use self::record::{FlipState, SwapKind, SwapRecord, SwapRecords, SwapToken};
pub use self::schedule::{ScheduledSwap, SwapRequest};

/// Identifier of a rendering client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

/// Identifier of a presentable surface (window or offscreen drawable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

/// Kind of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// A window, that may be visible on outputs
    Window,
    /// An offscreen drawable, that is never scanned out
    Offscreen,
}

/// How outputs are combined into the screen a surface is displayed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// A single output
    Single,
    /// Every output shows the same contents
    Clone,
    /// Outputs are placed next to each other, each showing a part of the screen
    Extended,
}

/// Presentation path of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Copy the back buffer into the front buffer
    Blit,
    /// Scan out the back buffer directly
    Flip,
    /// Only wait for a retrace
    Wait,
}

/// Path a completed swap was carried out with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// The contents were copied
    Blit,
    /// The contents were flipped
    Flip,
}

/// Geometry and capabilities of a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceInfo {
    /// Kind of the surface
    pub kind: SurfaceKind,
    /// The surface allows its buffers to be scanned out directly
    pub can_flip: bool,
    /// Area of the surface in screen coordinates
    pub geometry: Rectangle<i32, Physical>,
    /// Parts of the surface not obscured by other surfaces, empty while minimized
    pub visible: SmallVec<[Rectangle<i32, Physical>; 4]>,
}

/// Access to the surfaces and outputs the scheduler presents to
pub trait SurfaceDirectory {
    /// Look up a surface, `None` if it does not exist (anymore)
    fn resolve(&self, surface: SurfaceId) -> Option<SurfaceInfo>;
    /// Topology of the screen the surface is displayed on
    fn topology_of(&self, surface: SurfaceId) -> Topology;
    /// Outputs currently displaying the surface, primary output first
    fn outputs_for(&self, surface: SurfaceId) -> SmallVec<[OutputId; 2]>;
    /// Transform the output scans out with
    fn rotation_of(&self, output: OutputId) -> Transform;
    /// Location of the output in screen coordinates
    fn output_origin(&self, output: OutputId) -> Point<i32, Physical>;
    /// Every output that is currently lit
    fn active_outputs(&self) -> SmallVec<[OutputId; 4]>;
}

/// Receiver of swap and wait completions
///
/// Notifications are never sent to clients that disconnected in the meantime.
pub trait PresentNotifier {
    /// A swap of `surface` became visible at `sequence`
    fn notify_swap_complete(
        &mut self,
        client: ClientId,
        surface: SurfaceId,
        sequence: Sequence,
        time: Duration,
        kind: CompletionKind,
    );
    /// The retrace `client` waited for was reached
    fn notify_wait_complete(
        &mut self,
        client: ClientId,
        surface: SurfaceId,
        sequence: Sequence,
        time: Duration,
    );
}

/// Copies buffer contents for swaps that are not flipped
pub trait Blitter<B: Buffer> {
    /// Copy `region` of `src` into `dst`
    fn copy_region(
        &mut self,
        surface: SurfaceId,
        region: Rectangle<i32, BufferCoords>,
        dst: &SwapBuffer<B>,
        src: &SwapBuffer<B>,
    );
}

/// Everything the [`PresentScheduler`] needs from its environment
pub trait PresentHandler<B: Buffer>: SurfaceDirectory + PresentNotifier + Blitter<B> {}
impl<B: Buffer, T: SurfaceDirectory + PresentNotifier + Blitter<B>> PresentHandler<B> for T {}

/// Schedules buffer swaps and arbitrates the overlay planes of a modesetting device
pub struct PresentScheduler<D: Modesetting, A: Allocator<B>, B: Buffer> {
    device: D,
    allocator: A,
    planes: PlaneRegistry<B>,
    records: SwapRecords<B>,
    lifecycle: LifecycleIndex,
    config: PresentConfig,
    active: bool,
    scanout: IndexMap<OutputId, FramebufferId>,
    span: tracing::Span,
}

impl<D, A, B> fmt::Debug for PresentScheduler<D, A, B>
where
    D: Modesetting + fmt::Debug,
    A: Allocator<B>,
    B: Buffer + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentScheduler")
            .field("device", &self.device)
            .field("planes", &self.planes)
            .field("records", &self.records.len())
            .field("config", &self.config)
            .field("active", &self.active)
            .field("scanout", &self.scanout)
            .finish_non_exhaustive()
    }
}

impl<D, A, B> PresentScheduler<D, A, B>
where
    D: Modesetting,
    A: Allocator<B>,
    B: Buffer,
{
    /// Create a new scheduler, enumerating the overlay planes of `device`
    pub fn new(device: D, allocator: A, config: PresentConfig) -> Result<Self, PresentError> {
        let span = info_span!("backend_present");
        let planes = {
            let _guard = span.enter();
            let planes = PlaneRegistry::from_device(&device, &config.plane_assignments)?;
            info!(
                planes = planes.len(),
                tear_free_blit = config.tear_free_blit,
                shadow_scanout = config.shadow_scanout,
                "Presentation scheduler initialized"
            );
            planes
        };

        Ok(PresentScheduler {
            device,
            allocator,
            planes,
            records: SwapRecords::default(),
            lifecycle: LifecycleIndex::default(),
            config,
            active: true,
            scanout: IndexMap::new(),
            span,
        })
    }

    /// Access the underlying modesetting device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the underlying modesetting device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Access the buffer allocator
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Access the overlay planes
    pub fn planes(&self) -> &PlaneRegistry<B> {
        &self.planes
    }

    /// Access the in-flight swaps
    pub fn records(&self) -> &SwapRecords<B> {
        &self.records
    }

    /// Access the index of in-flight swaps by client and surface
    pub fn lifecycle(&self) -> &LifecycleIndex {
        &self.lifecycle
    }

    /// Configuration the scheduler was created with
    pub fn config(&self) -> &PresentConfig {
        &self.config
    }

    /// Returns true if the device is not paused
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Pause the device, e.g. on session switches.
    ///
    /// All overlay planes are turned off and released. While paused every swap requesting a
    /// plane falls back to a blit.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn pause(&mut self) {
        if !self.active {
            return;
        }
        self.planes.suspend(&mut self.device);
        self.active = false;
        info!("Device paused");
    }

    /// Resume a paused device
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn activate(&mut self) {
        if !self.active {
            self.active = true;
            info!("Device resumed");
        }
    }

    /// Give up every overlay plane owned by `surface`.
    ///
    /// The planes are turned off and can be granted to other surfaces, their rotation buffers
    /// are kept for reuse. Use [`on_surface_gone`](Self::on_surface_gone) to tear them down
    /// completely once the surface is destroyed.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn release_planes(&mut self, surface: SurfaceId) {
        for plane in self.planes.planes_of(surface) {
            self.planes.relinquish(&mut self.device, plane, surface);
        }
    }

    /// Turn off every overlay plane and release the framebuffers scanned out by full-surface
    /// flips.
    ///
    /// Called automatically when the scheduler is dropped.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn shutdown(&mut self) {
        self.planes.shutdown(&mut self.device);
        let mut released = SmallVec::<[FramebufferId; 2]>::new();
        for (output, fb) in self.scanout.drain(..) {
            if !released.contains(&fb) {
                debug!(?output, ?fb, "Releasing scanout framebuffer");
                self.device.unregister_framebuffer(fb);
                released.push(fb);
            }
        }
        self.active = false;
    }
}

impl<D, A, B> Drop for PresentScheduler<D, A, B>
where
    D: Modesetting,
    A: Allocator<B>,
    B: Buffer,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn full_region<B: Buffer>(buffer: &SwapBuffer<B>) -> Rectangle<i32, BufferCoords> {
    let (w, h) = buffer.backing().buffer().size();
    Rectangle::from_size((w as i32, h as i32).into())
}
