//! Registry and arbitration of hardware overlay planes
//!
//! The set of planes is enumerated once when the registry is created and never changes
//! afterwards. Each plane can be owned by at most one surface at a time, ownership is
//! requested through [`PlaneRegistry::grab`] and given up through [`PlaneRegistry::release`].

use smallvec::SmallVec;
use tracing::{debug, info, trace, warn};

use super::{Error, FramebufferId, Modesetting, OutputId, OutputMask, PlaneId, PlaneInfo};
use crate::backend::allocator::{Buffer, Fourcc, RotationRing};
use crate::present::SurfaceId;
use crate::utils::{Buffer as BufferCoords, Physical, Rectangle};

bitflags::bitflags! {
    /// Consumers a plane may be reserved for
    ///
    /// An empty assignment means the plane is available to every consumer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlaneAssignment: u32 {
        /// Output of hardware accelerated video decoding
        const VIDEO_ACCEL = 0b0001;
        /// 3D rendering clients
        const GL = 0b0010;
        /// Video overlay clients
        const VIDEO_OVERLAY = 0b0100;
    }
}

impl PlaneAssignment {
    /// Parse an assignment from its single character configuration code
    ///
    /// `V` stands for video acceleration, `G` for 3D rendering and `X` for the video overlay.
    pub fn from_code(code: char) -> Option<PlaneAssignment> {
        match code.to_ascii_uppercase() {
            'V' => Some(PlaneAssignment::VIDEO_ACCEL),
            'G' => Some(PlaneAssignment::GL),
            'X' => Some(PlaneAssignment::VIDEO_OVERLAY),
            _ => None,
        }
    }
}

/// Pick the scanout format for a buffer with `bpp` bits per pixel
pub fn scanout_format(bpp: u32) -> Result<Fourcc, Error> {
    match bpp {
        16 => Ok(Fourcc::Rgb565),
        32 => Ok(Fourcc::Xrgb8888),
        bpp => Err(Error::UnsupportedPixelDepth(bpp)),
    }
}

/// Transient state of a plane
///
/// Everything in here is reset once the plane is released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaneState {
    /// The plane is owned by a surface
    pub locked: bool,
    /// The plane is scanning out a framebuffer
    pub enabled: bool,
    /// Surface owning the plane
    pub owner: Option<SurfaceId>,
    /// Output the plane is attached to
    pub output: Option<OutputId>,
    /// Framebuffer currently scanned out
    pub fb: Option<FramebufferId>,
    /// Framebuffer scanned out before the last flip
    pub old_fb: Option<FramebufferId>,
    /// Area of the framebuffer being scanned out
    pub src: Rectangle<i32, BufferCoords>,
    /// Area of the output being scanned out to
    pub dst: Rectangle<i32, Physical>,
    /// Last painted region
    pub region: Rectangle<i32, Physical>,
}

/// A hardware overlay plane
#[derive(Debug)]
pub struct Plane<B: Buffer> {
    info: PlaneInfo,
    assignment: PlaneAssignment,
    state: PlaneState,
    rotation: RotationRing<B>,
}

impl<B: Buffer> Plane<B> {
    fn new(info: PlaneInfo, assignment: PlaneAssignment) -> Self {
        Plane {
            info,
            assignment,
            state: PlaneState::default(),
            rotation: RotationRing::new(),
        }
    }

    /// Identifier of the plane
    pub fn id(&self) -> PlaneId {
        self.info.id
    }

    /// Outputs the plane can be attached to
    pub fn possible_outputs(&self) -> OutputMask {
        self.info.possible_outputs
    }

    /// Checks if the plane can scan out `format`
    pub fn supports_format(&self, format: Fourcc) -> bool {
        self.info.formats.is_empty() || self.info.formats.contains(&format)
    }

    /// Consumers the plane is reserved for
    pub fn assignment(&self) -> PlaneAssignment {
        self.assignment
    }

    /// Current state of the plane
    pub fn state(&self) -> &PlaneState {
        &self.state
    }

    /// Returns true if the plane is owned by a surface
    pub fn is_locked(&self) -> bool {
        self.state.locked
    }

    /// Returns true if the plane is scanning out a framebuffer
    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    /// Surface owning the plane
    pub fn owner(&self) -> Option<SurfaceId> {
        self.state.owner
    }

    /// Rotation buffers of the plane
    pub fn rotation(&self) -> &RotationRing<B> {
        &self.rotation
    }

    pub(crate) fn state_mut(&mut self) -> &mut PlaneState {
        &mut self.state
    }

    pub(crate) fn rotation_mut(&mut self) -> &mut RotationRing<B> {
        &mut self.rotation
    }

    fn is_eligible(&self, output: OutputId, requested: PlaneAssignment) -> bool {
        self.info.possible_outputs.contains(output)
            && !self.state.locked
            && (self.assignment.is_empty() || self.assignment.intersects(requested))
    }
}

/// The fixed pool of overlay planes of a device
#[derive(Debug)]
pub struct PlaneRegistry<B: Buffer> {
    planes: Vec<Plane<B>>,
}

impl<B: Buffer> PlaneRegistry<B> {
    /// Build the pool from the enumerated planes.
    ///
    /// The order of `planes` is preserved and decides which plane is handed out first.
    /// Plane `i` is reserved for `assignments[i]`, planes without an entry are unrestricted.
    pub fn new(planes: Vec<PlaneInfo>, assignments: &[PlaneAssignment]) -> Self {
        let planes = planes
            .into_iter()
            .enumerate()
            .map(|(idx, info)| {
                let assignment = assignments.get(idx).copied().unwrap_or_default();
                debug!(plane = ?info.id, outputs = ?info.possible_outputs, ?assignment, "Adding plane");
                Plane::new(info, assignment)
            })
            .collect::<Vec<_>>();
        info!("Initialized {} overlay planes", planes.len());
        PlaneRegistry { planes }
    }

    /// Enumerate the planes of `device` and build the pool
    pub fn from_device<D: Modesetting>(device: &D, assignments: &[PlaneAssignment]) -> Result<Self, Error> {
        Ok(Self::new(device.plane_resources()?, assignments))
    }

    /// Iterate over all planes in registry order
    pub fn planes(&self) -> impl Iterator<Item = &Plane<B>> {
        self.planes.iter()
    }

    /// Number of planes
    pub fn len(&self) -> usize {
        self.planes.len()
    }

    /// Returns true if the device has no overlay planes
    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    /// Access a plane
    pub fn plane(&self, plane: PlaneId) -> Option<&Plane<B>> {
        self.planes.iter().find(|p| p.id() == plane)
    }

    pub(crate) fn plane_mut(&mut self, plane: PlaneId) -> Option<&mut Plane<B>> {
        self.planes.iter_mut().find(|p| p.id() == plane)
    }

    /// Grant exclusive use of a plane attached to `output` to `surface`.
    ///
    /// The first plane in registry order, which can drive `output`, is not locked and is either
    /// unrestricted or reserved for one of the `requested` consumers, is handed out.
    pub fn grab(
        &mut self,
        surface: SurfaceId,
        output: OutputId,
        requested: PlaneAssignment,
    ) -> Option<PlaneId> {
        let Some(plane) = self.planes.iter_mut().find(|p| p.is_eligible(output, requested)) else {
            debug!(?surface, ?output, ?requested, "No plane available");
            return None;
        };

        plane.state.locked = true;
        plane.state.owner = Some(surface);
        plane.state.output = Some(output);
        trace!(plane = ?plane.id(), ?surface, ?output, "Plane grabbed");
        Some(plane.id())
    }

    /// Give up ownership of `plane`.
    ///
    /// Clears the owner and all transient state, rotation buffers are kept. Returns false and
    /// does nothing if `surface` does not own the plane.
    pub fn release(&mut self, plane: PlaneId, surface: SurfaceId) -> bool {
        let Some(plane) = self.plane_mut(plane) else {
            warn!(?plane, "Releasing unknown plane");
            return false;
        };
        if plane.state.owner != Some(surface) {
            debug!(plane = ?plane.id(), ?surface, owner = ?plane.state.owner, "Plane not owned by surface");
            return false;
        }

        if plane.state.enabled {
            warn!(plane = ?plane.id(), "Releasing a plane that is still scanning out");
        }
        plane.state = PlaneState::default();
        trace!(plane = ?plane.id(), ?surface, "Plane released");
        true
    }

    /// Plane owned by `surface` on `output`
    pub fn plane_for(&self, surface: SurfaceId, output: OutputId) -> Option<PlaneId> {
        self.planes
            .iter()
            .find(|p| p.state.locked && p.state.owner == Some(surface) && p.state.output == Some(output))
            .map(Plane::id)
    }

    /// All planes owned by `surface`
    pub fn planes_of(&self, surface: SurfaceId) -> SmallVec<[PlaneId; 4]> {
        self.planes
            .iter()
            .filter(|p| p.state.owner == Some(surface))
            .map(Plane::id)
            .collect()
    }

    /// Returns true if any plane scans out `fb`
    pub fn references(&self, fb: FramebufferId) -> bool {
        self.planes.iter().any(|p| p.state.fb == Some(fb))
    }

    /// Turn off `plane`, if it is scanning out.
    pub fn disable<D: Modesetting>(&mut self, device: &mut D, plane: PlaneId) {
        let Some(plane) = self.plane_mut(plane) else {
            return;
        };
        if !plane.state.enabled {
            return;
        }

        match plane.state.output {
            Some(output) => {
                if let Err(err) = device.disable_plane(plane.id(), output) {
                    warn!(plane = ?plane.id(), ?output, "Failed to disable plane: {}", err);
                }
            }
            None => warn!(plane = ?plane.id(), "Enabled plane without an output"),
        }
        plane.state.enabled = false;
    }

    /// Turn off `plane`, release the framebuffer it scans out and give up its ownership.
    ///
    /// Rotation buffers are kept for the next owner. The previous framebuffer is owned by the
    /// swap that replaced it and released once that swap completes. Returns false and does
    /// nothing if `surface` does not own the plane.
    pub fn relinquish<D: Modesetting>(&mut self, device: &mut D, plane: PlaneId, surface: SurfaceId) -> bool {
        match self.plane(plane) {
            None => {
                warn!(?plane, "Relinquishing unknown plane");
                return false;
            }
            Some(p) if p.state.owner != Some(surface) => return false,
            Some(_) => {}
        }

        self.disable(device, plane);
        let fb = self.plane_mut(plane).and_then(|p| p.state.fb.take());
        if let Some(fb) = fb {
            // clone flips scan out one framebuffer on several planes
            if !self.references(fb) {
                device.unregister_framebuffer(fb);
            }
        }
        self.release(plane, surface)
    }

    /// [`relinquish`](PlaneRegistry::relinquish) `plane` and destroy its rotation buffers
    pub fn reclaim<D: Modesetting>(&mut self, device: &mut D, plane: PlaneId, surface: SurfaceId) {
        if self.relinquish(device, plane, surface) {
            if let Some(p) = self.plane_mut(plane) {
                p.rotation.destroy();
            }
        }
    }

    /// Reclaim every locked plane, e.g. because the device is paused.
    pub fn suspend<D: Modesetting>(&mut self, device: &mut D) {
        let locked = self
            .planes
            .iter()
            .filter(|p| p.state.locked)
            .filter_map(|p| p.state.owner.map(|owner| (p.id(), owner)))
            .collect::<SmallVec<[_; 4]>>();
        for (plane, owner) in locked {
            self.reclaim(device, plane, owner);
        }
    }

    /// Turn off every plane still scanning out
    pub fn shutdown<D: Modesetting>(&mut self, device: &mut D) {
        let enabled = self
            .planes
            .iter()
            .filter(|p| p.state.enabled)
            .map(Plane::id)
            .collect::<SmallVec<[_; 4]>>();
        for plane in enabled {
            self.disable(device, plane);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test::{DummyBuffer, DummyDevice};

    fn registry(assignments: &[PlaneAssignment]) -> PlaneRegistry<DummyBuffer> {
        let device = DummyDevice::new(2, 2);
        PlaneRegistry::from_device(&device, assignments).unwrap()
    }

    #[test]
    fn registry_order_is_preserved() {
        let registry = registry(&[]);
        let ids = registry.planes().map(Plane::id).collect::<Vec<_>>();
        assert_eq!(ids, vec![PlaneId(0), PlaneId(1), PlaneId(2), PlaneId(3)]);
    }

    #[test]
    fn grab_is_exclusive() {
        let mut registry = registry(&[]);
        let output = OutputId(0);

        let first = registry.grab(SurfaceId(1), output, PlaneAssignment::GL).unwrap();
        let second = registry.grab(SurfaceId(2), output, PlaneAssignment::GL).unwrap();
        assert_ne!(first, second);
        // planes 2 and 3 only drive output 1
        assert_eq!(registry.grab(SurfaceId(3), output, PlaneAssignment::GL), None);

        assert!(registry.plane(first).unwrap().is_locked());
        assert_eq!(registry.plane(first).unwrap().owner(), Some(SurfaceId(1)));
    }

    #[test]
    fn grab_respects_assignment() {
        let mut registry = registry(&[PlaneAssignment::VIDEO_ACCEL, PlaneAssignment::GL]);

        assert_eq!(
            registry.grab(SurfaceId(1), OutputId(0), PlaneAssignment::GL),
            Some(PlaneId(1))
        );
        assert_eq!(
            registry.grab(SurfaceId(2), OutputId(0), PlaneAssignment::GL),
            None
        );
        assert_eq!(
            registry.grab(
                SurfaceId(2),
                OutputId(0),
                PlaneAssignment::VIDEO_ACCEL | PlaneAssignment::VIDEO_OVERLAY
            ),
            Some(PlaneId(0))
        );
    }

    #[test]
    fn release_requires_ownership() {
        let mut registry = registry(&[]);
        let plane = registry.grab(SurfaceId(1), OutputId(1), PlaneAssignment::GL).unwrap();

        assert!(!registry.release(plane, SurfaceId(2)));
        assert!(registry.plane(plane).unwrap().is_locked());

        assert!(registry.release(plane, SurfaceId(1)));
        assert!(!registry.plane(plane).unwrap().is_locked());
        assert_eq!(registry.plane(plane).unwrap().owner(), None);
        assert!(!registry.release(plane, SurfaceId(1)));

        // released planes can be handed to another surface
        assert_eq!(
            registry.grab(SurfaceId(2), OutputId(1), PlaneAssignment::GL),
            Some(plane)
        );
    }

    #[test]
    fn lookup_by_surface_and_output() {
        let mut registry = registry(&[]);
        let on_first = registry.grab(SurfaceId(1), OutputId(0), PlaneAssignment::GL).unwrap();
        let on_second = registry.grab(SurfaceId(1), OutputId(1), PlaneAssignment::GL).unwrap();

        assert_eq!(registry.plane_for(SurfaceId(1), OutputId(0)), Some(on_first));
        assert_eq!(registry.plane_for(SurfaceId(1), OutputId(1)), Some(on_second));
        assert_eq!(registry.plane_for(SurfaceId(2), OutputId(0)), None);
        assert_eq!(registry.planes_of(SurfaceId(1)).as_slice(), &[on_first, on_second]);
    }

    #[test]
    fn shutdown_disables_enabled_planes() {
        let mut device = DummyDevice::new(2, 2);
        let mut registry = PlaneRegistry::<DummyBuffer>::from_device(&device, &[]).unwrap();
        let plane = registry.grab(SurfaceId(1), OutputId(0), PlaneAssignment::GL).unwrap();
        registry.plane_mut(plane).unwrap().state_mut().enabled = true;

        registry.shutdown(&mut device);
        assert_eq!(device.disabled_planes(), &[plane]);
        assert!(!registry.plane(plane).unwrap().is_enabled());

        registry.shutdown(&mut device);
        assert_eq!(device.disabled_planes().len(), 1);
    }

    #[test]
    fn suspend_releases_locked_planes() {
        let mut device = DummyDevice::new(2, 2);
        let mut registry = PlaneRegistry::<DummyBuffer>::from_device(&device, &[]).unwrap();
        let plane = registry.grab(SurfaceId(1), OutputId(0), PlaneAssignment::GL).unwrap();
        registry.plane_mut(plane).unwrap().state_mut().enabled = true;
        registry.grab(SurfaceId(2), OutputId(1), PlaneAssignment::GL).unwrap();

        registry.suspend(&mut device);
        assert!(registry.planes().all(|p| !p.is_locked() && !p.is_enabled()));
        assert_eq!(device.disabled_planes(), &[plane]);
    }

    #[test]
    fn reclaim_releases_scanout_framebuffer() {
        let mut device = DummyDevice::new(2, 2);
        let mut registry = PlaneRegistry::<DummyBuffer>::from_device(&device, &[]).unwrap();
        let plane = registry.grab(SurfaceId(1), OutputId(0), PlaneAssignment::GL).unwrap();
        {
            let state = registry.plane_mut(plane).unwrap().state_mut();
            state.enabled = true;
            state.fb = Some(FramebufferId(7));
            state.old_fb = Some(FramebufferId(6));
        }

        // not the owner
        registry.reclaim(&mut device, plane, SurfaceId(2));
        assert!(registry.plane(plane).unwrap().is_enabled());

        registry.reclaim(&mut device, plane, SurfaceId(1));
        assert_eq!(device.disabled_planes(), &[plane]);
        assert_eq!(device.unregistered_framebuffers(), &[FramebufferId(7)]);
        assert_eq!(registry.plane(plane).unwrap().state(), &PlaneState::default());

        registry.reclaim(&mut device, plane, SurfaceId(1));
        assert_eq!(device.unregistered_framebuffers().len(), 1);
    }

    #[test]
    fn shared_framebuffer_released_once() {
        let mut device = DummyDevice::new(2, 2);
        let mut registry = PlaneRegistry::<DummyBuffer>::from_device(&device, &[]).unwrap();
        let first = registry.grab(SurfaceId(1), OutputId(0), PlaneAssignment::GL).unwrap();
        let second = registry.grab(SurfaceId(1), OutputId(1), PlaneAssignment::GL).unwrap();
        for plane in [first, second] {
            let state = registry.plane_mut(plane).unwrap().state_mut();
            state.enabled = true;
            state.fb = Some(FramebufferId(3));
        }

        assert!(registry.relinquish(&mut device, first, SurfaceId(1)));
        assert!(registry.references(FramebufferId(3)));
        assert!(device.unregistered_framebuffers().is_empty());
        assert!(registry.relinquish(&mut device, second, SurfaceId(1)));
        assert_eq!(device.unregistered_framebuffers(), &[FramebufferId(3)]);
        assert_eq!(device.disabled_planes(), &[first, second]);
        assert!(!registry.relinquish(&mut device, second, SurfaceId(1)));
    }

    #[test]
    fn scanout_format_from_depth() {
        assert_eq!(scanout_format(16).unwrap(), Fourcc::Rgb565);
        assert_eq!(scanout_format(32).unwrap(), Fourcc::Xrgb8888);
        assert!(matches!(scanout_format(24), Err(Error::UnsupportedPixelDepth(24))));
    }

    #[test]
    fn assignment_codes() {
        assert_eq!(PlaneAssignment::from_code('V'), Some(PlaneAssignment::VIDEO_ACCEL));
        assert_eq!(PlaneAssignment::from_code('g'), Some(PlaneAssignment::GL));
        assert_eq!(PlaneAssignment::from_code('X'), Some(PlaneAssignment::VIDEO_OVERLAY));
        assert_eq!(PlaneAssignment::from_code('?'), None);
    }
}
