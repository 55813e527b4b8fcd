use smallvec::SmallVec;
use tracing::{debug, instrument, trace};

use super::{
    PresentError, PresentHandler, PresentScheduler, Strategy, SurfaceDirectory, SurfaceId, SurfaceInfo,
    SurfaceKind, SwapKind, Topology,
};
use crate::backend::{
    allocator::{Allocator, Buffer, SwapBuffer},
    drm::{
        planes::{scanout_format, PlaneAssignment},
        Error as DrmError, Modesetting, OutputId, PlaneId,
    },
};

impl<D, A, B> PresentScheduler<D, A, B>
where
    D: Modesetting,
    A: Allocator<B>,
    B: Buffer,
{
    /// Decide how a swap of `surface` from `back` to `front` would be presented.
    ///
    /// With `sprite` set the surface asks to be presented on overlay planes reserved for the
    /// given consumers. The planes are granted to the surface as part of the decision and
    /// stay owned by it until the surface is gone or moves to other outputs.
    #[instrument(level = "trace", parent = &self.span, skip(self, handler, front, back))]
    pub fn decide<H: PresentHandler<B>>(
        &mut self,
        handler: &H,
        surface: SurfaceId,
        front: &SwapBuffer<B>,
        back: &SwapBuffer<B>,
        sprite: Option<PlaneAssignment>,
    ) -> Strategy {
        self.decide_kind(handler, surface, front, back, sprite).strategy()
    }

    pub(super) fn decide_kind<H: SurfaceDirectory>(
        &mut self,
        handler: &H,
        surface: SurfaceId,
        front: &SwapBuffer<B>,
        back: &SwapBuffer<B>,
        sprite: Option<PlaneAssignment>,
    ) -> SwapKind {
        let Some(info) = handler.resolve(surface) else {
            debug!(?surface, "Unknown surface, blitting");
            return SwapKind::Blit;
        };
        let outputs = handler.outputs_for(surface);
        if info.kind == SurfaceKind::Offscreen || outputs.is_empty() {
            trace!(?surface, "Surface not on screen, blitting");
            return SwapKind::Blit;
        }

        match sprite {
            None => {
                if self.flip_possible(handler, &info, front, back) {
                    SwapKind::Flip
                } else {
                    SwapKind::Blit
                }
            }
            Some(requested) => match self.grant_planes(handler, surface, &outputs, back, requested) {
                Ok(planes) => SwapKind::PlaneFlip { planes },
                Err(err) => {
                    debug!(?surface, "Plane flip not possible, blitting: {}", err);
                    SwapKind::Blit
                }
            },
        }
    }

    /// Checks if the whole surface can be flipped from `back` to `front`
    pub(super) fn flip_possible<H: SurfaceDirectory>(
        &self,
        handler: &H,
        info: &SurfaceInfo,
        front: &SwapBuffer<B>,
        back: &SwapBuffer<B>,
    ) -> bool {
        if !info.can_flip || self.config.shadow_scanout || self.config.tear_free_blit {
            return false;
        }
        if !front.same_layout(back) {
            trace!("Buffer layouts differ, not flipping");
            return false;
        }
        handler
            .active_outputs()
            .into_iter()
            .all(|output| !handler.rotation_of(output).is_rotated())
    }

    /// Grant one plane per participating output to `surface`.
    ///
    /// Either every participating output gets a plane or none does: on failure the planes
    /// granted by this call are released again, planes the surface already owned are kept.
    fn grant_planes<H: SurfaceDirectory>(
        &mut self,
        handler: &H,
        surface: SurfaceId,
        outputs: &[OutputId],
        back: &SwapBuffer<B>,
        requested: PlaneAssignment,
    ) -> Result<SmallVec<[PlaneId; 2]>, PresentError> {
        if !self.active {
            return Err(DrmError::DeviceInactive.into());
        }
        let topology = handler.topology_of(surface);
        let targets: SmallVec<[OutputId; 2]> = match topology {
            Topology::Clone => outputs.iter().copied().collect(),
            Topology::Single | Topology::Extended => outputs.iter().copied().take(1).collect(),
        };
        if targets.is_empty() {
            return Err(PresentError::NotVisible(surface));
        }
        if let Some(output) = targets
            .iter()
            .copied()
            .find(|output| handler.rotation_of(*output).is_rotated())
        {
            return Err(PresentError::OutputRotated(output));
        }

        if topology == Topology::Extended {
            for plane in self.planes.planes_of(surface) {
                let output = self.planes.plane(plane).and_then(|p| p.state().output);
                if output.map_or(true, |output| !targets.contains(&output)) {
                    debug!(?plane, ?output, "Surface left output, releasing plane");
                    self.planes.relinquish(&mut self.device, plane, surface);
                }
            }
        }

        let format = scanout_format(back.backing().buffer().bpp())?;

        let mut granted = SmallVec::<[PlaneId; 2]>::new();
        let mut fresh = SmallVec::<[PlaneId; 2]>::new();
        for output in targets.iter().copied() {
            if let Some(plane) = self.planes.plane_for(surface, output) {
                granted.push(plane);
                continue;
            }
            match self.planes.grab(surface, output, requested) {
                Some(plane) => {
                    granted.push(plane);
                    fresh.push(plane);
                }
                None => {
                    self.release_fresh(&fresh, surface);
                    return Err(PresentError::NoPlaneAvailable(output));
                }
            }
        }

        if let Some(plane) = granted
            .iter()
            .copied()
            .find(|plane| !self.planes.plane(*plane).is_some_and(|p| p.supports_format(format)))
        {
            self.release_fresh(&fresh, surface);
            return Err(DrmError::UnsupportedFormat { plane, format }.into());
        }

        let first = granted[0];
        let result = match self.planes.plane_mut(first) {
            Some(plane) => {
                let template = back.backing();
                plane
                    .rotation_mut()
                    .ensure(template.buffer(), &mut self.allocator)
                    .map_err(|err| PresentError::Allocation(Box::new(err)))
            }
            None => Err(DrmError::UnknownPlane(first).into()),
        };
        if let Err(err) = result {
            self.release_fresh(&fresh, surface);
            return Err(err);
        }

        trace!(?surface, planes = ?granted, "Planes granted");
        Ok(granted)
    }

    fn release_fresh(&mut self, fresh: &[PlaneId], surface: SurfaceId) {
        for plane in fresh {
            self.planes.release(*plane, surface);
        }
    }
}
