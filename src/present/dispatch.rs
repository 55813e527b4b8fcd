use smallvec::SmallVec;
use tracing::{debug, instrument, trace, warn};

use super::{
    full_region, CompletionKind, FlipState, PresentEvent, PresentHandler, PresentScheduler, SurfaceId,
    SwapKind, SwapRecord, SwapToken, Topology,
};
use crate::backend::{
    allocator::{Allocator, Buffer, SwapBuffer},
    drm::{EventMetadata, FlipTarget, FramebufferId, Modesetting, OutputId, PlaneId},
};
use crate::utils::{Rectangle, Sequence};

impl<D, A, B> PresentScheduler<D, A, B>
where
    D: Modesetting,
    A: Allocator<B>,
    B: Buffer,
{
    /// Process an event of the modesetting device
    #[profiling::function]
    pub fn dispatch<H: PresentHandler<B>>(&mut self, handler: &mut H, event: PresentEvent) {
        match event {
            PresentEvent::Retrace {
                output,
                metadata,
                token,
            } => self.on_retrace(handler, output, metadata, token),
            PresentEvent::FlipComplete {
                output,
                metadata,
                token,
            } => self.on_flip_complete(handler, output, metadata, token),
        }
    }

    /// A retrace wait carrying `token` resolved.
    ///
    /// Carries out the swap the wait was issued for.
    #[instrument(level = "trace", parent = &self.span, skip(self, handler))]
    pub fn on_retrace<H: PresentHandler<B>>(
        &mut self,
        handler: &mut H,
        output: OutputId,
        metadata: EventMetadata,
        token: Option<SwapToken>,
    ) {
        let Some(token) = token else {
            trace!("Unsolicited retrace");
            return;
        };
        let Some(record) = self.records.get(token) else {
            debug!(?token, "Discarding retrace of a resolved swap");
            return;
        };
        if record.state != FlipState::Pending {
            warn!(?token, "Retrace for a swap that is already flipping");
            return;
        }

        let surface = match record.surface {
            Some(surface) if handler.resolve(surface).is_some() => surface,
            _ => {
                debug!(?token, "Surface gone, cancelling swap");
                self.finish(token);
                return;
            }
        };
        let metadata = self.sanitize(record.retrace_sequence(), metadata);

        match record.kind.clone() {
            SwapKind::Wait => {
                let Some(record) = self.finish(token) else {
                    return;
                };
                if let Some(client) = record.client {
                    handler.notify_wait_complete(client, surface, metadata.sequence, metadata.time);
                }
            }
            SwapKind::Blit => self.complete_blit(handler, token, surface, metadata),
            SwapKind::Flip => self.flip_surface(handler, token, surface, metadata),
            SwapKind::PlaneFlip { planes } => self.flip_planes(handler, token, surface, &planes, metadata),
        }
    }

    /// A page flip queued with `token` took effect.
    ///
    /// Once every flip of a swap completed, the framebuffers it replaced are released and the
    /// client is notified.
    #[instrument(level = "trace", parent = &self.span, skip(self, handler))]
    pub fn on_flip_complete<H: PresentHandler<B>>(
        &mut self,
        handler: &mut H,
        output: OutputId,
        metadata: EventMetadata,
        token: Option<SwapToken>,
    ) {
        let Some(token) = token else {
            trace!("Unsolicited flip completion");
            return;
        };
        let Some(record) = self.records.get_mut(token) else {
            debug!(?token, "Discarding flip completion of a resolved swap");
            return;
        };

        match record.state {
            FlipState::Pending => {
                if record.surface.is_none() {
                    debug!(?token, "Surface gone, freeing swap");
                    self.finish(token);
                } else {
                    warn!(?token, "Flip completion for a swap that never flipped");
                }
                return;
            }
            FlipState::Flipping { remaining } if remaining > 1 => {
                record.state = FlipState::Flipping {
                    remaining: remaining - 1,
                };
                trace!(?token, remaining = remaining - 1, "Waiting for more flips");
                return;
            }
            FlipState::Flipping { .. } => {}
        }

        let Some(record) = self.finish(token) else {
            return;
        };
        for fb in &record.retired {
            self.device.unregister_framebuffer(*fb);
        }
        if let SwapKind::PlaneFlip { planes } = &record.kind {
            for plane in planes {
                if let Some(plane) = self.planes.plane_mut(*plane) {
                    let state = plane.state_mut();
                    if state.old_fb.is_some_and(|fb| record.retired.contains(&fb)) {
                        state.old_fb = None;
                    }
                }
            }
        }

        let metadata = self.sanitize(record.sequence, metadata);
        if let (Some(client), Some(surface)) = (record.client, record.surface) {
            handler.notify_swap_complete(
                client,
                surface,
                metadata.sequence,
                metadata.time,
                CompletionKind::Flip,
            );
        }
    }

    /// Remove a record and unlink it from the lifecycle index
    pub(super) fn finish(&mut self, token: SwapToken) -> Option<SwapRecord<B>> {
        let record = self.records.remove(token)?;
        self.lifecycle.unlink(token, record.client, record.surface);
        Some(record)
    }

    fn sanitize(&self, submitted: Sequence, metadata: EventMetadata) -> EventMetadata {
        if metadata.sequence.regressed_from(&submitted, self.config.wrap_threshold) {
            warn!(
                submitted = submitted.raw(),
                completed = metadata.sequence.raw(),
                "Completion went backwards, dropping its timing"
            );
            EventMetadata::ZERO
        } else {
            metadata
        }
    }

    fn complete_blit<H: PresentHandler<B>>(
        &mut self,
        handler: &mut H,
        token: SwapToken,
        surface: SurfaceId,
        metadata: EventMetadata,
    ) {
        let Some(record) = self.finish(token) else {
            return;
        };
        if let (Some(front), Some(back)) = (&record.front, &record.back) {
            handler.copy_region(surface, full_region(back), front, back);
        }
        if let Some(client) = record.client {
            handler.notify_swap_complete(
                client,
                surface,
                metadata.sequence,
                metadata.time,
                CompletionKind::Blit,
            );
        }
    }

    fn flip_surface<H: PresentHandler<B>>(
        &mut self,
        handler: &mut H,
        token: SwapToken,
        surface: SurfaceId,
        metadata: EventMetadata,
    ) {
        let Some(record) = self.records.get(token) else {
            return;
        };
        let (Some(front), Some(back)) = (record.front.clone(), record.back.clone()) else {
            return self.complete_blit(handler, token, surface, metadata);
        };
        let Some(info) = handler.resolve(surface) else {
            return self.complete_blit(handler, token, surface, metadata);
        };
        if !self.flip_possible(&*handler, &info, &front, &back) {
            debug!(?surface, "Surface cannot be flipped anymore, blitting");
            return self.complete_blit(handler, token, surface, metadata);
        }

        let fb = match self.register_framebuffer(&back) {
            Some(fb) => fb,
            None => return self.complete_blit(handler, token, surface, metadata),
        };

        let mut replaced = SmallVec::<[FramebufferId; 2]>::new();
        let mut accepted = 0;
        for output in handler.outputs_for(surface) {
            match self.device.submit_page_flip(FlipTarget::Output(output), fb, Some(token)) {
                Ok(()) => {
                    replaced.extend(self.scanout.insert(output, fb));
                    accepted += 1;
                }
                Err(err) => warn!(?output, "Failed to queue page flip: {}", err),
            }
        }
        if accepted == 0 {
            self.device.unregister_framebuffer(fb);
            return self.complete_blit(handler, token, surface, metadata);
        }

        // outputs that rejected the flip keep scanning out their framebuffer
        let mut retired = SmallVec::<[FramebufferId; 2]>::new();
        for previous in replaced {
            if !retired.contains(&previous) && !self.scanout.values().any(|f| *f == previous) {
                retired.push(previous);
            }
        }
        front.exchange(&back);
        if let Some(record) = self.records.get_mut(token) {
            record.retired.extend(retired);
            record.state = FlipState::Flipping { remaining: accepted };
        }
        trace!(?token, ?fb, outputs = accepted, "Surface flip queued");
    }

    fn flip_planes<H: PresentHandler<B>>(
        &mut self,
        handler: &mut H,
        token: SwapToken,
        surface: SurfaceId,
        planes: &[PlaneId],
        metadata: EventMetadata,
    ) {
        let Some(info) = handler.resolve(surface) else {
            return self.complete_blit(handler, token, surface, metadata);
        };
        let topology = handler.topology_of(surface);
        let outputs = handler.outputs_for(surface);

        let still_valid = planes.iter().all(|plane| {
            self.planes.plane(*plane).is_some_and(|p| {
                p.owner() == Some(surface)
                    && p.state().output.is_some_and(|output| {
                        outputs.contains(&output) && !handler.rotation_of(output).is_rotated()
                    })
            })
        });
        if !still_valid {
            debug!(?surface, "Plane topology changed, blitting");
            for plane in planes {
                self.planes.reclaim(&mut self.device, *plane, surface);
            }
            return self.complete_blit(handler, token, surface, metadata);
        }

        if info.visible.is_empty() {
            trace!(?surface, "Surface is not visible, turning off its planes");
            for plane in planes {
                self.planes.disable(&mut self.device, *plane);
            }
            let Some(record) = self.finish(token) else {
                return;
            };
            if let Some(client) = record.client {
                handler.notify_swap_complete(
                    client,
                    surface,
                    metadata.sequence,
                    metadata.time,
                    CompletionKind::Flip,
                );
            }
            return;
        }

        let Some(back) = self.records.get(token).and_then(|record| record.back.clone()) else {
            return self.complete_blit(handler, token, surface, metadata);
        };
        let fb = match self.register_framebuffer(&back) {
            Some(fb) => fb,
            None => return self.complete_blit(handler, token, surface, metadata),
        };

        let src = full_region(&back);
        let region = Rectangle::bounding_box(info.visible.iter().copied());
        let mut retired = SmallVec::<[FramebufferId; 2]>::new();
        let mut failed = SmallVec::<[PlaneId; 2]>::new();
        let mut accepted = 0;
        for plane_id in planes.iter().copied() {
            let Some(plane) = self.planes.plane_mut(plane_id) else {
                continue;
            };
            let Some(output) = plane.state().output else {
                continue;
            };
            let dst = if topology == Topology::Extended {
                info.geometry.relative_to(handler.output_origin(output))
            } else {
                info.geometry
            };

            let target = FlipTarget::Plane {
                plane: plane_id,
                output,
                src,
                dst,
            };
            match self.device.submit_page_flip(target, fb, Some(token)) {
                Ok(()) => {
                    let state = plane.state_mut();
                    let previous = state.fb.replace(fb);
                    if let Some(previous) = previous {
                        if !retired.contains(&previous) {
                            retired.push(previous);
                        }
                    }
                    state.old_fb = previous;
                    state.enabled = true;
                    state.src = src;
                    state.dst = dst;
                    state.region = region;
                    accepted += 1;
                }
                Err(err) => {
                    warn!(plane = ?plane_id, ?output, "Failed to queue plane flip: {}", err);
                    // the plane is turned off below, so it stops referencing its framebuffer
                    let state = plane.state_mut();
                    state.old_fb = None;
                    if let Some(previous) = state.fb.take() {
                        if !retired.contains(&previous) {
                            retired.push(previous);
                        }
                    }
                    failed.push(plane_id);
                }
            }
        }
        for plane in failed {
            self.planes.disable(&mut self.device, plane);
        }

        if accepted == 0 {
            self.device.unregister_framebuffer(fb);
            for previous in retired {
                if !self.planes.references(previous) {
                    self.device.unregister_framebuffer(previous);
                }
            }
            return self.complete_blit(handler, token, surface, metadata);
        }

        if let Some(first) = planes.first().and_then(|plane| self.planes.plane_mut(*plane)) {
            if first.is_enabled() && !first.rotation_mut().exchange(&back) {
                trace!(plane = ?first.id(), "Rotation buffers missing, not rotating");
            }
        }
        if let Some(record) = self.records.get_mut(token) {
            record.retired = retired;
            record.state = FlipState::Flipping { remaining: accepted };
        }
        trace!(?token, ?fb, planes = accepted, "Plane flip queued");
    }

    fn register_framebuffer(&mut self, buffer: &SwapBuffer<B>) -> Option<FramebufferId> {
        let backing = buffer.backing();
        match self.device.register_framebuffer(backing.buffer(), backing.name()) {
            Ok(fb) => Some(fb),
            Err(err) => {
                warn!("Failed to register framebuffer: {}", err);
                None
            }
        }
    }
}
