use std::time::Duration;

use tracing::{debug, instrument, trace, warn};

use super::{
    full_region, ClientId, CompletionKind, PresentError, PresentHandler, PresentNotifier, PresentScheduler,
    Strategy, SurfaceDirectory, SurfaceId, SurfaceKind, SwapKind, SwapRecord, SwapToken,
};
use crate::backend::{
    allocator::{Allocator, Buffer, SwapBuffer},
    drm::{
        planes::PlaneAssignment, Error as DrmError, EventMetadata, Modesetting, OutputId, RetraceRequest,
        RetraceTarget,
    },
};
use crate::utils::Sequence;

/// A buffer swap requested by a client
#[derive(Debug)]
pub struct SwapRequest<'a, B: Buffer> {
    /// Client requesting the swap
    pub client: ClientId,
    /// Surface to present to
    pub surface: SurfaceId,
    /// Buffer currently displayed
    pub front: &'a SwapBuffer<B>,
    /// Buffer holding the new contents
    pub back: &'a SwapBuffer<B>,
    /// Retrace sequence the new contents should become visible at
    pub target: u64,
    /// Present on retraces whose sequence modulo `divisor` equals `remainder`, once the
    /// target has passed. Zero disables this.
    pub divisor: u64,
    /// See `divisor`
    pub remainder: u64,
    /// Present on an overlay plane reserved for the given consumers
    pub sprite: Option<PlaneAssignment>,
}

/// Outcome of scheduling a swap or wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSwap {
    /// Presentation path
    pub strategy: Strategy,
    /// Retrace sequence the swap is expected to become visible at, zero if it was carried
    /// out immediately
    pub sequence: Sequence,
    /// Token of the in-flight swap, `None` if it was carried out immediately
    pub token: Option<SwapToken>,
}

impl ScheduledSwap {
    const IMMEDIATE: ScheduledSwap = ScheduledSwap {
        strategy: Strategy::Blit,
        sequence: Sequence::ZERO,
        token: None,
    };

    /// Returns true if the swap was carried out without waiting for a retrace
    pub fn is_immediate(&self) -> bool {
        self.token.is_none()
    }
}

impl<D, A, B> PresentScheduler<D, A, B>
where
    D: Modesetting,
    A: Allocator<B>,
    B: Buffer,
{
    /// Schedule a buffer swap.
    ///
    /// The swap is carried out once the target retrace is reached and the client is notified
    /// through [`PresentNotifier::notify_swap_complete`](super::PresentNotifier). Swaps that
    /// cannot wait for a retrace, because the surface is not on screen, tearing is forced
    /// or the device failed, are blitted and notified right away with zeroed timing. This
    /// includes swaps requesting an overlay plane that cannot be granted.
    ///
    /// The returned sequence accounts for flips becoming visible one retrace after they
    /// were queued.
    #[instrument(
        level = "debug",
        parent = &self.span,
        skip(self, handler, request),
        fields(surface = ?request.surface)
    )]
    #[profiling::function]
    pub fn schedule_swap<H: PresentHandler<B>>(
        &mut self,
        handler: &mut H,
        request: SwapRequest<'_, B>,
    ) -> ScheduledSwap {
        let SwapRequest {
            client,
            surface,
            front,
            back,
            target,
            divisor,
            remainder,
            sprite,
        } = request;

        let output = match self.primary_output(&*handler, surface) {
            Ok(output) => output,
            Err(err) => {
                trace!("Presenting immediately: {}", err);
                return immediate_blit(handler, client, surface, front, back);
            }
        };
        if self.config.tear_free_blit && sprite.is_none() {
            return immediate_blit(handler, client, surface, front, back);
        }

        let wants_plane = sprite.is_some();
        let kind = self.decide_kind(&*handler, surface, front, back, sprite);
        if wants_plane && kind == SwapKind::Blit {
            trace!("No overlay plane available, presenting immediately");
            return immediate_blit(handler, client, surface, front, back);
        }
        let strategy = kind.strategy();
        let flip = kind.is_flip();
        let next_on_miss = kind != SwapKind::Flip;

        let token = self
            .records
            .insert(SwapRecord::new(client, surface, kind, output, Some((front, back))));
        self.lifecycle.link(token, client, surface);

        let target = Sequence::truncate(target);
        let divisor = Sequence::truncate(divisor).raw();
        let remainder = Sequence::truncate(remainder).raw();
        match self.issue_wait(output, target, divisor, remainder, flip, next_on_miss, token) {
            Ok(reply) => {
                let sequence = reply.sequence.wrapping_add(flip as u32);
                if let Some(record) = self.records.get_mut(token) {
                    record.sequence = sequence;
                }
                debug!(?token, ?strategy, sequence = sequence.raw(), "Swap scheduled");
                ScheduledSwap {
                    strategy,
                    sequence,
                    token: Some(token),
                }
            }
            Err(err) => {
                warn!(?output, "Failed to wait for retrace, presenting immediately: {}", err);
                self.abort(token);
                immediate_blit(handler, client, surface, front, back)
            }
        }
    }

    /// Wait for a retrace without presenting anything.
    ///
    /// The client is notified through
    /// [`PresentNotifier::notify_wait_complete`](super::PresentNotifier) once the retrace is
    /// reached. If the wait cannot be issued, the client is notified right away with the
    /// requested target and zero time.
    #[instrument(level = "debug", parent = &self.span, skip(self, handler))]
    pub fn schedule_wait<H: PresentHandler<B>>(
        &mut self,
        handler: &mut H,
        client: ClientId,
        surface: SurfaceId,
        target: u64,
        divisor: u64,
        remainder: u64,
    ) -> ScheduledSwap {
        let target = Sequence::truncate(target);
        let output = match self.primary_output(&*handler, surface) {
            Ok(output) => output,
            Err(err) => {
                debug!("Completing wait immediately: {}", err);
                return immediate_wait(handler, client, surface, target);
            }
        };

        let token = self
            .records
            .insert(SwapRecord::new(client, surface, SwapKind::Wait, output, None));
        self.lifecycle.link(token, client, surface);

        let divisor = Sequence::truncate(divisor).raw();
        let remainder = Sequence::truncate(remainder).raw();
        match self.issue_wait(output, target, divisor, remainder, false, true, token) {
            Ok(reply) => {
                if let Some(record) = self.records.get_mut(token) {
                    record.sequence = reply.sequence;
                }
                ScheduledSwap {
                    strategy: Strategy::Wait,
                    sequence: reply.sequence,
                    token: Some(token),
                }
            }
            Err(err) => {
                warn!(?output, "Failed to wait for retrace: {}", err);
                self.abort(token);
                immediate_wait(handler, client, surface, target)
            }
        }
    }

    /// Current retrace sequence and timestamp of the primary output of `surface`.
    ///
    /// Zero if the surface is not on screen or the device cannot be queried.
    #[instrument(level = "trace", parent = &self.span, skip(self, handler))]
    pub fn current_msc<H: SurfaceDirectory>(&mut self, handler: &H, surface: SurfaceId) -> EventMetadata {
        let result = self
            .primary_output(handler, surface)
            .and_then(|output| Ok(self.device.request_retrace_wait(RetraceRequest::query(output))?));
        match result {
            Ok(metadata) => metadata,
            Err(err) => {
                trace!("No retrace counter: {}", err);
                EventMetadata::ZERO
            }
        }
    }

    fn primary_output<H: SurfaceDirectory>(
        &self,
        handler: &H,
        surface: SurfaceId,
    ) -> Result<OutputId, PresentError> {
        let info = handler
            .resolve(surface)
            .ok_or(PresentError::UnknownSurface(surface))?;
        if info.kind == SurfaceKind::Offscreen {
            return Err(PresentError::NotVisible(surface));
        }
        handler
            .outputs_for(surface)
            .first()
            .copied()
            .ok_or(PresentError::NotVisible(surface))
    }

    #[allow(clippy::too_many_arguments)]
    fn issue_wait(
        &mut self,
        output: OutputId,
        target: Sequence,
        divisor: u32,
        remainder: u32,
        flip: bool,
        next_on_miss: bool,
        token: SwapToken,
    ) -> Result<EventMetadata, PresentError> {
        if !self.active {
            return Err(DrmError::DeviceInactive.into());
        }
        let current = self.device.request_retrace_wait(RetraceRequest::query(output))?;
        let target = current.sequence.retrace_target(target, divisor, remainder, flip);
        trace!(
            current = current.sequence.raw(),
            target = target.raw(),
            "Waiting for retrace"
        );
        Ok(self.device.request_retrace_wait(RetraceRequest {
            output,
            target: RetraceTarget::Absolute(target),
            next_on_miss,
            token: Some(token),
        })?)
    }

    /// Drop a record whose wait could not be issued
    fn abort(&mut self, token: SwapToken) {
        let Some(record) = self.finish(token) else {
            return;
        };
        if let (SwapKind::PlaneFlip { planes }, Some(surface)) = (&record.kind, record.surface) {
            for plane in planes {
                if self.planes.plane(*plane).is_some_and(|p| !p.is_enabled()) {
                    self.planes.release(*plane, surface);
                }
            }
        }
    }
}

fn immediate_blit<B: Buffer, H: PresentHandler<B>>(
    handler: &mut H,
    client: ClientId,
    surface: SurfaceId,
    front: &SwapBuffer<B>,
    back: &SwapBuffer<B>,
) -> ScheduledSwap {
    handler.copy_region(surface, full_region(back), front, back);
    handler.notify_swap_complete(client, surface, Sequence::ZERO, Duration::ZERO, CompletionKind::Blit);
    ScheduledSwap::IMMEDIATE
}

fn immediate_wait<H: PresentNotifier>(
    handler: &mut H,
    client: ClientId,
    surface: SurfaceId,
    target: Sequence,
) -> ScheduledSwap {
    handler.notify_wait_complete(client, surface, target, Duration::ZERO);
    ScheduledSwap {
        strategy: Strategy::Wait,
        sequence: target,
        token: None,
    }
}
