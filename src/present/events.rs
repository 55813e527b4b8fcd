use std::sync::mpsc::SendError;

use calloop::{
    channel::{self, Channel, ChannelError, Sender},
    EventSource, Poll, PostAction, Readiness, Token, TokenFactory,
};

use super::SwapToken;
use crate::backend::drm::{EventMetadata, OutputId};

/// Hardware event relevant to the presentation scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentEvent {
    /// A requested retrace happened
    Retrace {
        /// Output the retrace happened on
        output: OutputId,
        /// Sequence and timestamp of the retrace
        metadata: EventMetadata,
        /// Token of the request
        token: Option<SwapToken>,
    },
    /// A queued page flip took effect
    FlipComplete {
        /// Output the flip happened on
        output: OutputId,
        /// Sequence and timestamp of the retrace the flip happened on
        metadata: EventMetadata,
        /// Token of the flip
        token: Option<SwapToken>,
    },
}

/// An [`EventSource`] delivering [`PresentEvent`]s into the event loop.
///
/// Events can be produced from any thread through the paired [`PresentEventSender`],
/// the event loop serializes them into the
/// [`PresentScheduler`](super::PresentScheduler) via
/// [`dispatch`](super::PresentScheduler::dispatch).
#[derive(Debug)]
pub struct PresentEventSource {
    channel: Channel<PresentEvent>,
}

/// Producer side of a [`PresentEventSource`]
#[derive(Debug, Clone)]
pub struct PresentEventSender(Sender<PresentEvent>);

impl PresentEventSource {
    /// Create a new event source and its sender
    pub fn new() -> (PresentEventSender, PresentEventSource) {
        let (sender, channel) = channel::channel();
        (PresentEventSender(sender), PresentEventSource { channel })
    }
}

impl PresentEventSender {
    /// Send an arbitrary event
    pub fn send(&self, event: PresentEvent) -> Result<(), SendError<PresentEvent>> {
        self.0.send(event)
    }

    /// Report a retrace on `output`
    pub fn retrace(
        &self,
        output: OutputId,
        metadata: EventMetadata,
        token: Option<SwapToken>,
    ) -> Result<(), SendError<PresentEvent>> {
        self.send(PresentEvent::Retrace {
            output,
            metadata,
            token,
        })
    }

    /// Report a completed page flip on `output`
    pub fn flip_complete(
        &self,
        output: OutputId,
        metadata: EventMetadata,
        token: Option<SwapToken>,
    ) -> Result<(), SendError<PresentEvent>> {
        self.send(PresentEvent::FlipComplete {
            output,
            metadata,
            token,
        })
    }
}

impl EventSource for PresentEventSource {
    type Event = PresentEvent;
    type Metadata = ();
    type Ret = ();
    type Error = ChannelError;

    fn process_events<F>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: F,
    ) -> Result<PostAction, Self::Error>
    where
        F: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        self.channel.process_events(readiness, token, |event, _| {
            if let channel::Event::Msg(event) = event {
                callback(event, &mut ());
            }
        })
    }

    fn register(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.channel.register(poll, token_factory)
    }

    fn reregister(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.channel.reregister(poll, token_factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.channel.unregister(poll)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::utils::Sequence;

    #[test]
    fn events_arrive_in_order() {
        let mut event_loop = calloop::EventLoop::<Vec<PresentEvent>>::try_new().unwrap();
        let (sender, source) = PresentEventSource::new();
        event_loop
            .handle()
            .insert_source(source, |event, _, events| events.push(event))
            .unwrap();

        let metadata = EventMetadata {
            sequence: Sequence::from(7),
            time: Duration::from_millis(16),
        };
        let producer = sender.clone();
        std::thread::spawn(move || {
            producer.retrace(OutputId(0), metadata, None).unwrap();
            producer.flip_complete(OutputId(1), metadata, None).unwrap();
        })
        .join()
        .unwrap();

        let mut events = Vec::new();
        event_loop
            .dispatch(Some(Duration::ZERO), &mut events)
            .unwrap();

        assert_eq!(
            events,
            vec![
                PresentEvent::Retrace {
                    output: OutputId(0),
                    metadata,
                    token: None
                },
                PresentEvent::FlipComplete {
                    output: OutputId(1),
                    metadata,
                    token: None
                },
            ]
        );
    }
}
