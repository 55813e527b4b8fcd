use smallvec::SmallVec;

use super::{ClientId, Strategy, SurfaceId};
use crate::backend::{
    allocator::{Buffer, SwapBuffer},
    drm::{FramebufferId, OutputId, PlaneId},
};
use crate::utils::Sequence;

/// Handle of an in-flight [`SwapRecord`]
///
/// Tokens are handed to the modesetting device with every retrace wait or page flip and
/// come back with the resulting event. A token of a record, that has already been resolved,
/// never resolves to another record, even if its slot got reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapToken {
    index: u32,
    generation: u32,
}

/// How a swap is carried out, once its retrace arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapKind {
    /// Copy the back buffer to the front buffer
    Blit,
    /// Flip the whole surface on every output displaying it
    Flip,
    /// Flip the back buffer onto the overlay planes owned by the surface
    PlaneFlip {
        /// Planes, one per participating output, primary output first
        planes: SmallVec<[PlaneId; 2]>,
    },
    /// Only notify the client once the retrace is reached
    Wait,
}

impl SwapKind {
    /// Strategy the kind implements
    pub fn strategy(&self) -> Strategy {
        match self {
            SwapKind::Blit => Strategy::Blit,
            SwapKind::Flip | SwapKind::PlaneFlip { .. } => Strategy::Flip,
            SwapKind::Wait => Strategy::Wait,
        }
    }

    /// Returns true for flipping kinds, which take effect one retrace after being queued
    pub fn is_flip(&self) -> bool {
        self.strategy() == Strategy::Flip
    }
}

/// Progress of a [`SwapRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipState {
    /// Waiting for the retrace
    Pending,
    /// Flips were queued, waiting for `remaining` flip-complete events
    Flipping {
        /// Outstanding flip-complete events
        remaining: usize,
    },
}

/// One in-flight presentation request
#[derive(Debug)]
pub struct SwapRecord<B: Buffer> {
    pub(crate) client: Option<ClientId>,
    pub(crate) surface: Option<SurfaceId>,
    pub(crate) kind: SwapKind,
    pub(crate) output: OutputId,
    pub(crate) front: Option<SwapBuffer<B>>,
    pub(crate) back: Option<SwapBuffer<B>>,
    pub(crate) sequence: Sequence,
    pub(crate) state: FlipState,
    /// Framebuffers to release once the queued flips completed
    pub(crate) retired: SmallVec<[FramebufferId; 2]>,
}

impl<B: Buffer> SwapRecord<B> {
    pub(crate) fn new(
        client: ClientId,
        surface: SurfaceId,
        kind: SwapKind,
        output: OutputId,
        buffers: Option<(&SwapBuffer<B>, &SwapBuffer<B>)>,
    ) -> Self {
        let (front, back) = match buffers {
            Some((front, back)) => (Some(front.clone()), Some(back.clone())),
            None => (None, None),
        };
        SwapRecord {
            client: Some(client),
            surface: Some(surface),
            kind,
            output,
            front,
            back,
            sequence: Sequence::ZERO,
            state: FlipState::Pending,
            retired: SmallVec::new(),
        }
    }

    /// Client to notify, `None` once the client is gone
    pub fn client(&self) -> Option<ClientId> {
        self.client
    }

    /// Surface presented to, `None` once the surface is gone
    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    /// How the swap is carried out
    pub fn kind(&self) -> &SwapKind {
        &self.kind
    }

    /// Output whose retraces the record waits for
    pub fn output(&self) -> OutputId {
        self.output
    }

    /// Sequence the swap is expected to become visible at.
    ///
    /// Flips take effect one retrace after the wait resolved.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Sequence the retrace wait resolved to on submission
    pub fn retrace_sequence(&self) -> Sequence {
        self.sequence.wrapping_sub(self.kind.is_flip() as u32)
    }

    /// Progress of the record
    pub fn state(&self) -> FlipState {
        self.state
    }
}

#[derive(Debug)]
struct Entry<B: Buffer> {
    generation: u32,
    record: Option<SwapRecord<B>>,
}

/// Arena of in-flight swap records
#[derive(Debug)]
pub struct SwapRecords<B: Buffer> {
    entries: Vec<Entry<B>>,
    free: Vec<u32>,
}

impl<B: Buffer> Default for SwapRecords<B> {
    fn default() -> Self {
        SwapRecords {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<B: Buffer> SwapRecords<B> {
    /// Store a new record
    pub(crate) fn insert(&mut self, record: SwapRecord<B>) -> SwapToken {
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.record = Some(record);
                SwapToken {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    record: Some(record),
                });
                SwapToken { index, generation: 0 }
            }
        }
    }

    /// Access a live record
    pub fn get(&self, token: SwapToken) -> Option<&SwapRecord<B>> {
        self.entries
            .get(token.index as usize)
            .filter(|entry| entry.generation == token.generation)
            .and_then(|entry| entry.record.as_ref())
    }

    pub(crate) fn get_mut(&mut self, token: SwapToken) -> Option<&mut SwapRecord<B>> {
        self.entries
            .get_mut(token.index as usize)
            .filter(|entry| entry.generation == token.generation)
            .and_then(|entry| entry.record.as_mut())
    }

    /// Take a record out of the arena, invalidating its token
    pub(crate) fn remove(&mut self, token: SwapToken) -> Option<SwapRecord<B>> {
        let entry = self.entries.get_mut(token.index as usize)?;
        if entry.generation != token.generation {
            return None;
        }
        let record = entry.record.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(token.index);
        Some(record)
    }

    /// Checks if `token` refers to a live record
    pub fn contains(&self, token: SwapToken) -> bool {
        self.get(token).is_some()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// Returns true if no record is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all live records
    pub fn iter(&self) -> impl Iterator<Item = (SwapToken, &SwapRecord<B>)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.record.as_ref().map(|record| {
                (
                    SwapToken {
                        index: index as u32,
                        generation: entry.generation,
                    },
                    record,
                )
            })
        })
    }
}
