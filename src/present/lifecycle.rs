use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument, trace};

use super::{ClientId, PresentScheduler, SurfaceId, SwapToken};
use crate::backend::{
    allocator::{Allocator, Buffer},
    drm::Modesetting,
};

/// Index of in-flight swap records by the client that requested them and the surface they
/// present to.
#[derive(Debug, Default)]
pub struct LifecycleIndex {
    clients: IndexMap<ClientId, IndexSet<SwapToken>>,
    surfaces: IndexMap<SurfaceId, IndexSet<SwapToken>>,
}

impl LifecycleIndex {
    pub(crate) fn link(&mut self, token: SwapToken, client: ClientId, surface: SurfaceId) {
        self.clients.entry(client).or_default().insert(token);
        self.surfaces.entry(surface).or_default().insert(token);
    }

    pub(crate) fn unlink(&mut self, token: SwapToken, client: Option<ClientId>, surface: Option<SurfaceId>) {
        if let Some(client) = client {
            unlink_from(&mut self.clients, client, token);
        }
        if let Some(surface) = surface {
            unlink_from(&mut self.surfaces, surface, token);
        }
    }

    fn take_client(&mut self, client: ClientId) -> IndexSet<SwapToken> {
        self.clients.shift_remove(&client).unwrap_or_default()
    }

    fn take_surface(&mut self, surface: SurfaceId) -> IndexSet<SwapToken> {
        self.surfaces.shift_remove(&surface).unwrap_or_default()
    }

    /// Records requested by `client`
    pub fn records_of_client(&self, client: ClientId) -> impl Iterator<Item = SwapToken> + '_ {
        self.clients.get(&client).into_iter().flatten().copied()
    }

    /// Records presenting to `surface`
    pub fn records_of_surface(&self, surface: SurfaceId) -> impl Iterator<Item = SwapToken> + '_ {
        self.surfaces.get(&surface).into_iter().flatten().copied()
    }

    /// Returns true if no record is linked
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.surfaces.is_empty()
    }
}

fn unlink_from<K: std::hash::Hash + Eq>(
    index: &mut IndexMap<K, IndexSet<SwapToken>>,
    key: K,
    token: SwapToken,
) {
    if let Some(tokens) = index.get_mut(&key) {
        tokens.shift_remove(&token);
        if tokens.is_empty() {
            index.shift_remove(&key);
        }
    }
}

impl<D, A, B> PresentScheduler<D, A, B>
where
    D: Modesetting,
    A: Allocator<B>,
    B: Buffer,
{
    /// Neutralize all in-flight swaps of a disconnected client.
    ///
    /// The swaps are still carried out, but the client is not notified anymore.
    /// Calling this multiple times for the same client is harmless.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn on_client_gone(&mut self, client: ClientId) {
        let tokens = self.lifecycle.take_client(client);
        for token in tokens {
            if let Some(record) = self.records.get_mut(token) {
                trace!(?token, "Dropping client of swap record");
                record.client = None;
            }
        }
    }

    /// Neutralize all in-flight swaps presenting to a destroyed surface and tear down the
    /// planes it owns.
    ///
    /// Pending swaps are cancelled without notification once their retrace arrives.
    /// The planes of the surface are turned off, released, and their rotation buffers and
    /// framebuffers are destroyed. Calling this multiple times for the same surface is
    /// harmless.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn on_surface_gone(&mut self, surface: SurfaceId) {
        let tokens = self.lifecycle.take_surface(surface);
        for token in tokens {
            if let Some(record) = self.records.get_mut(token) {
                trace!(?token, "Dropping surface of swap record");
                record.surface = None;
            }
        }

        for plane in self.planes.planes_of(surface) {
            debug!(?plane, "Reclaiming plane of destroyed surface");
            self.planes.reclaim(&mut self.device, plane, surface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::present::{record::SwapKind, SwapRecord, SwapRecords};
    use crate::backend::{drm::OutputId, test::DummyBuffer};

    #[test]
    fn link_and_unlink() {
        let mut records = SwapRecords::<DummyBuffer>::default();
        let mut index = LifecycleIndex::default();
        let token = records.insert(SwapRecord::new(
            ClientId(1),
            SurfaceId(2),
            SwapKind::Wait,
            OutputId(0),
            None,
        ));

        index.link(token, ClientId(1), SurfaceId(2));
        assert_eq!(index.records_of_client(ClientId(1)).collect::<Vec<_>>(), vec![token]);
        assert_eq!(index.records_of_surface(SurfaceId(2)).collect::<Vec<_>>(), vec![token]);

        index.unlink(token, Some(ClientId(1)), None);
        assert_eq!(index.records_of_client(ClientId(1)).count(), 0);
        assert!(!index.is_empty());

        index.unlink(token, None, Some(SurfaceId(2)));
        index.unlink(token, None, Some(SurfaceId(2)));
        assert!(index.is_empty());
    }

    #[test]
    fn take_removes_key() {
        let mut records = SwapRecords::<DummyBuffer>::default();
        let mut index = LifecycleIndex::default();
        let first = records.insert(SwapRecord::new(
            ClientId(1),
            SurfaceId(1),
            SwapKind::Wait,
            OutputId(0),
            None,
        ));
        let second = records.insert(SwapRecord::new(
            ClientId(1),
            SurfaceId(2),
            SwapKind::Wait,
            OutputId(0),
            None,
        ));
        index.link(first, ClientId(1), SurfaceId(1));
        index.link(second, ClientId(1), SurfaceId(2));

        let taken = index.take_client(ClientId(1));
        assert_eq!(taken.into_iter().collect::<Vec<_>>(), vec![first, second]);
        assert!(index.take_client(ClientId(1)).is_empty());
        assert_eq!(index.records_of_surface(SurfaceId(2)).count(), 1);
    }
}
