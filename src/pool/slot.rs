use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::{Connector, Entry, Grant, PoolError, Shared};

/// A leased connection.
///
/// Owned by exactly one caller. Dropping it returns the connection to the
/// pool; [`Slot::discard`] closes it instead.
pub struct Slot<C: Connector> {
    entry: Option<Entry<C::Connection>>,
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Slot<C> {
    pub(super) fn new(entry: Entry<C::Connection>, shared: Arc<Shared<C>>) -> Self {
        Self {
            entry: Some(entry),
            shared,
        }
    }

    /// Stable identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.entry.as_ref().map_or(0, |entry| entry.id)
    }

    /// Drop a connection that is no longer usable (for example after an I/O
    /// error). The freed capacity goes to the next waiter, which opens a
    /// fresh connection.
    pub fn discard(mut self) {
        if let Some(entry) = self.entry.take() {
            drop(entry);
            self.shared.release_capacity();
        }
    }
}

impl<C: Connector> Deref for Slot<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.entry {
            Some(entry) => &entry.conn,
            None => unreachable!("slot accessed after release"),
        }
    }
}

impl<C: Connector> DerefMut for Slot<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.entry {
            Some(entry) => &mut entry.conn,
            None => unreachable!("slot accessed after release"),
        }
    }
}

impl<C: Connector> Drop for Slot<C> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.shared.put_back(entry);
        }
    }
}

impl<C: Connector> std::fmt::Debug for Slot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("id", &self.id()).finish()
    }
}

/// A caller parked in the wait queue.
///
/// If it is dropped before receiving its grant (timeout or cancellation) it
/// leaves the queue; a grant that raced the drop is passed back to the pool.
pub(super) struct PendingAcquisition<C: Connector> {
    shared: Arc<Shared<C>>,
    id: u64,
    rx: Option<oneshot::Receiver<Grant<C::Connection>>>,
}

impl<C: Connector> PendingAcquisition<C> {
    pub(super) fn new(
        shared: Arc<Shared<C>>,
        id: u64,
        rx: oneshot::Receiver<Grant<C::Connection>>,
    ) -> Self {
        Self {
            shared,
            id,
            rx: Some(rx),
        }
    }

    pub(super) async fn wait(&mut self) -> Result<Grant<C::Connection>, PoolError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(PoolError::Closed);
        };
        let grant = rx.await;
        self.rx = None;
        // The sender is only dropped without a grant when the pool closes.
        grant.map_err(|_| PoolError::Closed)
    }
}

impl<C: Connector> Drop for PendingAcquisition<C> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };

        if self.shared.forget_waiter(self.id) {
            return;
        }

        // Already dequeued: grants are sent under the pool lock, so whatever
        // was handed over is in the channel by now.
        rx.close();
        match rx.try_recv() {
            Ok(Grant::Ready(entry)) => self.shared.put_back(entry),
            Ok(Grant::Capacity) => self.shared.release_capacity(),
            Err(_) => {}
        }
    }
}

/// Capacity reserved for a connection that is being opened. Released again
/// unless the connection comes up.
pub(super) struct Reservation<C: Connector> {
    shared: Option<Arc<Shared<C>>>,
}

impl<C: Connector> Reservation<C> {
    pub(super) fn new(shared: Arc<Shared<C>>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    pub(super) fn fulfil(mut self) {
        self.shared = None;
    }
}

impl<C: Connector> Drop for Reservation<C> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_capacity();
        }
    }
}
