//! Bounded connection pool with a FIFO wait queue.
//!
//! The pool hands out at most `max_size` [`Slot`]s at a time. Connections are
//! opened lazily through a [`Connector`], and callers that find every slot busy
//! are parked in a FIFO queue until a slot is released, the acquisition times
//! out, or the caller drops its future.
//!
//! ## Hand-off
//!
//! Releasing a slot never puts it back in the idle set while someone is
//! waiting: it is passed straight to the head of the queue. Discarding a slot
//! (broken connection) frees capacity instead, and the head of the queue
//! opens a replacement connection itself.
//!
//! ## Idle eviction
//!
//! When an idle timeout is configured, a background reaper closes idle slots
//! that have not been used for that long. Evicted slots are removed from the
//! live count only, so capacity is recreated on demand.
//!
//! All bookkeeping lives behind one mutex owned by the pool; callers only ever
//! see `acquire` and the [`Slot`] guard.

mod config;
mod error;
mod slot;

pub use config::{DEFAULT_MAX_SIZE, MAX_SIZE_CEILING, PoolConfig};
pub use error::PoolError;
pub use slot::Slot;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use self::slot::{PendingAcquisition, Reservation};

/// Opens and closes the connections managed by a [`ResourcePool`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Close a connection the pool no longer needs.
    async fn close(&self, connection: Self::Connection) {
        drop(connection);
    }
}

/// Point-in-time view of the pool counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct PoolStatus {
    pub max_size: usize,
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub closed: bool,
}

pub(crate) struct Entry<T> {
    id: u64,
    conn: T,
}

struct IdleEntry<T> {
    entry: Entry<T>,
    since: Instant,
}

/// What a parked caller receives when it reaches the head of the queue.
pub(crate) enum Grant<T> {
    /// A released, ready-to-use connection.
    Ready(Entry<T>),
    /// Reserved capacity; the waiter opens the connection itself.
    Capacity,
}

struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Grant<T>>,
}

struct State<T> {
    idle: VecDeque<IdleEntry<T>>,
    waiters: VecDeque<Waiter<T>>,
    // Open connections, idle or leased, plus capacity reserved for connections
    // being opened right now.
    live: usize,
    closed: bool,
    next_waiter_id: u64,
}

pub(crate) struct Shared<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<State<C::Connection>>,
    next_slot_id: AtomicU64,
}

impl<C: Connector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, State<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a healthy connection: hand it to the oldest waiter, or park it idle.
    pub(crate) fn put_back(&self, entry: Entry<C::Connection>) {
        let mut state = self.lock();

        if state.closed {
            state.live = state.live.saturating_sub(1);
            drop(state);
            drop(entry);
            return;
        }

        let mut entry = entry;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(Grant::Ready(entry)) {
                Ok(()) => return,
                // The waiter gave up between being queued and now; try the next one.
                Err(Grant::Ready(returned)) => entry = returned,
                Err(Grant::Capacity) => return,
            }
        }

        state.idle.push_back(IdleEntry {
            entry,
            since: Instant::now(),
        });
    }

    /// Forget one live connection and pass the freed capacity to the oldest waiter.
    pub(crate) fn release_capacity(&self) {
        let mut state = self.lock();
        state.live = state.live.saturating_sub(1);

        if state.closed {
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            state.live += 1;
            if waiter.tx.send(Grant::Capacity).is_ok() {
                return;
            }
            state.live -= 1;
        }
    }

    /// Remove a parked waiter. Returns `false` when it already left the queue.
    pub(crate) fn forget_waiter(&self, waiter_id: u64) -> bool {
        let mut state = self.lock();
        match state.waiters.iter().position(|waiter| waiter.id == waiter_id) {
            Some(index) => {
                state.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    fn next_entry(&self, conn: C::Connection) -> Entry<C::Connection> {
        Entry {
            id: self.next_slot_id.fetch_add(1, Ordering::Relaxed),
            conn,
        }
    }

    /// Pop idle entries that outlived the idle timeout, oldest first.
    fn take_expired(&self, state: &mut State<C::Connection>) -> Vec<Entry<C::Connection>> {
        let Some(idle_timeout) = self.config.idle_timeout() else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        while state
            .idle
            .front()
            .is_some_and(|idle| idle.since.elapsed() >= idle_timeout)
        {
            if let Some(idle) = state.idle.pop_front() {
                state.live = state.live.saturating_sub(1);
                expired.push(idle.entry);
            }
        }
        expired
    }

    async fn close_entries(&self, entries: Vec<Entry<C::Connection>>) {
        for entry in entries {
            self.connector.close(entry.conn).await;
        }
    }

    /// One reaper pass. Returns `true` once the pool is closed.
    async fn reap(&self) -> bool {
        let expired = {
            let mut state = self.lock();
            if state.closed {
                return true;
            }
            self.take_expired(&mut state)
        };

        if !expired.is_empty() {
            debug!(evicted = expired.len(), "evicting idle pool slots");
            self.close_entries(expired).await;
        }
        false
    }
}

enum Next<T> {
    Ready(Entry<T>),
    Open,
    Wait(u64, oneshot::Receiver<Grant<T>>),
}

/// Bounded, queued pool of connections.
///
/// Cloning is cheap; all clones share the same slots.
pub struct ResourcePool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ResourcePool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> std::fmt::Debug for ResourcePool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ResourcePool<C> {
    /// Build a pool. No connection is opened until the first `acquire`.
    ///
    /// Must be called inside a tokio runtime when an idle timeout is set, since
    /// the idle reaper is spawned here.
    ///
    /// # Errors
    /// Returns `PoolError::Config` if the configuration is invalid.
    pub fn new(connector: C, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            connector,
            config,
            state: Mutex::new(State {
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                live: 0,
                closed: false,
                next_waiter_id: 0,
            }),
            next_slot_id: AtomicU64::new(1),
        });

        if shared.config.idle_timeout().is_some() {
            spawn_reaper(Arc::downgrade(&shared), shared.config.reap_interval());
        }

        Ok(Self { shared })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            max_size: self.shared.config.max_size(),
            live: state.live,
            idle: state.idle.len(),
            in_use: state.live.saturating_sub(state.idle.len()),
            waiting: state.waiters.len(),
            closed: state.closed,
        }
    }

    /// Lease a slot, waiting in line when the pool is exhausted.
    ///
    /// Dropping the returned future while it waits removes the caller from
    /// the queue without losing any slot that was already handed to it.
    ///
    /// # Errors
    /// `Timeout` when the configured acquire timeout elapses, `Exhausted` or
    /// `QueueFull` when the pool refuses to queue, `Closed` after shutdown and
    /// `Connect` when a new connection cannot be opened.
    pub async fn acquire(&self) -> Result<Slot<C>, PoolError> {
        let started = Instant::now();
        let result = match self.shared.config.acquire_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.acquire_unbounded())
                .await
                .unwrap_or(Err(PoolError::Timeout(limit))),
            None => self.acquire_unbounded().await,
        };

        if let Err(err) = &result {
            let status = self.status();
            warn!(
                error = %err,
                waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                in_use = status.in_use,
                waiting = status.waiting,
                "pool acquisition failed"
            );
        }

        result
    }

    async fn acquire_unbounded(&self) -> Result<Slot<C>, PoolError> {
        let (next, expired) = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }

            let expired = self.shared.take_expired(&mut state);

            // Reuse the most recently released slot so older ones can age out.
            let next = if let Some(idle) = state.idle.pop_back() {
                Next::Ready(idle.entry)
            } else if state.live < self.shared.config.max_size() {
                state.live += 1;
                Next::Open
            } else if !self.shared.config.wait_for_connections() {
                return Err(PoolError::Exhausted);
            } else if let Some(limit) = self
                .shared
                .config
                .queue_limit()
                .filter(|limit| state.waiters.len() >= *limit)
            {
                return Err(PoolError::QueueFull(limit));
            } else {
                let (tx, rx) = oneshot::channel();
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(Waiter { id, tx });
                Next::Wait(id, rx)
            };

            (next, expired)
        };

        if !expired.is_empty() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.close_entries(expired).await });
        }

        match next {
            Next::Ready(entry) => Ok(Slot::new(entry, Arc::clone(&self.shared))),
            Next::Open => self.open().await,
            Next::Wait(id, rx) => {
                let mut pending = PendingAcquisition::new(Arc::clone(&self.shared), id, rx);
                match pending.wait().await? {
                    Grant::Ready(entry) => Ok(Slot::new(entry, Arc::clone(&self.shared))),
                    Grant::Capacity => self.open().await,
                }
            }
        }
    }

    /// Open a connection into capacity that was already reserved for the caller.
    async fn open(&self) -> Result<Slot<C>, PoolError> {
        let reservation = Reservation::new(Arc::clone(&self.shared));
        let conn = self.shared.connector.connect().await?;
        reservation.fulfil();

        let entry = self.shared.next_entry(conn);
        debug!(slot = entry.id, "opened pool connection");
        Ok(Slot::new(entry, Arc::clone(&self.shared)))
    }

    /// Shut the pool down: fail every waiter with `Closed`, close idle
    /// connections and refuse new acquisitions. Leased slots are closed when
    /// they are released.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<_> = state.idle.drain(..).map(|idle| idle.entry).collect();
            state.live = state.live.saturating_sub(idle.len());
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (idle, waiters)
        };

        // Dropping the senders wakes every waiter with `Closed`.
        drop(waiters);
        self.shared.close_entries(idle).await;

        info!("resource pool closed");
    }
}

fn spawn_reaper<C: Connector>(shared: Weak<Shared<C>>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if shared.reap().await {
                break;
            }
        }
    });
}
