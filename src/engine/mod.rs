mod commit;
mod error;
mod ledger;
mod mutations;
mod queries;
mod reference;

pub use error::EngineError;
pub use ledger::{
    available_quantity, check_available, reserved_quantity, validate_quantity, InventoryLedger,
};
pub(crate) use ledger::insufficient;
pub use reference::{RandomSuffix, ReferenceAllocator, SequentialSuffix, SuffixSource};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL file. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
struct WalWriter {
    wal: Wal,
    rx: mpsc::Receiver<WalCommand>,
}

impl WalWriter {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            let mut batch = match cmd {
                WalCommand::Append { event, response } => vec![(event, response)],
                other => {
                    self.handle_control(other);
                    continue;
                }
            };
            let mut deferred = None;
            while let Ok(next) = self.rx.try_recv() {
                match next {
                    WalCommand::Append { event, response } => batch.push((event, response)),
                    other => {
                        deferred = Some(other);
                        break;
                    }
                }
            }
            self.flush(batch);
            if let Some(cmd) = deferred {
                self.handle_control(cmd);
            }
        }
    }

    fn flush(&mut self, batch: Vec<PendingAppend>) {
        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();

        let mut result = Ok(());
        for (event, _) in &batch {
            if let Err(e) = self.wal.append_buffered(event) {
                result = Err(e);
                break;
            }
        }
        // Flush even after a failed append so half-written bytes never
        // leak into the next batch.
        let flushed = self.wal.flush_sync();
        if result.is_ok() {
            result = flushed;
        }
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        for (_, tx) in batch {
            let reply = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(reply);
        }
    }

    fn handle_control(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { events, response } => {
                let result = Wal::write_compact_file(self.wal.path(), &events)
                    .and_then(|()| self.wal.swap_compact_file());
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(self.wal.appends_since_compact());
            }
            WalCommand::Append { event, response } => self.flush(vec![(event, response)]),
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Collaborators the engine does not own: time, reference suffixes and how
/// long a commit may wait for a contended resource.
pub struct EngineSettings {
    pub clock: Arc<dyn Clock>,
    pub references: ReferenceAllocator,
    pub lock_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            references: ReferenceAllocator::default(),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedResourceState>,
    pub(super) bookings: DashMap<Ulid, Booking>,
    /// Unique index: reference → booking id.
    pub(super) references: DashMap<String, Ulid>,
    pub(super) by_owner: DashMap<OwnerId, Vec<Ulid>>,
    /// Resource ids claimed by an in-flight `create_resource`.
    pub(super) creating: DashMap<Ulid, ()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every mutation, exclusively by compaction, so a
    /// compaction snapshot never misses an appended-but-unapplied event.
    pub(super) write_gate: RwLock<()>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) reference_allocator: ReferenceAllocator,
    pub(super) lock_timeout: Duration,
}

/// Write guards over a set of resources, acquired in ascending id order.
pub(super) struct LockedResources {
    guards: BTreeMap<Ulid, OwnedRwLockWriteGuard<ResourceState>>,
}

impl LockedResources {
    pub(super) fn get(&self, id: &Ulid) -> Result<&ResourceState, EngineError> {
        self.guards
            .get(id)
            .map(|g| &**g)
            .ok_or(EngineError::ResourceNotFound(*id))
    }

    pub(super) fn get_mut(&mut self, id: &Ulid) -> Result<&mut ResourceState, EngineError> {
        self.guards
            .get_mut(id)
            .map(|g| &mut **g)
            .ok_or(EngineError::ResourceNotFound(*id))
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(WalWriter { wal, rx: wal_rx }.run());

        let engine = Self {
            state: DashMap::new(),
            bookings: DashMap::new(),
            references: DashMap::new(),
            by_owner: DashMap::new(),
            creating: DashMap::new(),
            wal_tx,
            write_gate: RwLock::new(()),
            clock: settings.clock,
            reference_allocator: settings.references,
            lock_timeout: settings.lock_timeout,
        };

        // Sole owner of every lock during replay, so try_write always succeeds.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} events: {} resources, {} bookings",
            events.len(),
            engine.state.len(),
            engine.bookings.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ResourceCreated { resource } => {
                self.state.insert(
                    resource.id,
                    Arc::new(RwLock::new(ResourceState::new(resource.clone()))),
                );
            }
            Event::ResourceDeleted { id } => {
                self.state.remove(id);
            }
            Event::BookingCommitted { booking } => {
                for (resource_id, allocation) in allocations_of(booking) {
                    if let Some(rs) = self.get_resource(&resource_id)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        guard.insert_allocation(allocation);
                    }
                }
                self.references.insert(booking.reference.clone(), booking.id);
                self.index_booking(booking.clone());
            }
            Event::ResourceRestocked { id, .. } | Event::ResourceRepriced { id, .. } => {
                if let Some(rs) = self.get_resource(id)
                    && let Ok(mut guard) = rs.try_write()
                {
                    apply_to_resource(&mut guard, event);
                }
            }
            Event::BookingStatusChanged { id, status, .. } => {
                let resource_ids = self.booking_resource_ids(id);
                for rid in resource_ids {
                    if let Some(rs) = self.get_resource(&rid)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        guard.set_status(*id, *status);
                    }
                }
                self.apply_to_booking(event);
            }
            Event::BookingArchived { .. } | Event::BookingReturnDueSet { .. } => {
                self.apply_to_booking(event)
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Acquire write locks on `ids` in ascending order. Each acquisition waits
    /// at most `lock_timeout`; a timeout is reported as a retryable conflict.
    pub(super) async fn lock_resources(
        &self,
        ids: impl IntoIterator<Item = Ulid>,
    ) -> Result<LockedResources, EngineError> {
        let mut sorted: Vec<Ulid> = ids.into_iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = BTreeMap::new();
        for id in sorted {
            let rs = self
                .get_resource(&id)
                .ok_or(EngineError::ResourceNotFound(id))?;
            let guard = tokio::time::timeout(self.lock_timeout, rs.write_owned())
                .await
                .map_err(|_| {
                    warn!("timed out waiting for resource {id}");
                    EngineError::ConcurrentCommitConflict
                })?;
            // Deleted while we waited.
            if !self.state.contains_key(&id) {
                return Err(EngineError::ResourceNotFound(id));
            }
            guards.insert(id, guard);
        }
        Ok(LockedResources { guards })
    }

    /// Insert-if-absent on the reference index. This is the uniqueness
    /// constraint; there is no separate existence check.
    pub(super) fn claim_reference(&self, reference: &str, booking_id: Ulid) -> bool {
        match self.references.entry(reference.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(booking_id);
                true
            }
        }
    }

    pub(super) fn release_reference(&self, reference: &str, booking_id: Ulid) {
        self.references
            .remove_if(reference, |_, owner| *owner == booking_id);
    }

    pub(super) fn index_booking(&self, booking: Booking) {
        self.by_owner
            .entry(booking.owner.clone())
            .or_default()
            .push(booking.id);
        self.bookings.insert(booking.id, booking);
    }

    pub(super) fn booking_resource_ids(&self, booking_id: &Ulid) -> Vec<Ulid> {
        self.bookings
            .get(booking_id)
            .map(|b| b.lines.iter().map(|l| l.resource_id).collect())
            .unwrap_or_default()
    }

    pub(super) fn apply_to_booking(&self, event: &Event) {
        match event {
            Event::BookingStatusChanged { id, status, at } => {
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.status = *status;
                    b.updated_at = *at;
                }
            }
            Event::BookingArchived { id, archived, at } => {
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.archived = *archived;
                    b.updated_at = *at;
                }
            }
            Event::BookingReturnDueSet { id, return_due, at } => {
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.return_due = *return_due;
                    b.updated_at = *at;
                }
            }
            _ => {}
        }
    }
}

/// Apply a resource-level event. Caller holds the write lock.
pub(super) fn apply_to_resource(rs: &mut ResourceState, event: &Event) {
    match event {
        Event::ResourceRestocked {
            total_quantity,
            enabled,
            ..
        } => {
            rs.resource.total_quantity = *total_quantity;
            rs.resource.enabled = *enabled;
        }
        Event::ResourceRepriced {
            name,
            price_per_day,
            deposit_unit,
            ..
        } => {
            rs.resource.name = name.clone();
            rs.resource.price_per_day = *price_per_day;
            rs.resource.deposit_unit = *deposit_unit;
        }
        _ => {}
    }
}

/// Each line of a booking as an allocation on its resource.
pub(super) fn allocations_of(booking: &Booking) -> impl Iterator<Item = (Ulid, Allocation)> + '_ {
    booking.lines.iter().map(move |line| {
        (
            line.resource_id,
            Allocation {
                booking_id: booking.id,
                window: booking.window,
                quantity: line.quantity,
                status: booking.status,
            },
        )
    })
}
