mod admission;
mod availability;
mod error;
mod mutations;
mod queries;

pub use availability::{blocking_ranges, block_ranges, is_free, nightly_total, unavailable_days};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedUnitState = Arc<RwLock<UnitState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first Append, drains whatever else is already queued,
/// then does a single flush_sync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                // Non-append commands are handled only after the batch before them is durable.
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Secondary lookups kept beside the per-unit state.
#[derive(Default)]
pub(super) struct Indexes {
    /// booking / blocked-date id → unit id
    pub(super) entity_to_unit: DashMap<Ulid, Ulid>,
    /// guest → booking ids
    pub(super) bookings_by_user: DashMap<Ulid, Vec<Ulid>>,
    /// host → unit ids
    pub(super) units_by_owner: DashMap<Ulid, Vec<Ulid>>,
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedUnitState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) indexes: Indexes,
    /// Serializes registration and compaction, so ids stay unique and a snapshot never misses a unit.
    pub(super) registry: Mutex<()>,
}

/// Apply an event to a UnitState (no locking; caller holds the unit lock).
fn apply_to_unit(us: &mut UnitState, event: &Event, indexes: &Indexes) {
    match event {
        Event::UnitUpdated {
            name,
            price_per_night,
            max_guests,
            active,
            ..
        } => {
            us.name = name.clone();
            us.price_per_night = *price_per_night;
            us.max_guests = *max_guests;
            us.active = *active;
        }
        Event::BookingAdmitted {
            id,
            unit_id,
            user_id,
            range,
            guests,
            total_price,
            created_at,
        } => {
            us.insert_interval(Interval {
                id: *id,
                range: *range,
                kind: IntervalKind::Booking(BookingEntry {
                    user_id: *user_id,
                    guests: *guests,
                    status: BookingStatus::Pending,
                    total_price: *total_price,
                    created_at: *created_at,
                }),
            });
            indexes.entity_to_unit.insert(*id, *unit_id);
            indexes.bookings_by_user.entry(*user_id).or_default().push(*id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(Interval {
                kind: IntervalKind::Booking(entry),
                ..
            }) = us.interval_mut(*id)
            {
                entry.status = *status;
            }
        }
        Event::BlockAdded {
            id,
            unit_id,
            range,
            reason,
        } => {
            us.insert_interval(Interval {
                id: *id,
                range: *range,
                kind: IntervalKind::Blocked {
                    reason: reason.clone(),
                },
            });
            indexes.entity_to_unit.insert(*id, *unit_id);
        }
        Event::BlockRemoved { id, .. } => {
            us.remove_interval(*id);
            indexes.entity_to_unit.remove(id);
        }
        // Registration is handled at the DashMap level, not here
        Event::UnitRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            clock,
            indexes: Indexes::default(),
            registry: Mutex::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this runs inside an async context.
        for event in &events {
            match event {
                Event::UnitRegistered {
                    id,
                    property_id,
                    owner_id,
                    name,
                    price_per_night,
                    max_guests,
                } => {
                    if engine.state.contains_key(id) {
                        tracing::warn!("replay: duplicate registration of unit {id} ignored");
                        continue;
                    }
                    let us = UnitState::new(*id, *property_id, *owner_id, name.clone(), *price_per_night, *max_guests);
                    engine.state.insert(*id, Arc::new(RwLock::new(us)));
                    engine.indexes.units_by_owner.entry(*owner_id).or_default().push(*id);
                }
                other => {
                    let Some(entry) = engine.state.get(&other.unit_id()) else {
                        tracing::warn!("replay: event for unknown unit {}", other.unit_id());
                        continue;
                    };
                    let us_arc = entry.value().clone();
                    drop(entry);
                    match us_arc.try_write() {
                        Ok(mut guard) => apply_to_unit(&mut guard, other, &engine.indexes),
                        Err(_) => return Err(io::Error::other("replay: unit state contended")),
                    }
                }
            }
        }

        tracing::debug!("replayed {} events into {} units", events.len(), engine.state.len());
        Ok(engine)
    }

    /// Write event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_unit(&self, id: &Ulid) -> Option<SharedUnitState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_unit_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.indexes.entity_to_unit.get(entity_id).map(|e| *e.value())
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// WAL-append, then apply, then notify. The caller holds the unit's write
    /// lock across all three, so readers only ever see durable state.
    pub(super) async fn persist_and_apply(
        &self,
        unit_id: Ulid,
        us: &mut UnitState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_unit(us, event, &self.indexes);
        self.notify.send(unit_id, event);
        Ok(())
    }

    /// Lookup entity → unit, get the unit, acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<UnitState>), EngineError> {
        let unit_id = self
            .get_unit_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let us = self
            .get_unit(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.write_owned().await;
        Ok((unit_id, guard))
    }
}
