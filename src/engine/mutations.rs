use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::admission::*;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_unit(
        &self,
        id: Ulid,
        property_id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        price_per_night: Money,
        max_guests: u32,
    ) -> Result<(), EngineError> {
        validate_profile(name.as_deref(), max_guests)?;

        // Exclusive across the WAL append: the id check and the insert must not interleave.
        let _registry = self.registry.lock().await;
        if self.state.len() >= MAX_UNITS {
            return Err(EngineError::LimitExceeded("too many units"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::UnitRegistered {
            id,
            property_id,
            owner_id,
            name: name.clone(),
            price_per_night,
            max_guests,
        };
        self.wal_append(&event).await?;
        let us = UnitState::new(id, property_id, owner_id, name, price_per_night, max_guests);
        self.state.insert(id, Arc::new(RwLock::new(us)));
        self.indexes.units_by_owner.entry(owner_id).or_default().push(id);
        self.notify.send(id, &event);
        metrics::gauge!(crate::observability::UNITS_REGISTERED).set(self.state.len() as f64);
        Ok(())
    }

    /// Replace a unit's mutable profile. Existing bookings keep the price they were admitted at.
    pub async fn update_unit(
        &self,
        id: Ulid,
        name: Option<String>,
        price_per_night: Money,
        max_guests: u32,
        active: bool,
        actor: Actor,
    ) -> Result<UnitInfo, EngineError> {
        validate_profile(name.as_deref(), max_guests)?;
        let us = self.get_unit(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = us.write().await;
        authorize_host(&guard, &actor)?;

        let event = Event::UnitUpdated {
            id,
            name,
            price_per_night,
            max_guests,
            active,
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(UnitInfo::from(&*guard))
    }

    /// Validate a stay and commit it as a `pending` booking.
    ///
    /// The availability re-check and the durable insert run under the unit's
    /// write lock, so two overlapping admissions on one unit can never both
    /// succeed. Admissions on different units never contend.
    pub async fn admit_booking(
        &self,
        unit_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        user_id: Ulid,
    ) -> Result<BookingInfo, EngineError> {
        let range = DateRange::stay(check_in, check_out)?;
        validate_range(&range)?;
        validate_guests(guests)?;

        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let mut guard = us.write().await;
        if !guard.active {
            return Err(EngineError::NotFound(unit_id));
        }
        check_capacity(&guard, guests)?;
        check_room_for_interval(&guard)?;

        if let Err(e) = check_unit_free(&guard, &range) {
            metrics::counter!(crate::observability::ADMISSION_CONFLICTS_TOTAL).increment(1);
            tracing::debug!("admission rejected on unit {unit_id} for {range}: {e}");
            return Err(e);
        }

        let total_price = price_for(&guard, &range)?;
        let id = Ulid::new();
        let event = Event::BookingAdmitted {
            id,
            unit_id,
            user_id,
            range,
            guests,
            total_price,
            created_at: self.clock.now(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_ADMITTED_TOTAL).increment(1);
        tracing::debug!("admitted booking {id} on unit {unit_id} for {range}");

        guard
            .interval(id)
            .and_then(|i| BookingInfo::from_interval(unit_id, i))
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn transition_booking(
        &self,
        booking_id: Ulid,
        target: BookingStatus,
        actor: Actor,
    ) -> Result<BookingInfo, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&booking_id).await?;
        let interval = guard.interval(booking_id).ok_or(EngineError::NotFound(booking_id))?;
        let entry = interval.as_booking().ok_or(EngineError::NotFound(booking_id))?;
        authorize_transition(&guard, entry, target, &actor)?;
        check_transition(entry.status, target)?;
        check_completion(booking_id, &interval.range, target, self.clock.today())?;

        let event = Event::BookingStatusChanged {
            id: booking_id,
            unit_id,
            status: target,
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;

        guard
            .interval(booking_id)
            .and_then(|i| BookingInfo::from_interval(unit_id, i))
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Block `[start, end]` (both inclusive) on a unit. Only other blocked
    /// dates count as a conflict; existing bookings do not.
    pub async fn create_blocked_date(
        &self,
        unit_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        reason: Option<String>,
        actor: Actor,
    ) -> Result<BlockedDateInfo, EngineError> {
        let range = DateRange::inclusive(start, end)?;
        validate_range(&range)?;
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }

        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let mut guard = us.write().await;
        authorize_host(&guard, &actor)?;
        check_room_for_interval(&guard)?;
        check_no_block_overlap(&guard, &range)?;

        let id = Ulid::new();
        let event = Event::BlockAdded {
            id,
            unit_id,
            range,
            reason,
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;

        guard
            .interval(id)
            .and_then(|i| BlockedDateInfo::from_interval(unit_id, i))
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn remove_blocked_date(&self, block_id: Ulid, actor: Actor) -> Result<Ulid, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&block_id).await?;
        if !guard.interval(block_id).is_some_and(Interval::is_block) {
            return Err(EngineError::NotFound(block_id));
        }
        authorize_host(&guard, &actor)?;

        let event = Event::BlockRemoved { id: block_id, unit_id };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(unit_id)
    }

    /// Confirmed bookings whose check-out is on or before `today`, as `(booking_id, unit_id)`.
    pub fn collect_elapsed_bookings(&self, today: NaiveDate) -> Vec<(Ulid, Ulid)> {
        let mut elapsed = Vec::new();
        for entry in self.state.iter() {
            let us = entry.value().clone();
            // Busy units are picked up on the next sweep.
            if let Ok(guard) = us.try_read() {
                elapsed.extend(
                    guard
                        .intervals
                        .iter()
                        .filter(|i| {
                            i.as_booking().is_some_and(|b| b.status == BookingStatus::Confirmed)
                                && i.range.end <= today
                        })
                        .map(|i| (i.id, guard.id)),
                );
            }
        }
        elapsed
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Holds the registry lock and a read lock on every unit until the
    /// rewrite lands, so no committed event can fall between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;

        let mut unit_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        unit_ids.sort();

        let mut guards = Vec::with_capacity(unit_ids.len());
        for id in &unit_ids {
            if let Some(us) = self.get_unit(id) {
                guards.push(us.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::UnitRegistered {
                id: guard.id,
                property_id: guard.property_id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                price_per_night: guard.price_per_night,
                max_guests: guard.max_guests,
            });
            if !guard.active {
                events.push(Event::UnitUpdated {
                    id: guard.id,
                    name: guard.name.clone(),
                    price_per_night: guard.price_per_night,
                    max_guests: guard.max_guests,
                    active: false,
                });
            }

            for interval in &guard.intervals {
                match &interval.kind {
                    IntervalKind::Booking(b) => {
                        events.push(Event::BookingAdmitted {
                            id: interval.id,
                            unit_id: guard.id,
                            user_id: b.user_id,
                            range: interval.range,
                            guests: b.guests,
                            total_price: b.total_price,
                            created_at: b.created_at,
                        });
                        if b.status != BookingStatus::Pending {
                            events.push(Event::BookingStatusChanged {
                                id: interval.id,
                                unit_id: guard.id,
                                status: b.status,
                            });
                        }
                    }
                    IntervalKind::Blocked { reason } => events.push(Event::BlockAdded {
                        id: interval.id,
                        unit_id: guard.id,
                        range: interval.range,
                        reason: reason.clone(),
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
