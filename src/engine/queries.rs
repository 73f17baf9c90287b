use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{blocking_ranges, is_free, unavailable_days};
use super::{Engine, EngineError};

impl Engine {
    pub async fn blocking_ranges_for(&self, unit_id: Ulid) -> Result<Vec<DateRange>, EngineError> {
        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(blocking_ranges(&guard))
    }

    /// Whether the unit is free for the stay `[check_in, check_out)`.
    /// Reads committed state only; never cached.
    pub async fn is_available(
        &self,
        unit_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, EngineError> {
        let range = DateRange::stay(check_in, check_out)?;
        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(is_free(&guard, &range))
    }

    /// Narrow a candidate set to the units free for the stay.
    ///
    /// Without both dates the candidates come back unchanged. With dates,
    /// unknown ids are dropped and the input order is kept.
    pub async fn filter_available(
        &self,
        candidates: Vec<Ulid>,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
    ) -> Result<Vec<Ulid>, EngineError> {
        let (Some(check_in), Some(check_out)) = (check_in, check_out) else {
            return Ok(candidates);
        };
        let range = DateRange::stay(check_in, check_out)?;
        if candidates.len() > MAX_FILTER_UNITS {
            return Err(EngineError::LimitExceeded("too many candidate units"));
        }

        let mut free = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(us) = self.get_unit(&id) else {
                continue;
            };
            let guard = us.read().await;
            if is_free(&guard, &range) {
                free.push(id);
            }
        }
        Ok(free)
    }

    /// Every day the unit cannot be booked, ascending, each listed once.
    pub async fn unavailable_calendar(&self, unit_id: Ulid) -> Result<Vec<NaiveDate>, EngineError> {
        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(unavailable_days(&guard))
    }

    pub async fn get_unit_info(&self, unit_id: Ulid) -> Result<UnitInfo, EngineError> {
        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(UnitInfo::from(&*guard))
    }

    /// All units, or only those owned by `owner`. Sorted by id.
    pub async fn list_units(&self, owner: Option<Ulid>) -> Vec<UnitInfo> {
        let mut ids: Vec<Ulid> = match owner {
            Some(owner) => self
                .indexes
                .units_by_owner
                .get(&owner)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
            None => self.state.iter().map(|e| *e.key()).collect(),
        };
        ids.sort();

        let mut units = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(us) = self.get_unit(&id) {
                units.push(UnitInfo::from(&*us.read().await));
            }
        }
        units
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<BookingInfo, EngineError> {
        let unit_id = self
            .get_unit_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        guard
            .interval(booking_id)
            .and_then(|i| BookingInfo::from_interval(unit_id, i))
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Bookings of every status on a unit, by check-in.
    pub async fn bookings_for_unit(&self, unit_id: Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| BookingInfo::from_interval(unit_id, i))
            .collect())
    }

    /// A guest's bookings across all units, newest first.
    pub async fn bookings_for_user(&self, user_id: Ulid) -> Vec<BookingInfo> {
        let ids = self
            .indexes
            .bookings_by_user
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            // A booking can only vanish if its unit did, which never happens.
            if let Ok(info) = self.get_booking(id).await {
                bookings.push(info);
            }
        }
        newest_first(&mut bookings);
        bookings
    }

    /// Every booking on units the host owns, newest first.
    pub async fn bookings_for_host(&self, owner_id: Ulid) -> Vec<BookingInfo> {
        let unit_ids = self
            .indexes
            .units_by_owner
            .get(&owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut bookings = Vec::new();
        for unit_id in unit_ids {
            if let Ok(mut on_unit) = self.bookings_for_unit(unit_id).await {
                bookings.append(&mut on_unit);
            }
        }
        newest_first(&mut bookings);
        bookings
    }

    pub async fn blocked_dates_for_unit(&self, unit_id: Ulid) -> Result<Vec<BlockedDateInfo>, EngineError> {
        let us = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| BlockedDateInfo::from_interval(unit_id, i))
            .collect())
    }
}

fn newest_first(bookings: &mut [BookingInfo]) {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
