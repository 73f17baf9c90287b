use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{first_block_overlap, first_conflict, nightly_total};
use super::EngineError;

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.nights() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too long"));
    }
    Ok(())
}

pub(crate) fn validate_guests(guests: u32) -> Result<(), EngineError> {
    if guests == 0 {
        return Err(EngineError::InvalidGuests);
    }
    Ok(())
}

pub(crate) fn validate_profile(name: Option<&str>, max_guests: u32) -> Result<(), EngineError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("unit name too long"));
    }
    if max_guests == 0 || max_guests > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("max_guests out of range"));
    }
    Ok(())
}

pub(crate) fn check_capacity(us: &UnitState, guests: u32) -> Result<(), EngineError> {
    if guests > us.max_guests {
        return Err(EngineError::CapacityExceeded {
            guests,
            max_guests: us.max_guests,
        });
    }
    Ok(())
}

pub(crate) fn check_room_for_interval(us: &UnitState) -> Result<(), EngineError> {
    if us.intervals.len() >= MAX_INTERVALS_PER_UNIT {
        return Err(EngineError::LimitExceeded("too many bookings and blocks on unit"));
    }
    Ok(())
}

/// The admission re-check. Must run under the unit's write lock.
pub(crate) fn check_unit_free(us: &UnitState, range: &DateRange) -> Result<(), EngineError> {
    match first_conflict(us, range) {
        Some(interval) => Err(EngineError::UnitUnavailable {
            unit_id: us.id,
            conflict: interval.id,
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_no_block_overlap(us: &UnitState, range: &DateRange) -> Result<(), EngineError> {
    match first_block_overlap(us, range) {
        Some(interval) => Err(EngineError::OverlappingBlock(interval.id)),
        None => Ok(()),
    }
}

pub(crate) fn price_for(us: &UnitState, range: &DateRange) -> Result<Money, EngineError> {
    nightly_total(us.price_per_night, range).ok_or(EngineError::LimitExceeded("total price overflow"))
}

/// Host rights over a unit: its owner, or an admin.
pub(crate) fn authorize_host(us: &UnitState, actor: &Actor) -> Result<(), EngineError> {
    if matches!(actor, Actor::Admin) || us.is_owned_by(actor) {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied("caller is not the unit's host"))
    }
}

/// Who may drive each booking transition.
pub(crate) fn authorize_transition(
    us: &UnitState,
    entry: &BookingEntry,
    target: BookingStatus,
    actor: &Actor,
) -> Result<(), EngineError> {
    let allowed = match (target, actor) {
        (_, Actor::Admin | Actor::System) => true,
        (BookingStatus::Cancelled, Actor::User(id)) => *id == entry.user_id || *id == us.owner_id,
        (_, Actor::User(_)) => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied("caller may not make this transition"))
    }
}

pub(crate) fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::IllegalTransition { from, to })
    }
}

/// Completion frees the stay's nights, so it waits for the check-out day.
pub(crate) fn check_completion(
    booking_id: Ulid,
    range: &DateRange,
    target: BookingStatus,
    today: NaiveDate,
) -> Result<(), EngineError> {
    if target == BookingStatus::Completed && range.end > today {
        return Err(EngineError::CheckOutNotReached {
            booking_id,
            check_out: range.end,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};
    use ulid::Ulid;

    fn unit(owner: Ulid) -> UnitState {
        UnitState::new(Ulid::new(), Ulid::new(), owner, None, 9_000, 4)
    }

    fn entry(user: Ulid) -> BookingEntry {
        BookingEntry {
            user_id: user,
            guests: 1,
            status: BookingStatus::Pending,
            total_price: 0,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn capacity_boundary() {
        let us = unit(Ulid::new());
        assert_ok!(check_capacity(&us, 4));
        assert!(matches!(
            check_capacity(&us, 5),
            Err(EngineError::CapacityExceeded { guests: 5, max_guests: 4 })
        ));
    }

    #[test]
    fn zero_guests_rejected() {
        assert!(matches!(validate_guests(0), Err(EngineError::InvalidGuests)));
        assert_ok!(validate_guests(1));
    }

    #[test]
    fn overlong_range_rejected() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let ok = DateRange::stay(start, start + chrono::Days::new(MAX_RANGE_DAYS)).unwrap();
        let too_long = DateRange::stay(start, start + chrono::Days::new(MAX_RANGE_DAYS + 1)).unwrap();
        assert_ok!(validate_range(&ok));
        assert!(matches!(validate_range(&too_long), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn host_rights() {
        let owner = Ulid::new();
        let us = unit(owner);
        assert_ok!(authorize_host(&us, &Actor::User(owner)));
        assert_ok!(authorize_host(&us, &Actor::Admin));
        assert!(matches!(
            authorize_host(&us, &Actor::User(Ulid::new())),
            Err(EngineError::PermissionDenied(_))
        ));
        assert_err!(authorize_host(&us, &Actor::System));
    }

    #[test]
    fn transition_rights() {
        let owner = Ulid::new();
        let guest = Ulid::new();
        let stranger = Ulid::new();
        let us = unit(owner);
        let e = entry(guest);

        assert!(authorize_transition(&us, &e, BookingStatus::Confirmed, &Actor::System).is_ok());
        assert!(authorize_transition(&us, &e, BookingStatus::Confirmed, &Actor::User(guest)).is_err());
        assert!(authorize_transition(&us, &e, BookingStatus::Cancelled, &Actor::User(guest)).is_ok());
        assert!(authorize_transition(&us, &e, BookingStatus::Cancelled, &Actor::User(owner)).is_ok());
        assert!(authorize_transition(&us, &e, BookingStatus::Cancelled, &Actor::User(stranger)).is_err());
        assert!(authorize_transition(&us, &e, BookingStatus::Completed, &Actor::User(owner)).is_err());
        assert!(authorize_transition(&us, &e, BookingStatus::Completed, &Actor::Admin).is_ok());
    }

    #[test]
    fn completion_waits_for_check_out() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let id = Ulid::new();
        let range = DateRange::stay(d(1), d(5)).unwrap();

        let err = check_completion(id, &range, BookingStatus::Completed, d(4)).unwrap_err();
        assert!(matches!(err, EngineError::CheckOutNotReached { check_out, .. } if check_out == d(5)));
        assert_eq!(err.code(), "check_out_not_reached");
        assert_ok!(check_completion(id, &range, BookingStatus::Completed, d(5)));
        assert_ok!(check_completion(id, &range, BookingStatus::Cancelled, d(1)));
    }

    #[test]
    fn illegal_transition_reports_both_ends() {
        let err = check_transition(BookingStatus::Cancelled, BookingStatus::Confirmed).unwrap_err();
        assert_eq!(err.to_string(), "illegal booking transition: cancelled -> confirmed");
        assert_eq!(err.code(), "illegal_transition");
    }
}
