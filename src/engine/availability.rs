use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

// ── Unavailability aggregation ────────────────────────────────────

/// Every range that makes the unit unbookable: live bookings (pending or
/// confirmed) plus all blocked dates. Not merged; members may overlap.
pub fn blocking_ranges(unit: &UnitState) -> Vec<DateRange> {
    unit.intervals
        .iter()
        .filter(|i| i.is_blocking())
        .map(|i| i.range)
        .collect()
}

/// Blocked-date ranges only. Bookings are ignored: a host may block dates
/// that are already booked.
pub fn block_ranges(unit: &UnitState) -> Vec<DateRange> {
    unit.intervals
        .iter()
        .filter(|i| i.is_block())
        .map(|i| i.range)
        .collect()
}

/// First blocking interval that overlaps `range`, if any.
pub(super) fn first_conflict<'a>(unit: &'a UnitState, range: &DateRange) -> Option<&'a Interval> {
    unit.overlapping(range).find(|i| i.is_blocking())
}

/// First existing blocked date that overlaps `range`, if any.
pub(super) fn first_block_overlap<'a>(unit: &'a UnitState, range: &DateRange) -> Option<&'a Interval> {
    unit.overlapping(range).find(|i| i.is_block())
}

pub fn is_free(unit: &UnitState, range: &DateRange) -> bool {
    first_conflict(unit, range).is_none()
}

/// Every blocked calendar day, deduplicated and ascending.
pub fn unavailable_days(unit: &UnitState) -> Vec<NaiveDate> {
    let mut days = BTreeSet::new();
    for range in blocking_ranges(unit) {
        days.extend(range.days());
    }
    days.into_iter().collect()
}

/// `price_per_night * nights`, or `None` on overflow.
pub fn nightly_total(price_per_night: Money, range: &DateRange) -> Option<Money> {
    price_per_night.checked_mul(range.nights())
}
