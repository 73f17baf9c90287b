use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Prices are integer minor currency units (cents).
pub type Money = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid date range: {start} .. {end}")]
pub struct InvalidRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Half-open calendar range `[start, end)`.
///
/// Blocked dates are supplied inclusive on both ends and stored here with
/// `end` moved one day forward, so `overlaps` is the only comparison the
/// engine ever needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// A stay of at least one night: `check_out` must be after `check_in`.
    pub fn stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, InvalidRange> {
        if check_out <= check_in {
            return Err(InvalidRange {
                start: check_in,
                end: check_out,
            });
        }
        Ok(Self {
            start: check_in,
            end: check_out,
        })
    }

    /// A range given as first and last day, both included. A single day is allowed.
    pub fn inclusive(first: NaiveDate, last: NaiveDate) -> Result<Self, InvalidRange> {
        let err = InvalidRange {
            start: first,
            end: last,
        };
        if last < first {
            return Err(err);
        }
        let end = last.succ_opt().ok_or(err)?;
        Ok(Self { start: first, end })
    }

    /// Last day covered by the range (`end - 1`).
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start)
    }

    /// Number of nights (days) in the range. Always >= 1 for a valid range.
    pub fn nights(&self) -> u64 {
        self.end.signed_duration_since(self.start).num_days().max(0) as u64
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    /// Every day in the range, in order. The iterator is `Clone`, so it can be restarted.
    pub fn days(&self) -> DateIter {
        DateIter {
            next: Some(self.start),
            end: self.end,
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct DateIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for DateIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let day = self.next.filter(|d| *d < self.end)?;
        self.next = day.succ_opt();
        Some(day)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .next
            .filter(|d| *d < self.end)
            .map_or(0, |d| self.end.signed_duration_since(d).num_days() as usize);
        (remaining, Some(remaining))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Only pending and confirmed bookings occupy their dates.
    pub fn is_blocking(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking. Handed in by the caller's authorization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User(Ulid),
    Admin,
    /// Internal collaborators: payment capture, completion sweep.
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<Ulid> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::Admin | Actor::System => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingEntry {
    pub user_id: Ulid,
    pub guests: u32,
    pub status: BookingStatus,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
}

/// What an interval on a unit represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    Booking(BookingEntry),
    /// Host-declared unavailability. Always blocking.
    Blocked { reason: Option<String> },
}

/// Bookings and blocked dates are both just intervals on a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub range: DateRange,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn is_blocking(&self) -> bool {
        match &self.kind {
            IntervalKind::Booking(entry) => entry.status.is_blocking(),
            IntervalKind::Blocked { .. } => true,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, IntervalKind::Blocked { .. })
    }

    pub fn as_booking(&self) -> Option<&BookingEntry> {
        match &self.kind {
            IntervalKind::Booking(entry) => Some(entry),
            IntervalKind::Blocked { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitState {
    pub id: Ulid,
    pub property_id: Ulid,
    /// The host who owns the unit's property.
    pub owner_id: Ulid,
    pub name: Option<String>,
    pub price_per_night: Money,
    pub max_guests: u32,
    pub active: bool,
    /// All bookings (any status) and blocked dates, sorted by `range.start`.
    pub intervals: Vec<Interval>,
}

impl UnitState {
    pub fn new(
        id: Ulid,
        property_id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        price_per_night: Money,
        max_guests: u32,
    ) -> Self {
        Self {
            id,
            property_id,
            owner_id,
            name,
            price_per_night,
            max_guests,
            active: true,
            intervals: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        actor.user_id() == Some(self.owner_id)
    }

    /// Insert interval maintaining sort order by range.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.range.start, |i| i.range.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn interval(&self, id: Ulid) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.id == id)
    }

    pub fn interval_mut(&mut self, id: Ulid) -> Option<&mut Interval> {
        self.intervals.iter_mut().find(|i| i.id == id)
    }

    /// Intervals whose range overlaps the query, regardless of status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.range.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.range.end > query.start)
    }

    pub fn booking_count(&self) -> usize {
        self.intervals.iter().filter(|i| !i.is_block()).count()
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UnitRegistered {
        id: Ulid,
        property_id: Ulid,
        owner_id: Ulid,
        name: Option<String>,
        price_per_night: Money,
        max_guests: u32,
    },
    UnitUpdated {
        id: Ulid,
        name: Option<String>,
        price_per_night: Money,
        max_guests: u32,
        active: bool,
    },
    BookingAdmitted {
        id: Ulid,
        unit_id: Ulid,
        user_id: Ulid,
        range: DateRange,
        guests: u32,
        total_price: Money,
        created_at: DateTime<Utc>,
    },
    BookingStatusChanged {
        id: Ulid,
        unit_id: Ulid,
        status: BookingStatus,
    },
    BlockAdded {
        id: Ulid,
        unit_id: Ulid,
        range: DateRange,
        reason: Option<String>,
    },
    BlockRemoved {
        id: Ulid,
        unit_id: Ulid,
    },
}

impl Event {
    /// The unit an event belongs to.
    pub fn unit_id(&self) -> Ulid {
        match self {
            Event::UnitRegistered { id, .. } | Event::UnitUpdated { id, .. } => *id,
            Event::BookingAdmitted { unit_id, .. }
            | Event::BookingStatusChanged { unit_id, .. }
            | Event::BlockAdded { unit_id, .. }
            | Event::BlockRemoved { unit_id, .. } => *unit_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub id: Ulid,
    pub property_id: Ulid,
    pub owner_id: Ulid,
    pub name: Option<String>,
    pub price_per_night: Money,
    pub max_guests: u32,
    pub active: bool,
}

impl From<&UnitState> for UnitInfo {
    fn from(us: &UnitState) -> Self {
        Self {
            id: us.id,
            property_id: us.property_id,
            owner_id: us.owner_id,
            name: us.name.clone(),
            price_per_night: us.price_per_night,
            max_guests: us.max_guests,
            active: us.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub user_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub status: BookingStatus,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
}

impl BookingInfo {
    pub fn from_interval(unit_id: Ulid, interval: &Interval) -> Option<Self> {
        let entry = interval.as_booking()?;
        Some(Self {
            id: interval.id,
            unit_id,
            user_id: entry.user_id,
            check_in: interval.range.start,
            check_out: interval.range.end,
            guests: entry.guests,
            status: entry.status,
            total_price: entry.total_price,
            created_at: entry.created_at,
        })
    }
}

/// A blocked-date record as the host sees it: `end` is the last blocked day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDateInfo {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub reason: Option<String>,
}

impl BlockedDateInfo {
    pub fn from_interval(unit_id: Ulid, interval: &Interval) -> Option<Self> {
        match &interval.kind {
            IntervalKind::Blocked { reason } => Some(Self {
                id: interval.id,
                unit_id,
                start: interval.range.start,
                end: interval.range.last_day(),
                reason: reason.clone(),
            }),
            IntervalKind::Booking(_) => None,
        }
    }
}
