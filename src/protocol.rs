//! Newline-delimited JSON request and response shapes.
//!
//! One request object per line, tagged by `op`:
//!
//! ```text
//! {"op":"admit_booking","unit_id":"01H...","check_in":"2024-01-01","check_out":"2024-01-05","guests":2,"user_id":"01H..."}
//! ```
//!
//! Every request gets exactly one response line, `{"ok":true,"data":...}` or
//! `{"ok":false,"error":{"code":...,"message":...}}`. Notifications for units
//! a connection listens on arrive interleaved as `{"notify":"<unit_id>","event":...}`.
//!
//! Date ranges come back in two shapes. `blocking_ranges` returns stored
//! half-open `{"start","end"}` pairs where `end` is excluded, for blocked dates
//! as well as bookings. `blocked_dates` and `create_blocked_date` report a
//! block's `end` as its last blocked day, matching how blocks are created.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{Actor, BookingStatus, Event, Money};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RegisterUnit {
        id: Ulid,
        property_id: Ulid,
        owner_id: Ulid,
        #[serde(default)]
        name: Option<String>,
        price_per_night: Money,
        max_guests: u32,
    },
    UpdateUnit {
        id: Ulid,
        #[serde(default)]
        name: Option<String>,
        price_per_night: Money,
        max_guests: u32,
        active: bool,
        actor: Actor,
    },
    GetUnit {
        id: Ulid,
    },
    ListUnits {
        #[serde(default)]
        owner_id: Option<Ulid>,
    },
    IsAvailable {
        unit_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    FilterAvailable {
        unit_ids: Vec<Ulid>,
        #[serde(default)]
        check_in: Option<NaiveDate>,
        #[serde(default)]
        check_out: Option<NaiveDate>,
    },
    UnavailableCalendar {
        unit_id: Ulid,
    },
    BlockingRanges {
        unit_id: Ulid,
    },
    AdmitBooking {
        unit_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        user_id: Ulid,
    },
    TransitionBooking {
        booking_id: Ulid,
        status: BookingStatus,
        actor: Actor,
    },
    GetBooking {
        id: Ulid,
    },
    BookingsForUnit {
        unit_id: Ulid,
    },
    BookingsForUser {
        user_id: Ulid,
    },
    BookingsForHost {
        owner_id: Ulid,
    },
    CreateBlockedDate {
        unit_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        #[serde(default)]
        reason: Option<String>,
        actor: Actor,
    },
    RemoveBlockedDate {
        id: Ulid,
        actor: Actor,
    },
    BlockedDates {
        unit_id: Ulid,
    },
    Listen {
        unit_id: Ulid,
    },
    Unlisten {
        unit_id: Ulid,
    },
    UnlistenAll,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("request line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "bad_request",
            ProtocolError::LineTooLong(_) => "line_too_long",
        }
    }
}

pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::error("internal", format!("unserializable response: {e}")),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    /// Serialize as a single line (no trailing newline; the codec adds it).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":{"code":"internal","message":"unserializable response"}}"#.into())
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::error(e.code(), e.to_string())
    }
}

impl From<ProtocolError> for Response {
    fn from(e: ProtocolError) -> Self {
        Response::error(e.code(), e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notify: Ulid,
    pub event: Event,
}

impl Notification {
    pub fn to_line(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}
