use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_WINDOW_DAYS;

/// Inclusive calendar window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if end < start {
            return Err(EngineError::InvalidRange { start, end });
        }
        if (end - start).num_days() > MAX_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("rental window too wide"));
        }
        Ok(Self { start, end })
    }

    /// Calendar days from start to end; 0 for a single-day window.
    pub fn days_between(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Both endpoints inclusive: a shared boundary day counts as overlap.
    pub fn overlaps(&self, other: &DateWindow) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Day the rented units are due back.
    pub fn return_due(&self) -> NaiveDate {
        self.end.succ_opt().unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.start, self.end)
    }
}

/// Opaque identity of whoever owns a stage or booking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rentable item type with a finite owned quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub price_per_day: Decimal,
    pub deposit_unit: Decimal,
    pub total_quantity: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Validated,
    InProgress,
    Completed,
    Cancelled,
}

/// Statuses that hold inventory. Everything else releases it.
pub const BLOCKING_STATUSES: [BookingStatus; 3] = [
    BookingStatus::Pending,
    BookingStatus::Validated,
    BookingStatus::InProgress,
];

impl BookingStatus {
    pub fn is_blocking(self) -> bool {
        BLOCKING_STATUSES.contains(&self)
    }

    /// Lifecycle edges. Terminal statuses go nowhere.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Validated)
                | (Pending, Cancelled)
                | (Validated, InProgress)
                | (Validated, Cancelled)
                | (InProgress, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Validated => "VALIDATED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed line. Prices are copied from the resource at commit time and
/// never re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingLine {
    pub resource_id: Ulid,
    pub resource_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub unit_deposit: Decimal,
    pub line_rental_total: Decimal,
    pub line_deposit_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reference: String,
    pub owner: OwnerId,
    pub window: DateWindow,
    pub status: BookingStatus,
    pub return_due: NaiveDate,
    pub rental_total: Decimal,
    pub deposit_total: Decimal,
    pub note: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<BookingLine>,
}

impl Booking {
    pub fn line_for(&self, resource_id: Ulid) -> Option<&BookingLine> {
        self.lines.iter().find(|l| l.resource_id == resource_id)
    }

    pub fn grand_total(&self) -> Decimal {
        crate::pricing::add(self.rental_total, self.deposit_total)
    }
}

/// A booking line as seen from the resource it consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub booking_id: Ulid,
    pub window: DateWindow,
    pub quantity: u32,
    pub status: BookingStatus,
}

/// Per-resource state guarded by one lock: the resource record plus every
/// committed allocation against it, sorted by `window.start`.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    pub allocations: Vec<Allocation>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            allocations: Vec::new(),
        }
    }

    /// Insert allocation maintaining sort order by window start.
    pub fn insert_allocation(&mut self, allocation: Allocation) {
        let pos = self
            .allocations
            .partition_point(|a| a.window.start <= allocation.window.start);
        self.allocations.insert(pos, allocation);
    }

    pub fn set_status(&mut self, booking_id: Ulid, status: BookingStatus) {
        for a in self.allocations.iter_mut().filter(|a| a.booking_id == booking_id) {
            a.status = status;
        }
    }

    /// Allocations whose window overlaps `query` (inclusive). Allocations
    /// starting after `query.end` are skipped by binary search.
    pub fn overlapping(&self, query: &DateWindow) -> impl Iterator<Item = &Allocation> {
        let right_bound = self
            .allocations
            .partition_point(|a| a.window.start <= query.end);
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.window.end >= query.start)
    }

    /// True once any committed line points at this resource.
    pub fn is_referenced(&self) -> bool {
        !self.allocations.is_empty()
    }
}

/// WAL record format. One event per durable state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        resource: Resource,
    },
    ResourceRestocked {
        id: Ulid,
        total_quantity: u32,
        enabled: bool,
    },
    ResourceRepriced {
        id: Ulid,
        name: String,
        price_per_day: Decimal,
        deposit_unit: Decimal,
    },
    ResourceDeleted {
        id: Ulid,
    },
    BookingCommitted {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
        at: DateTime<Utc>,
    },
    BookingArchived {
        id: Ulid,
        archived: bool,
        at: DateTime<Utc>,
    },
    BookingReturnDueSet {
        id: Ulid,
        return_due: NaiveDate,
        at: DateTime<Utc>,
    },
}
