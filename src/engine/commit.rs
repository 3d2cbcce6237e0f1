use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Datelike;
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_NOTE_LEN;
use crate::model::*;
use crate::observability;
use crate::pricing::{add, billable_days, line_deposit, line_rental, zero};
use crate::stage::StageSummary;

use super::ledger::{check_available, validate_quantity};
use super::{allocations_of, Engine, EngineError};

impl Engine {
    /// Turn a stage summary into a committed, priced booking.
    ///
    /// All touched resources are write-locked (ascending id order) for the
    /// whole check-and-insert, so two commits racing for the same units are
    /// serialized and the loser sees the winner's allocation. The booking is
    /// one WAL record and is applied to memory only once durable; on any
    /// failure nothing is kept, including the reference claim.
    pub async fn commit(
        &self,
        owner: &OwnerId,
        summary: &StageSummary,
        note: Option<String>,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.commit_locked(owner, summary, note).await;
        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) if e.is_retryable() => "conflict",
            Err(_) => "rejected",
        };
        metrics::counter!(observability::COMMITS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::COMMIT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn commit_locked(
        &self,
        owner: &OwnerId,
        summary: &StageSummary,
        note: Option<String>,
    ) -> Result<Booking, EngineError> {
        let first = summary.lines.first().ok_or(EngineError::EmptyStage)?;
        let window = first.window;
        if summary.lines.iter().any(|l| l.window != window)
            || summary.window.is_some_and(|w| w != window)
        {
            return Err(EngineError::InconsistentWindow);
        }
        if let Some(n) = &note
            && n.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("note too long"));
        }

        // One line per resource.
        let mut wanted: BTreeMap<Ulid, u32> = BTreeMap::new();
        for line in &summary.lines {
            validate_quantity(line.quantity)?;
            let q = wanted.entry(line.resource_id).or_default();
            *q = q.saturating_add(line.quantity);
        }

        let _gate = self.write_gate.read().await;
        let mut locked = self.lock_resources(wanted.keys().copied()).await?;

        // Staging-time checks were advisory; this one is binding.
        for (rid, qty) in &wanted {
            check_available(locked.get(rid)?, &window, *qty)?;
        }

        let id = Ulid::new();
        let now = self.clock.now();
        let reference = self
            .reference_allocator
            .generate(now.year(), |candidate| self.claim_reference(candidate, id))?;

        let days = billable_days(&window);
        let mut lines = Vec::with_capacity(wanted.len());
        let mut rental_total = zero();
        let mut deposit_total = zero();
        for (rid, qty) in &wanted {
            let resource = &locked.get(rid)?.resource;
            let line = BookingLine {
                resource_id: *rid,
                resource_name: resource.name.clone(),
                quantity: *qty,
                unit_price: resource.price_per_day,
                unit_deposit: resource.deposit_unit,
                line_rental_total: line_rental(resource.price_per_day, *qty, days),
                line_deposit_total: line_deposit(resource.deposit_unit, *qty),
            };
            rental_total = add(rental_total, line.line_rental_total);
            deposit_total = add(deposit_total, line.line_deposit_total);
            lines.push(line);
        }

        let booking = Booking {
            id,
            reference: reference.clone(),
            owner: owner.clone(),
            window,
            status: BookingStatus::Pending,
            return_due: window.return_due(),
            rental_total,
            deposit_total,
            note,
            archived: false,
            created_at: now,
            updated_at: now,
            lines,
        };

        let event = Event::BookingCommitted {
            booking: booking.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.release_reference(&reference, id);
            return Err(e);
        }

        for (rid, allocation) in allocations_of(&booking) {
            if let Ok(rs) = locked.get_mut(&rid) {
                rs.insert_allocation(allocation);
            }
        }
        self.index_booking(booking.clone());

        info!(
            "committed {} for {owner}: {} lines, {window}, rental {}, deposit {}",
            booking.reference,
            booking.lines.len(),
            booking.rental_total,
            booking.deposit_total
        );
        Ok(booking)
    }
}
