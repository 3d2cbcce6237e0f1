//! The stage: a single owner's draft booking, one shared window, one line per
//! resource. Every mutation re-asks the ledger, but those answers are only
//! advisory; the commit re-check is the one that counts.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::debug;
use ulid::Ulid;

use crate::engine::{validate_quantity, EngineError, InventoryLedger};
use crate::limits::MAX_LINES_PER_STAGE;
use crate::model::DateWindow;
use crate::pricing::{add, billable_days, line_deposit, line_rental, zero};

/// A staged line priced from the resource's current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLine {
    pub resource_id: Ulid,
    pub resource_name: String,
    pub quantity: u32,
    pub window: DateWindow,
    pub days: u32,
    pub unit_price: Decimal,
    pub unit_deposit: Decimal,
    pub line_rental_total: Decimal,
    pub line_deposit_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub window: Option<DateWindow>,
    pub days: u32,
    pub lines: Vec<StageLine>,
    pub rental_total: Decimal,
    pub deposit_total: Decimal,
    pub grand_total: Decimal,
}

impl StageSummary {
    pub fn empty() -> Self {
        Self {
            window: None,
            days: 0,
            lines: Vec::new(),
            rental_total: zero(),
            deposit_total: zero(),
            grand_total: zero(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for StageSummary {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingStage {
    window: Option<DateWindow>,
    lines: BTreeMap<Ulid, u32>,
}

impl BookingStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self) -> Option<DateWindow> {
        self.window
    }

    pub fn quantity_of(&self, resource_id: Ulid) -> u32 {
        self.lines.get(&resource_id).copied().unwrap_or(0)
    }

    pub fn lines(&self) -> impl Iterator<Item = (Ulid, u32)> + '_ {
        self.lines.iter().map(|(id, q)| (*id, *q))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add `quantity` units on top of whatever is already staged for the
    /// resource. The first line binds the stage's window; later lines must
    /// use the same one.
    ///
    /// Returns the staged quantity after the add.
    pub async fn add_line<L: InventoryLedger + ?Sized>(
        &mut self,
        ledger: &L,
        resource_id: Ulid,
        quantity: u32,
        window: DateWindow,
    ) -> Result<u32, EngineError> {
        validate_quantity(quantity)?;
        if let Some(bound) = self.window
            && bound != window
        {
            return Err(EngineError::WindowConflict {
                bound,
                requested: window,
            });
        }
        let already = self.quantity_of(resource_id);
        if already == 0 && self.lines.len() >= MAX_LINES_PER_STAGE {
            return Err(EngineError::LimitExceeded("too many lines in stage"));
        }

        let resource = ledger
            .find_resource(resource_id)
            .await
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let requested = already.saturating_add(quantity);
        let available = ledger.available_quantity(&resource, &window).await;
        if requested > available {
            return Err(crate::engine::insufficient(&resource, &window, requested, available));
        }
        validate_quantity(requested)?;

        self.window = Some(window);
        self.lines.insert(resource_id, requested);
        debug!("staged {requested} x {} for {window}", resource.name);
        Ok(requested)
    }

    /// Replace the staged quantity. Zero removes the line. Setting a line the
    /// stage does not hold is a no-op.
    ///
    /// The ceiling is what the ledger reports available plus what this line
    /// already holds, and a refusal reports that ceiling as `available`.
    pub async fn set_quantity<L: InventoryLedger + ?Sized>(
        &mut self,
        ledger: &L,
        resource_id: Ulid,
        new_quantity: u32,
    ) -> Result<(), EngineError> {
        if new_quantity == 0 {
            self.remove_line(resource_id);
            return Ok(());
        }
        validate_quantity(new_quantity)?;
        let Some(window) = self.window else {
            return Ok(());
        };
        if !self.lines.contains_key(&resource_id) {
            return Ok(());
        }

        let Some(resource) = ledger.find_resource(resource_id).await else {
            self.remove_line(resource_id);
            return Err(EngineError::ResourceNotFound(resource_id));
        };
        let available = ledger.available_quantity(&resource, &window).await;
        let max_allowed = available.saturating_add(self.quantity_of(resource_id));
        if new_quantity > max_allowed {
            return Err(crate::engine::insufficient(
                &resource,
                &window,
                new_quantity,
                max_allowed,
            ));
        }
        self.lines.insert(resource_id, new_quantity);
        Ok(())
    }

    /// Drop a line. The window goes with the last one.
    pub fn remove_line(&mut self, resource_id: Ulid) -> bool {
        let removed = self.lines.remove(&resource_id).is_some();
        if self.lines.is_empty() {
            self.window = None;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.window = None;
    }

    /// Price every line from the current resource records. Lines whose
    /// resource has disappeared are dropped from the stage.
    pub async fn summarize<L: InventoryLedger + ?Sized>(&mut self, ledger: &L) -> StageSummary {
        let Some(window) = self.window else {
            return StageSummary::empty();
        };
        let days = billable_days(&window);

        let mut lines = Vec::with_capacity(self.lines.len());
        let mut vanished = Vec::new();
        let mut rental_total = zero();
        let mut deposit_total = zero();
        for (&resource_id, &quantity) in &self.lines {
            let Some(resource) = ledger.find_resource(resource_id).await else {
                vanished.push(resource_id);
                continue;
            };
            let line = StageLine {
                resource_id,
                resource_name: resource.name,
                quantity,
                window,
                days,
                unit_price: resource.price_per_day,
                unit_deposit: resource.deposit_unit,
                line_rental_total: line_rental(resource.price_per_day, quantity, days),
                line_deposit_total: line_deposit(resource.deposit_unit, quantity),
            };
            rental_total = add(rental_total, line.line_rental_total);
            deposit_total = add(deposit_total, line.line_deposit_total);
            lines.push(line);
        }
        for resource_id in vanished {
            debug!("dropping staged line for vanished resource {resource_id}");
            self.remove_line(resource_id);
        }

        if lines.is_empty() {
            return StageSummary::empty();
        }
        StageSummary {
            window: Some(window),
            days,
            lines,
            rental_total,
            deposit_total,
            grand_total: add(rental_total, deposit_total),
        }
    }
}
