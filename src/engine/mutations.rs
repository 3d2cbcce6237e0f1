use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pricing::round2;

use super::{apply_to_resource, Engine, EngineError, WalCommand};

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidResource("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    Ok(())
}

/// Money must be non-negative and already expressed in cents.
fn validate_money(value: Decimal, what: &'static str) -> Result<(), EngineError> {
    if value.is_sign_negative() || round2(value) != value {
        return Err(EngineError::InvalidResource(what));
    }
    Ok(())
}

/// Holds a resource id in `Engine::creating` until the create finishes or is
/// dropped.
struct CreateClaim<'a> {
    engine: &'a Engine,
    id: Ulid,
}

impl Drop for CreateClaim<'_> {
    fn drop(&mut self) {
        self.engine.creating.remove(&self.id);
    }
}

impl Engine {
    pub async fn create_resource(
        &self,
        id: Ulid,
        name: String,
        price_per_day: Decimal,
        deposit_unit: Decimal,
        total_quantity: u32,
    ) -> Result<Resource, EngineError> {
        validate_name(&name)?;
        validate_money(price_per_day, "price per day must be a non-negative amount in cents")?;
        validate_money(deposit_unit, "deposit must be a non-negative amount in cents")?;

        let _gate = self.write_gate.read().await;
        let _claim = match self.creating.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(());
                CreateClaim { engine: self, id }
            }
        };
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.state.len() + self.creating.len() > MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let resource = Resource {
            id,
            name,
            price_per_day,
            deposit_unit,
            total_quantity,
            enabled: true,
        };
        let event = Event::ResourceCreated {
            resource: resource.clone(),
        };
        self.wal_append(&event).await?;
        self.state.insert(
            id,
            Arc::new(RwLock::new(ResourceState::new(resource.clone()))),
        );
        info!("created resource {id} \"{}\" x{total_quantity}", resource.name);
        Ok(resource)
    }

    /// Administrative stock change. Allowed at any time; lowering stock below
    /// what is already promised leaves the resource with nothing available.
    pub async fn restock_resource(
        &self,
        id: Ulid,
        total_quantity: u32,
        enabled: bool,
    ) -> Result<Resource, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut locked = self.lock_resources([id]).await?;
        let rs = locked.get_mut(&id)?;
        let event = Event::ResourceRestocked {
            id,
            total_quantity,
            enabled,
        };
        self.wal_append(&event).await?;
        apply_to_resource(rs, &event);
        info!("restocked resource {id}: x{total_quantity}, enabled={enabled}");
        Ok(rs.resource.clone())
    }

    /// Name and prices are frozen once a committed line references the resource.
    pub async fn reprice_resource(
        &self,
        id: Ulid,
        name: String,
        price_per_day: Decimal,
        deposit_unit: Decimal,
    ) -> Result<Resource, EngineError> {
        validate_name(&name)?;
        validate_money(price_per_day, "price per day must be a non-negative amount in cents")?;
        validate_money(deposit_unit, "deposit must be a non-negative amount in cents")?;

        let _gate = self.write_gate.read().await;
        let mut locked = self.lock_resources([id]).await?;
        let rs = locked.get_mut(&id)?;
        if rs.is_referenced() {
            return Err(EngineError::ResourceInUse(id));
        }
        let event = Event::ResourceRepriced {
            id,
            name,
            price_per_day,
            deposit_unit,
        };
        self.wal_append(&event).await?;
        apply_to_resource(rs, &event);
        Ok(rs.resource.clone())
    }

    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let locked = self.lock_resources([id]).await?;
        if locked.get(&id)?.is_referenced() {
            return Err(EngineError::ResourceInUse(id));
        }
        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        // Removed while still locked: anyone queued on this lock sees it gone.
        self.state.remove(&id);
        drop(locked);
        info!("deleted resource {id}");
        Ok(())
    }

    /// Move a booking along its lifecycle. Entering `Completed` or
    /// `Cancelled` releases its inventory.
    pub async fn transition_booking(
        &self,
        id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let resource_ids = self.booking_resource_ids(&id);
        if resource_ids.is_empty() {
            return Err(EngineError::BookingNotFound(id));
        }

        let _gate = self.write_gate.read().await;
        // Every transition of this booking contends on the same locks, so the
        // status read below is current.
        let mut locked = self.lock_resources(resource_ids.iter().copied()).await?;
        let from = self
            .bookings
            .get(&id)
            .map(|b| b.status)
            .ok_or(EngineError::BookingNotFound(id))?;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from, to });
        }

        let event = Event::BookingStatusChanged {
            id,
            status: to,
            at: self.clock.now(),
        };
        self.wal_append(&event).await?;
        for rid in &resource_ids {
            if let Ok(rs) = locked.get_mut(rid) {
                rs.set_status(id, to);
            }
        }
        self.apply_to_booking(&event);
        info!("booking {id}: {from} -> {to}");
        self.booking(id).ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn set_archived(&self, id: Ulid, archived: bool) -> Result<Booking, EngineError> {
        if !self.bookings.contains_key(&id) {
            return Err(EngineError::BookingNotFound(id));
        }
        let _gate = self.write_gate.read().await;
        let event = Event::BookingArchived {
            id,
            archived,
            at: self.clock.now(),
        };
        self.wal_append(&event).await?;
        self.apply_to_booking(&event);
        self.booking(id).ok_or(EngineError::BookingNotFound(id))
    }

    /// Override the derived return-due date. It may not fall before the last
    /// rental day.
    pub async fn set_return_due(
        &self,
        id: Ulid,
        return_due: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let end = self
            .bookings
            .get(&id)
            .map(|b| b.window.end)
            .ok_or(EngineError::BookingNotFound(id))?;
        if return_due < end {
            return Err(EngineError::InvalidRange {
                start: end,
                end: return_due,
            });
        }
        let _gate = self.write_gate.read().await;
        let event = Event::BookingReturnDueSet {
            id,
            return_due,
            at: self.clock.now(),
        };
        self.wal_append(&event).await?;
        self.apply_to_booking(&event);
        self.booking(id).ok_or(EngineError::BookingNotFound(id))
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;

        let mut resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        resource_ids.sort();
        let mut events = Vec::with_capacity(resource_ids.len() + self.bookings.len());
        for rid in resource_ids {
            if let Some(rs) = self.get_resource(&rid) {
                let guard = rs.read().await;
                events.push(Event::ResourceCreated {
                    resource: guard.resource.clone(),
                });
            }
        }

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|booking| Event::BookingCommitted { booking }));

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
