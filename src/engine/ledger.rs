use async_trait::async_trait;
use ulid::Ulid;

use crate::limits::MAX_LINE_QUANTITY;
use crate::model::*;

use super::{Engine, EngineError};

// ── Pure ledger arithmetic over one resource ─────────────────────

/// Units held by blocking bookings overlapping `window`.
pub fn reserved_quantity(rs: &ResourceState, window: &DateWindow) -> u32 {
    rs.overlapping(window)
        .filter(|a| a.status.is_blocking())
        .fold(0u32, |acc, a| acc.saturating_add(a.quantity))
}

/// Units still free over `window`. Never negative; zero when disabled.
pub fn available_quantity(rs: &ResourceState, window: &DateWindow) -> u32 {
    if !rs.resource.enabled {
        return 0;
    }
    rs.resource
        .total_quantity
        .saturating_sub(reserved_quantity(rs, window))
}

pub fn validate_quantity(quantity: u32) -> Result<(), EngineError> {
    if quantity == 0 || quantity > MAX_LINE_QUANTITY {
        return Err(EngineError::InvalidQuantity(quantity));
    }
    Ok(())
}

pub(crate) fn insufficient(
    resource: &Resource,
    window: &DateWindow,
    requested: u32,
    available: u32,
) -> EngineError {
    EngineError::InsufficientStock {
        resource_name: resource.name.clone(),
        window: *window,
        requested,
        available,
    }
}

/// Fails unless `requested` units fit in what is left of the resource.
pub fn check_available(
    rs: &ResourceState,
    window: &DateWindow,
    requested: u32,
) -> Result<(), EngineError> {
    validate_quantity(requested)?;
    let available = available_quantity(rs, window);
    if requested > available {
        return Err(insufficient(&rs.resource, window, requested, available));
    }
    Ok(())
}

// ── Ledger capability consumed by stages ─────────────────────────

/// Resource lookup plus overlapping-quantity queries. Answers are snapshots:
/// only a commit holding the resource locks can act on them safely.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    async fn find_resource(&self, id: Ulid) -> Option<Resource>;

    async fn reserved_quantity(&self, resource_id: Ulid, window: &DateWindow) -> u32;

    async fn available_quantity(&self, resource: &Resource, window: &DateWindow) -> u32 {
        if !resource.enabled {
            return 0;
        }
        let reserved = self.reserved_quantity(resource.id, window).await;
        resource.total_quantity.saturating_sub(reserved)
    }

    async fn assert_available(
        &self,
        resource_id: Ulid,
        window: &DateWindow,
        requested: u32,
    ) -> Result<Resource, EngineError> {
        validate_quantity(requested)?;
        let resource = self
            .find_resource(resource_id)
            .await
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let available = self.available_quantity(&resource, window).await;
        if requested > available {
            return Err(insufficient(&resource, window, requested, available));
        }
        Ok(resource)
    }
}

#[async_trait]
impl InventoryLedger for Engine {
    async fn find_resource(&self, id: Ulid) -> Option<Resource> {
        let rs = self.get_resource(&id)?;
        let guard = rs.read().await;
        Some(guard.resource.clone())
    }

    async fn reserved_quantity(&self, resource_id: Ulid, window: &DateWindow) -> u32 {
        match self.get_resource(&resource_id) {
            Some(rs) => reserved_quantity(&*rs.read().await, window),
            None => 0,
        }
    }

    /// Reads total quantity and allocations under one lock, so the answer
    /// reflects the current record rather than the caller's copy.
    async fn available_quantity(&self, resource: &Resource, window: &DateWindow) -> u32 {
        match self.get_resource(&resource.id) {
            Some(rs) => available_quantity(&*rs.read().await, window),
            None => 0,
        }
    }
}
