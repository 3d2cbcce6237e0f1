use ulid::Ulid;

use crate::model::*;

use super::ledger;
use super::{Engine, EngineError};

impl Engine {
    pub async fn list_resources(&self) -> Vec<Resource> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut resources = Vec::with_capacity(shared.len());
        for rs in shared {
            resources.push(rs.read().await.resource.clone());
        }
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        resources
    }

    pub async fn resource(&self, id: Ulid) -> Option<Resource> {
        let rs = self.get_resource(&id)?;
        let guard = rs.read().await;
        Some(guard.resource.clone())
    }

    /// Read-only availability for display. Advisory: it can be stale by the
    /// time the caller acts on it.
    pub async fn availability(&self, resource_id: Ulid, window: &DateWindow) -> Result<u32, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(ledger::available_quantity(&guard, window))
    }

    pub fn booking(&self, id: Ulid) -> Option<Booking> {
        self.bookings.get(&id).map(|b| b.value().clone())
    }

    pub fn booking_by_reference(&self, reference: &str) -> Option<Booking> {
        let id = *self.references.get(reference)?.value();
        self.booking(id)
    }

    /// Owner-scoped lookup; another owner's booking reads as absent.
    pub fn booking_for_owner(&self, id: Ulid, owner: &OwnerId) -> Option<Booking> {
        self.booking(id).filter(|b| &b.owner == owner)
    }

    /// Newest first.
    pub fn bookings_for_owner(&self, owner: &OwnerId) -> Vec<Booking> {
        let ids = self
            .by_owner
            .get(owner)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut bookings: Vec<Booking> = ids.into_iter().filter_map(|id| self.booking(id)).collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        bookings
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }
}
