use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::engine::{Engine, EngineError};
use crate::model::{Booking, DateWindow, OwnerId};
use crate::observability;
use crate::stage::{BookingStage, StageSummary};

struct StageSlot {
    stage: BookingStage,
    touched: DateTime<Utc>,
}

type SharedSlot = Arc<Mutex<StageSlot>>;

/// One stage per owner. Operations on the same owner are serialized by the
/// slot mutex; different owners never contend here.
pub struct StageStore {
    engine: Arc<Engine>,
    stages: DashMap<OwnerId, SharedSlot>,
    clock: Arc<dyn Clock>,
    commit_retries: u32,
}

impl StageStore {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>, commit_retries: u32) -> Self {
        Self {
            engine,
            stages: DashMap::new(),
            clock,
            commit_retries,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn slot(&self, owner: &OwnerId) -> SharedSlot {
        let slot = self
            .stages
            .entry(owner.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(StageSlot {
                    stage: BookingStage::new(),
                    touched: self.clock.now(),
                }))
            })
            .clone();
        metrics::gauge!(observability::STAGES_ACTIVE).set(self.stages.len() as f64);
        slot
    }

    fn existing(&self, owner: &OwnerId) -> Option<SharedSlot> {
        self.stages.get(owner).map(|e| e.value().clone())
    }

    fn record_mutation(op: &'static str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        metrics::counter!(observability::STAGE_MUTATIONS_TOTAL, "op" => op, "status" => status)
            .increment(1);
    }

    pub async fn add_line(
        &self,
        owner: &OwnerId,
        resource_id: Ulid,
        quantity: u32,
        window: DateWindow,
    ) -> Result<u32, EngineError> {
        let slot = self.slot(owner);
        let mut slot = slot.lock().await;
        slot.touched = self.clock.now();
        let result = slot
            .stage
            .add_line(self.engine.as_ref(), resource_id, quantity, window)
            .await;
        Self::record_mutation("add", result.is_ok());
        result
    }

    pub async fn set_quantity(
        &self,
        owner: &OwnerId,
        resource_id: Ulid,
        quantity: u32,
    ) -> Result<(), EngineError> {
        let Some(slot) = self.existing(owner) else {
            return Ok(());
        };
        let mut slot = slot.lock().await;
        slot.touched = self.clock.now();
        let result = slot
            .stage
            .set_quantity(self.engine.as_ref(), resource_id, quantity)
            .await;
        Self::record_mutation("set_quantity", result.is_ok());
        result
    }

    pub async fn remove_line(&self, owner: &OwnerId, resource_id: Ulid) -> bool {
        let Some(slot) = self.existing(owner) else {
            return false;
        };
        let mut slot = slot.lock().await;
        slot.touched = self.clock.now();
        let removed = slot.stage.remove_line(resource_id);
        Self::record_mutation("remove", removed);
        removed
    }

    /// Empty the stage and forget it.
    pub async fn clear(&self, owner: &OwnerId) {
        let Some(slot) = self.existing(owner) else {
            return;
        };
        slot.lock().await.stage.clear();
        Self::record_mutation("clear", true);
        self.discard(owner, &slot);
    }

    /// Drop the owner's slot unless someone else is already queued on it.
    fn discard(&self, owner: &OwnerId, slot: &SharedSlot) {
        self.stages
            .remove_if(owner, |_, s| Arc::ptr_eq(s, slot) && Arc::strong_count(s) == 2);
        metrics::gauge!(observability::STAGES_ACTIVE).set(self.stages.len() as f64);
    }

    pub async fn summary(&self, owner: &OwnerId) -> StageSummary {
        let Some(slot) = self.existing(owner) else {
            return StageSummary::empty();
        };
        let mut slot = slot.lock().await;
        slot.touched = self.clock.now();
        slot.stage.summarize(self.engine.as_ref()).await
    }

    /// Snapshot of the raw stage, mostly for inspection.
    pub async fn stage(&self, owner: &OwnerId) -> BookingStage {
        match self.existing(owner) {
            Some(slot) => slot.lock().await.stage.clone(),
            None => BookingStage::new(),
        }
    }

    /// Summarize and commit the owner's stage. The stage is destroyed only
    /// when the commit succeeds; lock-contention conflicts are retried up to
    /// `commit_retries` extra times before giving up.
    pub async fn checkout(
        &self,
        owner: &OwnerId,
        note: Option<String>,
    ) -> Result<Booking, EngineError> {
        let slot = self.existing(owner).ok_or(EngineError::EmptyStage)?;
        let mut guard = slot.lock().await;
        guard.touched = self.clock.now();

        let mut attempt = 0;
        let booking = loop {
            let summary = guard.stage.summarize(self.engine.as_ref()).await;
            match self.engine.commit(owner, &summary, note.clone()).await {
                Ok(booking) => break booking,
                Err(e) if e.is_retryable() && attempt < self.commit_retries => {
                    attempt += 1;
                    warn!("checkout for {owner} conflicted, retry {attempt}/{}", self.commit_retries);
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(e) => {
                    debug!("checkout for {owner} failed: {e}");
                    return Err(e);
                }
            }
        };

        guard.stage.clear();
        drop(guard);
        self.discard(owner, &slot);
        Ok(booking)
    }

    /// Drop stages nobody has touched for `ttl`. Stages currently in use are
    /// skipped.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = self.clock.now() - ttl;
        let before = self.stages.len();
        self.stages.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(s) => s.touched > cutoff,
                Err(_) => true,
            }
        });
        let evicted = before.saturating_sub(self.stages.len());
        if evicted > 0 {
            info!("evicted {evicted} idle stages");
            metrics::counter!(observability::STAGES_EVICTED_TOTAL).increment(evicted as u64);
        }
        metrics::gauge!(observability::STAGES_ACTIVE).set(self.stages.len() as f64);
        evicted
    }

    pub fn active_count(&self) -> usize {
        self.stages.len()
    }
}
