//! Inventory reservation engine for rentals: per-owner booking stages,
//! availability over inclusive date windows, and an oversell-free commit.

pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pricing;
pub mod reaper;
pub mod stage;
pub mod stage_store;
pub mod wal;
