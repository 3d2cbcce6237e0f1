use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use rust_decimal::Decimal;
use ulid::Ulid;

use hirestock::clock::SystemClock;
use hirestock::engine::{Engine, EngineError, EngineSettings};
use hirestock::model::{BookingStatus, DateWindow, OwnerId};
use hirestock::stage_store::StageStore;

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hirestock_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn start_store(wal: PathBuf) -> Arc<StageStore> {
    let engine = Arc::new(Engine::new(wal, EngineSettings::default()).unwrap());
    Arc::new(StageStore::new(engine, Arc::new(SystemClock), 3))
}

fn window(start: (i32, u32, u32), end: (i32, u32, u32)) -> DateWindow {
    DateWindow::new(
        NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
        NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
    )
    .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_never_oversell() {
    let store = start_store(data_dir().join("oversell.wal"));
    let engine = store.engine().clone();
    let rid = Ulid::new();
    engine
        .create_resource(rid, "Bouncy castle".into(), Decimal::new(9900, 2), Decimal::new(20000, 2), 3)
        .await
        .unwrap();
    let w = window((2026, 7, 4), (2026, 7, 5));

    let owners: Vec<OwnerId> = (0..12).map(|i| OwnerId::new(format!("party-{i}"))).collect();
    for owner in &owners {
        store.add_line(owner, rid, 1, w).await.unwrap();
    }

    let results = join_all(owners.iter().map(|owner| {
        let store = store.clone();
        let owner = owner.clone();
        async move { store.checkout(&owner, None).await }
    }))
    .await;

    let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won.len(), 3);
    for r in &results {
        if let Err(e) = r {
            assert!(matches!(e, EngineError::InsufficientStock { available: 0, .. }), "{e}");
        }
    }
    assert_eq!(engine.availability(rid, &w).await.unwrap(), 0);
    // Losers keep their stage; winners' stages are gone.
    assert_eq!(store.active_count(), 9);
}

#[tokio::test]
async fn full_rental_lifecycle_across_restart() {
    let dir = data_dir();
    let wal = dir.join("lifecycle.wal");
    let owner = OwnerId::new("wedding-planner");
    let w = window((2026, 9, 18), (2026, 9, 20));
    let chairs = Ulid::new();
    let tables = Ulid::new();

    let reference = {
        let store = start_store(wal.clone());
        let engine = store.engine().clone();
        engine
            .create_resource(chairs, "Chiavari chair".into(), Decimal::new(350, 2), Decimal::new(100, 2), 150)
            .await
            .unwrap();
        engine
            .create_resource(tables, "Round table".into(), Decimal::new(1200, 2), Decimal::new(500, 2), 20)
            .await
            .unwrap();

        store.add_line(&owner, chairs, 100, w).await.unwrap();
        store.add_line(&owner, chairs, 20, w).await.unwrap();
        store.add_line(&owner, tables, 15, w).await.unwrap();
        store.set_quantity(&owner, tables, 12).await.unwrap();

        let summary = store.summary(&owner).await;
        assert_eq!(summary.days, 2);
        // 3.50*120*2 + 12.00*12*2 = 840 + 288
        assert_eq!(summary.rental_total, Decimal::new(112800, 2));
        // 1.00*120 + 5.00*12
        assert_eq!(summary.deposit_total, Decimal::new(18000, 2));

        let booking = store.checkout(&owner, Some("ceremony lawn".into())).await.unwrap();
        assert_eq!(booking.rental_total, summary.rental_total);
        assert_eq!(booking.deposit_total, summary.deposit_total);
        engine.transition_booking(booking.id, BookingStatus::Validated).await.unwrap();
        booking.reference
    };

    let store = start_store(wal);
    let engine = store.engine().clone();
    let booking = engine.booking_by_reference(&reference).unwrap();
    assert_eq!(booking.status, BookingStatus::Validated);
    assert_eq!(booking.owner, owner);
    assert_eq!(engine.availability(chairs, &w).await.unwrap(), 30);
    assert_eq!(engine.availability(tables, &w).await.unwrap(), 8);

    engine.transition_booking(booking.id, BookingStatus::InProgress).await.unwrap();
    engine.transition_booking(booking.id, BookingStatus::Completed).await.unwrap();
    assert_eq!(engine.availability(chairs, &w).await.unwrap(), 150);
}

#[tokio::test]
async fn window_is_shared_by_all_lines() {
    let store = start_store(data_dir().join("window.wal"));
    let engine = store.engine().clone();
    let rid = Ulid::new();
    engine
        .create_resource(rid, "Trailer".into(), Decimal::new(4500, 2), Decimal::new(0, 2), 2)
        .await
        .unwrap();
    let owner = OwnerId::new("mover");

    store.add_line(&owner, rid, 1, window((2026, 3, 1), (2026, 3, 2))).await.unwrap();
    let err = store
        .add_line(&owner, rid, 1, window((2026, 3, 2), (2026, 3, 3)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WindowConflict { .. }));

    store.clear(&owner).await;
    store.add_line(&owner, rid, 2, window((2026, 3, 2), (2026, 3, 3))).await.unwrap();
    assert_eq!(store.checkout(&owner, None).await.unwrap().lines[0].quantity, 2);
}
