use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::{Actor, BookingStatus};

/// Complete every confirmed booking whose stay has ended. Returns how many moved.
pub async fn sweep_completed(engine: &Engine) -> usize {
    let today = engine.clock().today();
    let mut completed = 0;
    for (booking_id, unit_id) in engine.collect_elapsed_bookings(today) {
        match engine
            .transition_booking(booking_id, BookingStatus::Completed, Actor::System)
            .await
        {
            Ok(_) => {
                completed += 1;
                info!("completed booking {booking_id} on unit {unit_id}");
            }
            // Cancelled between collect and transition.
            Err(e) => tracing::debug!("sweeper skip {booking_id}: {e}"),
        }
    }
    if completed > 0 {
        metrics::counter!(crate::observability::BOOKINGS_COMPLETED_TOTAL).increment(completed as u64);
    }
    completed
}

/// Background task: runs `sweep_completed` every `period`.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        sweep_completed(&engine).await;
    }
}

/// Background task: compacts the WAL once `threshold` appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted WAL after {appends} appends");
            }
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn sweep_completes_only_elapsed_confirmed_stays() {
        let clock = Arc::new(FixedClock::at_date(d(2024, 1, 4)));
        let engine = Engine::new(test_wal_path("sweep.wal"), Arc::new(NotifyHub::new()), clock.clone()).unwrap();

        let unit = Ulid::new();
        engine
            .register_unit(unit, Ulid::new(), Ulid::new(), None, 10_000, 2)
            .await
            .unwrap();
        let guest = Ulid::new();

        let ended = engine.admit_booking(unit, d(2024, 1, 1), d(2024, 1, 4), 1, guest).await.unwrap();
        engine
            .transition_booking(ended.id, BookingStatus::Confirmed, Actor::System)
            .await
            .unwrap();
        let ongoing = engine.admit_booking(unit, d(2024, 1, 4), d(2024, 1, 6), 1, guest).await.unwrap();
        engine
            .transition_booking(ongoing.id, BookingStatus::Confirmed, Actor::System)
            .await
            .unwrap();
        let unpaid = engine.admit_booking(unit, d(2023, 12, 1), d(2023, 12, 3), 1, guest).await.unwrap();

        assert_eq!(sweep_completed(&engine).await, 1);
        assert_eq!(engine.get_booking(ended.id).await.unwrap().status, BookingStatus::Completed);
        assert_eq!(engine.get_booking(ongoing.id).await.unwrap().status, BookingStatus::Confirmed);
        assert_eq!(engine.get_booking(unpaid.id).await.unwrap().status, BookingStatus::Pending);

        clock.set_date(d(2024, 1, 6));
        assert_eq!(sweep_completed(&engine).await, 1);
        assert_eq!(sweep_completed(&engine).await, 0);
    }
}
