//! Daily ingestion trigger. Computes the next fire time in UTC, sleeps
//! cancellably, and invokes the same entry point a manual trigger uses.

use chrono::{DateTime, NaiveTime, Utc};
use core_types::config::SchedulerConfig;
use ingestion_service::{IngestionService, RunError};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub async fn run_daily(
    config: SchedulerConfig,
    ingestion: Arc<IngestionService>,
    max_blocks: usize,
    cancel: CancellationToken,
) {
    info!(
        "scheduler started: daily ingestion at {:02}:{:02} UTC",
        config.hour, config.minute
    );
    loop {
        let Some(target) = next_fire_time(Utc::now(), config.hour, config.minute) else {
            error!(
                "invalid schedule time {:02}:{:02}; scheduler stopped",
                config.hour, config.minute
            );
            return;
        };
        if wait_until(target, &cancel).await {
            break;
        }
        match ingestion.run_ingestion(max_blocks).await {
            Ok(run) => info!(
                "scheduled ingestion finished: {} ({} records)",
                run.status.as_str(),
                run.records_written
            ),
            Err(RunError::Busy) => {
                warn!("scheduled ingestion skipped: a run is already in progress")
            }
            Err(err) => error!("scheduled ingestion failed: {err}"),
        }
    }
    info!("scheduler exiting");
}

fn next_fire_time(now: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        Some(today)
    } else {
        Some(now.date_naive().succ_opt()?.and_time(time).and_utc())
    }
}

/// Returns true when cancelled before the target instant.
async fn wait_until(target: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let wait = target
        .signed_duration_since(Utc::now())
        .to_std()
        .unwrap_or_default();
    tokio::select! {
        _ = sleep(wait) => false,
        _ = cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fires_later_today_when_time_has_not_passed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let next = next_fire_time(now, 2, 0).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
    }

    #[test]
    fn fires_tomorrow_when_time_already_passed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let next = next_fire_time(now, 2, 0).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap());
    }

    #[test]
    fn rejects_invalid_times() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        assert!(next_fire_time(now, 25, 0).is_none());
    }
}
