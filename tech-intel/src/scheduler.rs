use crate::digest::DigestGenerator;
use crate::dispatcher::CollectorDispatcher;
use crate::processing::ProcessingScheduler;
use crate::types::CheckFrequency;
use crate::utils::time::format_duration;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const DAILY_COLLECTION_HOUR: u32 = 6;
pub const WEEKLY_COLLECTION_DAY: Weekday = Weekday::Sun;
pub const DIGEST_HOUR: u32 = 7;

fn midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Next top of the hour strictly after `now`.
pub fn next_hourly(now: DateTime<Utc>) -> DateTime<Utc> {
    midnight(now) + Duration::hours(i64::from(now.hour()) + 1)
}

/// Next `hour:00` UTC strictly after `now`.
pub fn next_daily_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = midnight(now) + Duration::hours(i64::from(hour));
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Next `weekday hour:00` UTC strictly after `now`.
pub fn next_weekly_at(now: DateTime<Utc>, weekday: Weekday, hour: u32) -> DateTime<Utc> {
    let days_ahead = (7 + i64::from(weekday.num_days_from_monday()) - i64::from(now.weekday().num_days_from_monday())) % 7;
    let candidate = midnight(now) + Duration::days(days_ahead) + Duration::hours(i64::from(hour));
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

/// Sleeps until each computed fire time and runs `job`. Never returns.
fn spawn_timed<N, F, Fut>(name: &'static str, next: N, job: F) -> JoinHandle<()>
where
    N: Fn(DateTime<Utc>) -> DateTime<Utc> + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let fire_at = next(now);
            info!("{} scheduled for {} (in {})", name, fire_at, format_duration(fire_at - now));
            let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            job().await;
        }
    })
}

fn spawn_collection(
    dispatcher: Arc<CollectorDispatcher>,
    name: &'static str,
    frequency: CheckFrequency,
    next: impl Fn(DateTime<Utc>) -> DateTime<Utc> + Send + 'static,
) -> JoinHandle<()> {
    spawn_timed(name, next, move || {
        let dispatcher = dispatcher.clone();
        async move {
            if let Err(e) = dispatcher.run_bucket(frequency).await {
                error!("{} collection run failed: {}", frequency, e);
            }
        }
    })
}

/// Starts every background loop: three collection buckets, the processing
/// sweep and the daily digest.
pub fn spawn_all(
    dispatcher: Arc<CollectorDispatcher>,
    processing: Arc<ProcessingScheduler>,
    digests: Arc<DigestGenerator>,
    processing_interval: std::time::Duration,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![
        spawn_collection(dispatcher.clone(), "Hourly collection", CheckFrequency::Hourly, next_hourly),
        spawn_collection(dispatcher.clone(), "Daily collection", CheckFrequency::Daily, |now| {
            next_daily_at(now, DAILY_COLLECTION_HOUR)
        }),
        spawn_collection(dispatcher, "Weekly collection", CheckFrequency::Weekly, |now| {
            next_weekly_at(now, WEEKLY_COLLECTION_DAY, DAILY_COLLECTION_HOUR)
        }),
    ];

    handles.push(spawn_timed(
        "Digest generation",
        |now| next_daily_at(now, DIGEST_HOUR),
        move || {
            let digests = digests.clone();
            async move {
                match digests.generate_daily().await {
                    Ok(Some(digest)) => info!("Daily digest {} ready ({})", digest.date, digest.status),
                    Ok(None) => info!("Daily digest skipped: nothing qualified"),
                    Err(e) => error!("Daily digest generation failed: {}", e),
                }
            }
        },
    ));

    handles.push(tokio::spawn(async move {
        let start = tokio::time::Instant::now() + processing_interval;
        let mut ticker = tokio::time::interval_at(start, processing_interval);
        loop {
            ticker.tick().await;
            processing.run_cycle().await;
        }
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn hourly_fires_at_the_next_hour() {
        assert_eq!(next_hourly(at(2025, 3, 4, 10, 15)), at(2025, 3, 4, 11, 0));
        assert_eq!(next_hourly(at(2025, 3, 4, 10, 0)), at(2025, 3, 4, 11, 0));
        assert_eq!(next_hourly(at(2025, 3, 4, 23, 59)), at(2025, 3, 5, 0, 0));
    }

    #[test]
    fn daily_rolls_over_after_the_hour() {
        assert_eq!(next_daily_at(at(2025, 3, 4, 5, 59), 6), at(2025, 3, 4, 6, 0));
        assert_eq!(next_daily_at(at(2025, 3, 4, 6, 0), 6), at(2025, 3, 5, 6, 0));
        assert_eq!(next_daily_at(at(2025, 12, 31, 8, 0), 7), at(2026, 1, 1, 7, 0));
    }

    #[test]
    fn weekly_targets_sunday_morning() {
        // 2025-03-04 is a Tuesday.
        assert_eq!(next_weekly_at(at(2025, 3, 4, 12, 0), Weekday::Sun, 6), at(2025, 3, 9, 6, 0));
        assert_eq!(next_weekly_at(at(2025, 3, 9, 5, 0), Weekday::Sun, 6), at(2025, 3, 9, 6, 0));
        assert_eq!(next_weekly_at(at(2025, 3, 9, 6, 0), Weekday::Sun, 6), at(2025, 3, 16, 6, 0));
    }
}
