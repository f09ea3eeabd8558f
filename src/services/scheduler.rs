use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::time::sleep;

use crate::state::AppState;

/// Spawn-once background loop that triggers the monthly rent generation.
///
/// The loop only decides *when* to fire; what gets inserted is entirely
/// `rent_generation::run_rent_generation`, which is equally reachable from
/// the manual HTTP trigger. The run itself is idempotent, so a crash after
/// firing and a retrigger on the next tick cannot double-charge.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    let Some(pool) = state.db_pool.clone() else {
        tracing::warn!("Scheduler: no database pool configured, exiting");
        return;
    };

    let timezone: chrono_tz::Tz = state
        .config
        .rent_generation_timezone
        .parse()
        .unwrap_or_else(|_| {
            tracing::warn!(
                timezone = %state.config.rent_generation_timezone,
                "Unknown RENT_GENERATION_TIMEZONE, falling back to UTC"
            );
            chrono_tz::UTC
        });

    let generation_day = state.config.rent_generation_day;
    let generation_hour = state.config.rent_generation_hour;
    let due_day = state.config.rent_due_day;

    let mut last_generation_day = None;

    loop {
        sleep(Duration::from_secs(60)).await;

        let now_local = Utc::now().with_timezone(&timezone);
        let today = now_local.date_naive();

        // Fire once per schedule day, at or after the configured hour.
        if last_generation_day == Some(today) {
            continue;
        }
        if now_local.day() != generation_day || now_local.hour() < generation_hour {
            continue;
        }
        last_generation_day = Some(today);

        tracing::info!(%today, "Scheduler: triggering monthly rent generation");
        let pool = pool.clone();
        tokio::spawn(async move {
            let run =
                crate::services::rent_generation::run_rent_generation(&pool, today, due_day).await;
            tracing::info!(
                created = run.created,
                skipped = run.skipped,
                errors = run.errors,
                "Scheduler: rent generation run finished"
            );
        });
    }
}
