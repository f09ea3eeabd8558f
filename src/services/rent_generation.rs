use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::AppError;
use crate::repository::transactions::{
    covered_pairs_for_period, insert_transaction, map_db_error, NewTransaction,
};

/// Advisory lock key serializing generation runs. Overlapping triggers (the
/// scheduler tick racing a manual run) never interleave their
/// check-then-insert sequences; the loser returns without touching rows.
const GENERATION_LOCK_KEY: i64 = 0x52454E54_47454E; // "RENTGEN"

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Outcome of one generation run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GenerationRun {
    pub year: i32,
    pub month: u32,
    pub created: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// An active tenancy eligible for generation: tenancy active, property
/// active, rent strictly positive.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveTenancy {
    pub tenant_id: String,
    pub property_id: String,
    pub owner_id: String,
    pub rent_amount: f64,
}

/// The billing period a run executed at `today` targets.
pub fn rent_period(today: NaiveDate) -> (i32, u32) {
    (today.year(), today.month())
}

/// Due date for the period, with the configured day clamped to the month
/// length (due day 31 in February lands on the 28th/29th).
pub fn due_date_for(year: i32, month: u32, due_day: u32) -> NaiveDate {
    if let Some(date) = NaiveDate::from_ymd_opt(year, month, due_day) {
        return date;
    }
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .map(|first| first.pred_opt().unwrap_or(first))
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default())
}

pub fn auto_generation_note(year: i32, month: u32) -> String {
    let name = MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("Unknown");
    format!("Auto-generated rent for {name} {year}")
}

/// Pure planning step: decide which obligations the run must insert.
///
/// A tenancy is skipped when any transaction for its (tenant, property)
/// pair already falls due in the target month. Re-runs therefore insert
/// nothing, and a manually entered row for the period suppresses the
/// generated one. The amount is the property's rent at planning time;
/// later rent edits never touch rows planned here.
pub fn plan_obligations(
    tenancies: &[ActiveTenancy],
    covered: &HashSet<(String, String)>,
    year: i32,
    month: u32,
    due_day: u32,
) -> Vec<NewTransaction> {
    let due_date = due_date_for(year, month, due_day);
    let notes = auto_generation_note(year, month);

    tenancies
        .iter()
        .filter(|tenancy| tenancy.rent_amount > 0.0)
        .filter(|tenancy| {
            !covered.contains(&(tenancy.tenant_id.clone(), tenancy.property_id.clone()))
        })
        .map(|tenancy| NewTransaction {
            property_id: tenancy.property_id.clone(),
            tenant_id: Some(tenancy.tenant_id.clone()),
            amount: tenancy.rent_amount,
            date_paid: None,
            due_date,
            mode: "cash".to_string(),
            status: "pending".to_string(),
            receipt_path: None,
            notes: Some(notes.clone()),
            created_by: Some(tenancy.owner_id.clone()),
        })
        .collect()
}

pub async fn fetch_active_tenancies(pool: &PgPool) -> Result<Vec<ActiveTenancy>, AppError> {
    sqlx::query_as::<_, ActiveTenancy>(
        "SELECT t.id::text AS tenant_id, \
                p.id::text AS property_id, \
                p.owner_id::text AS owner_id, \
                p.rent_amount::float8 AS rent_amount \
         FROM tenants t \
         JOIN properties p ON t.property_id = p.id \
         WHERE t.is_active AND p.is_active AND p.rent_amount > 0",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Run generation for the period containing `today`. Safe to invoke
/// repeatedly: re-runs for an already-covered period insert nothing.
pub async fn run_rent_generation(pool: &PgPool, today: NaiveDate, due_day: u32) -> GenerationRun {
    let (year, month) = rent_period(today);
    let mut run = GenerationRun {
        year,
        month,
        ..Default::default()
    };

    // The advisory lock is session-scoped, so lock and unlock must happen
    // on the same pooled connection, held for the whole run.
    let mut lock_conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(error) => {
            warn!(error = %error, "Rent generation could not acquire a connection");
            run.errors += 1;
            return run;
        }
    };

    let locked: bool = match sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(GENERATION_LOCK_KEY)
        .fetch_one(&mut *lock_conn)
        .await
    {
        Ok(locked) => locked,
        Err(error) => {
            warn!(error = %error, "Rent generation lock query failed");
            run.errors += 1;
            return run;
        }
    };
    if !locked {
        info!(year, month, "Rent generation already in progress, skipping this trigger");
        return run;
    }

    generate_for_period(pool, &mut run, due_day).await;

    if let Err(error) = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(GENERATION_LOCK_KEY)
        .execute(&mut *lock_conn)
        .await
    {
        warn!(error = %error, "Failed to release rent generation lock");
    }

    info!(
        year,
        month,
        created = run.created,
        skipped = run.skipped,
        errors = run.errors,
        "Rent generation completed"
    );
    run
}

async fn generate_for_period(pool: &PgPool, run: &mut GenerationRun, due_day: u32) {
    let tenancies = match fetch_active_tenancies(pool).await {
        Ok(rows) => rows,
        Err(error) => {
            warn!(error = %error, "Failed to fetch active tenancies");
            run.errors += 1;
            return;
        }
    };

    let covered = match covered_pairs_for_period(pool, run.year, run.month).await {
        Ok(pairs) => pairs,
        Err(error) => {
            warn!(error = %error, "Failed to fetch covered periods");
            run.errors += 1;
            return;
        }
    };

    let planned = plan_obligations(&tenancies, &covered, run.year, run.month, due_day);
    run.skipped = (tenancies.len() - planned.len()) as u32;

    // Each insert stands alone: one tenancy failing must not block the
    // rest, and the month-match check keeps retries from double-charging.
    for record in &planned {
        match insert_transaction(pool, record).await {
            Ok(_) => run.created += 1,
            Err(error) => {
                warn!(
                    tenant_id = %record.tenant_id.as_deref().unwrap_or_default(),
                    property_id = %record.property_id,
                    error = %error,
                    "Failed to insert generated rent obligation"
                );
                run.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use super::{
        auto_generation_note, due_date_for, plan_obligations, rent_period, ActiveTenancy,
    };

    fn tenancy(tenant: &str, property: &str, rent: f64) -> ActiveTenancy {
        ActiveTenancy {
            tenant_id: tenant.to_string(),
            property_id: property.to_string(),
            owner_id: "owner-1".to_string(),
            rent_amount: rent,
        }
    }

    #[test]
    fn plans_one_obligation_per_uncovered_tenancy() {
        let tenancies = vec![tenancy("t1", "p1", 15000.0), tenancy("t2", "p2", 9500.0)];
        let planned = plan_obligations(&tenancies, &HashSet::new(), 2024, 3, 5);

        assert_eq!(planned.len(), 2);
        let first = &planned[0];
        assert_eq!(first.amount, 15000.0);
        assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(first.status, "pending");
        assert_eq!(first.mode, "cash");
        assert_eq!(first.created_by.as_deref(), Some("owner-1"));
        assert_eq!(
            first.notes.as_deref(),
            Some("Auto-generated rent for March 2024")
        );
    }

    #[test]
    fn covered_pair_is_skipped_making_reruns_idempotent() {
        let tenancies = vec![tenancy("t1", "p1", 15000.0), tenancy("t2", "p2", 9500.0)];
        let first_run = plan_obligations(&tenancies, &HashSet::new(), 2024, 3, 5);
        assert_eq!(first_run.len(), 2);

        // Second run over the same period sees both pairs covered.
        let covered: HashSet<(String, String)> = first_run
            .iter()
            .map(|record| {
                (
                    record.tenant_id.clone().unwrap(),
                    record.property_id.clone(),
                )
            })
            .collect();
        let second_run = plan_obligations(&tenancies, &covered, 2024, 3, 5);
        assert!(second_run.is_empty());
    }

    #[test]
    fn zero_rent_tenancies_produce_nothing() {
        let tenancies = vec![tenancy("t1", "p1", 0.0)];
        assert!(plan_obligations(&tenancies, &HashSet::new(), 2024, 3, 5).is_empty());
    }

    #[test]
    fn amount_is_a_snapshot_of_the_tenancy_rent() {
        let mut tenancies = vec![tenancy("t1", "p1", 12000.0)];
        let planned = plan_obligations(&tenancies, &HashSet::new(), 2024, 4, 5);
        assert_eq!(planned[0].amount, 12000.0);

        // A later rent change only affects later plans.
        tenancies[0].rent_amount = 18000.0;
        let replanned = plan_obligations(&tenancies, &HashSet::new(), 2024, 5, 5);
        assert_eq!(planned[0].amount, 12000.0);
        assert_eq!(replanned[0].amount, 18000.0);
    }

    #[test]
    fn due_day_clamps_to_month_length() {
        assert_eq!(
            due_date_for(2024, 2, 31),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            due_date_for(2023, 2, 31),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap()
        );
        assert_eq!(
            due_date_for(2024, 12, 31),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
        assert_eq!(
            due_date_for(2024, 3, 5),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn period_comes_from_the_invocation_date() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
        assert_eq!(rent_period(today), (2024, 3));
    }

    #[test]
    fn note_names_the_period() {
        assert_eq!(
            auto_generation_note(2025, 12),
            "Auto-generated rent for December 2025"
        );
        assert_eq!(
            auto_generation_note(2024, 1),
            "Auto-generated rent for January 2024"
        );
    }
}
