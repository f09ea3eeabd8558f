use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::auth::{require_role, require_user, Role};
use crate::error::{AppError, AppResult};
use crate::repository::transactions::{list_recent, list_unsettled, map_db_error};
use crate::scope::AccessScope;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/dashboard/landlord", axum::routing::get(landlord))
        .route("/dashboard/tenant", axum::routing::get(tenant))
}

const PROPERTY_COUNT_SQL: &str =
    "SELECT COUNT(*) FROM properties p WHERE p.owner_id = $1::uuid AND p.is_active";

const TENANT_COUNT_SQL: &str = "SELECT COUNT(*) FROM tenants t \
     JOIN properties p ON t.property_id = p.id \
     WHERE p.owner_id = $1::uuid AND t.is_active";

async fn landlord(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    require_role(&user, Role::Landlord)?;
    let scope = AccessScope::for_user(&user);
    let pool = db_pool(&state)?;

    let today = Utc::now().date_naive();
    let month_start = first_of_month(today);
    let next_month_start = first_of_next_month(today);

    let property_count: i64 = sqlx::query_scalar(PROPERTY_COUNT_SQL)
        .bind(&user.id)
        .fetch_one(pool)
        .await
        .map_err(map_db_error)?;
    let tenant_count: i64 = sqlx::query_scalar(TENANT_COUNT_SQL)
        .bind(&user.id)
        .fetch_one(pool)
        .await
        .map_err(map_db_error)?;

    let month_income = paid_amount_between(pool, &user.id, Some((month_start, next_month_start)))
        .await?;
    let total_collected = paid_amount_between(pool, &user.id, None).await?;

    let (pending_count, overdue_count): (i64, i64) = sqlx::query_as(
        "SELECT \
           COUNT(*) FILTER (WHERE tr.status = 'pending'), \
           COUNT(*) FILTER (WHERE tr.status = 'overdue') \
         FROM transactions tr \
         JOIN properties p ON tr.property_id = p.id \
         WHERE p.owner_id = $1::uuid",
    )
    .bind(&user.id)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    let recent = list_recent(pool, &scope, 10).await?;
    let upcoming = list_unsettled(pool, &scope, Some((today, today + Duration::days(30))), 20)
        .await?;
    let activity = recent_activity(pool, &user.id, 10).await?;

    Ok(Json(json!({
        "propertyCount": property_count,
        "tenantCount": tenant_count,
        "monthIncome": round2(month_income),
        "totalCollected": round2(total_collected),
        "pendingCount": pending_count,
        "overdueCount": overdue_count,
        "recentTransactions": recent,
        "upcomingDues": upcoming,
        "recentActivity": activity,
    })))
}

async fn tenant(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    require_role(&user, Role::Tenant)?;
    let scope = AccessScope::for_user(&user);
    let pool = db_pool(&state)?;

    let today = Utc::now().date_naive();

    let leases: Vec<Value> = sqlx::query_scalar(
        "SELECT to_jsonb(t) || jsonb_build_object('property_name', p.name, 'rent_amount', p.rent_amount) AS row \
         FROM tenants t \
         JOIN properties p ON t.property_id = p.id \
         WHERE t.user_id = $1::uuid AND t.is_active \
         ORDER BY t.lease_start DESC",
    )
    .bind(&user.id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let (total_paid, pending_amount): (Option<f64>, Option<f64>) = sqlx::query_as(
        "SELECT \
           COALESCE(SUM(tr.amount) FILTER (WHERE tr.status = 'paid'), 0)::float8, \
           COALESCE(SUM(tr.amount) FILTER (WHERE tr.status IN ('pending', 'overdue')), 0)::float8 \
         FROM transactions tr \
         JOIN tenants ten ON tr.tenant_id = ten.id \
         WHERE ten.user_id = $1::uuid",
    )
    .bind(&user.id)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    let recent = list_recent(pool, &scope, 10).await?;
    let upcoming = list_unsettled(pool, &scope, Some((today, today + Duration::days(30))), 20)
        .await?;

    Ok(Json(json!({
        "leases": leases,
        "totalPaid": round2(total_paid.unwrap_or(0.0)),
        "pendingAmount": round2(pending_amount.unwrap_or(0.0)),
        "recentPayments": recent,
        "upcomingDues": upcoming,
    })))
}

async fn paid_amount_between(
    pool: &PgPool,
    owner_id: &str,
    window: Option<(NaiveDate, NaiveDate)>,
) -> AppResult<f64> {
    let total: Option<f64> = match window {
        Some((start, end)) => {
            sqlx::query_scalar(
                "SELECT COALESCE(SUM(tr.amount), 0)::float8 FROM transactions tr \
                 JOIN properties p ON tr.property_id = p.id \
                 WHERE p.owner_id = $1::uuid AND tr.status = 'paid' \
                   AND tr.due_date >= $2 AND tr.due_date < $3",
            )
            .bind(owner_id)
            .bind(start)
            .bind(end)
            .fetch_one(pool)
            .await
        }
        None => {
            sqlx::query_scalar(
                "SELECT COALESCE(SUM(tr.amount), 0)::float8 FROM transactions tr \
                 JOIN properties p ON tr.property_id = p.id \
                 WHERE p.owner_id = $1::uuid AND tr.status = 'paid'",
            )
            .bind(owner_id)
            .fetch_one(pool)
            .await
        }
    }
    .map_err(map_db_error)?;
    Ok(total.unwrap_or(0.0))
}

async fn recent_activity(pool: &PgPool, user_id: &str, limit: i64) -> AppResult<Vec<Value>> {
    sqlx::query_scalar(
        "SELECT to_jsonb(a) AS row FROM activity_log a \
         WHERE a.user_id = $1::uuid \
         ORDER BY a.created_at DESC LIMIT $2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn db_pool(state: &AppState) -> AppResult<&PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::{first_of_month, first_of_next_month, PROPERTY_COUNT_SQL, TENANT_COUNT_SQL};
    use chrono::NaiveDate;

    #[test]
    fn landlord_counts_cover_active_records_only() {
        assert!(PROPERTY_COUNT_SQL.contains("p.is_active"));
        assert!(TENANT_COUNT_SQL.contains("t.is_active"));
    }

    #[test]
    fn month_boundaries() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 15).unwrap();
        assert_eq!(
            first_of_month(date),
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
        );
        assert_eq!(
            first_of_next_month(date),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
    }
}
