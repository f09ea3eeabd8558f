use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{json, Value};

use crate::auth::{require_user, Role};
use crate::error::{AppError, AppResult};
use crate::repository::transactions::{
    count_transactions, delete_transaction, fetch_editable, fetch_owned, insert_transaction,
    list_transactions, map_db_error, number_from_value, update_transaction, value_str,
    NewTransaction, TransactionFilters, TransactionPatch,
};
use crate::schemas::{
    clamp_limit_in_range, non_empty_opt, validate_input, CreateTransactionInput, SummaryQuery,
    TransactionPath, TransactionsQuery, UpdateTransactionInput,
};
use crate::scope::AccessScope;
use crate::services::audit::write_activity;
use crate::services::reporting;
use crate::state::AppState;

const ALLOWED_STATUSES: &[&str] = &["paid", "pending", "overdue"];
const ALLOWED_MODES: &[&str] = &["cash", "bank_transfer", "upi", "cheque", "other"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/transactions",
            axum::routing::get(list).post(create),
        )
        .route("/transactions/summary", axum::routing::get(summary))
        .route(
            "/transactions/{transaction_id}",
            axum::routing::put(update).delete(delete),
        )
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let scope = AccessScope::for_user(&user);
    let pool = db_pool(&state)?;

    let status = match non_empty_opt(query.status.as_deref()) {
        Some(status) => Some(validated_status(&status)?),
        None => None,
    };
    let filters = TransactionFilters {
        property_id: non_empty_opt(query.property_id.as_deref()),
        tenant_id: non_empty_opt(query.tenant_id.as_deref()),
        status,
        from_date: parse_date_opt(query.from_date.as_deref())?,
        to_date: parse_date_opt(query.to_date.as_deref())?,
    };

    let transactions = list_transactions(
        pool,
        &scope,
        &filters,
        clamp_limit_in_range(query.limit, 1, 1000),
        query.offset,
    )
    .await?;
    let total = count_transactions(pool, &scope, &filters).await?;

    Ok(Json(json!({ "transactions": transactions, "total": total })))
}

async fn summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
    headers: HeaderMap,
) -> AppResult<Json<reporting::TransactionSummary>> {
    let user = require_user(&state, &headers)?;
    let scope = AccessScope::for_user(&user);
    let pool = db_pool(&state)?;

    let year = query.year.unwrap_or_else(|| Utc::now().year());
    if !(1970..=2100).contains(&year) {
        return Err(AppError::BadRequest(format!("Invalid year {year}.")));
    }
    let property_id = non_empty_opt(query.property_id.as_deref());

    let summary =
        reporting::transaction_summary(pool, &scope, year, property_id.as_deref()).await?;
    Ok(Json(summary))
}

async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTransactionInput>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&state, &headers)?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let status = validated_status(&payload.status)?;
    let mode = validated_mode(&payload.mode)?;
    let due_date = parse_date(&payload.due_date)?;
    let date_paid = parse_date_opt(payload.date_paid.as_deref())?;

    // Landlords may only record against their own properties.
    if user.role == Role::Landlord && !property_owned_by(pool, &payload.property_id, &user.id).await?
    {
        return Err(AppError::NotFound("Property not found.".to_string()));
    }

    let record = NewTransaction {
        property_id: payload.property_id.clone(),
        tenant_id: non_empty_opt(payload.tenant_id.as_deref()),
        amount: payload.amount,
        date_paid,
        due_date,
        mode,
        status,
        receipt_path: non_empty_opt(payload.receipt_path.as_deref()),
        notes: payload.notes.clone(),
        created_by: Some(user.id.clone()),
    };
    let created = insert_transaction(pool, &record).await?;

    write_activity(
        state.db_pool.as_ref(),
        Some(&user.id),
        "create_transaction",
        &format!(
            "Recorded ₹{} transaction for {}",
            payload.amount, payload.due_date
        ),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update(
    State(state): State<AppState>,
    Path(path): Path<TransactionPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateTransactionInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let existing = fetch_editable(pool, &path.transaction_id, &user.id).await?;

    // Merge the edit over the stored row; an explicit empty string clears a
    // nullable field, absence keeps it.
    let amount = payload
        .amount
        .unwrap_or_else(|| number_from_value(existing.get("amount")));
    let date_paid = match payload.date_paid.as_deref() {
        None => parse_date_opt(Some(value_str(&existing, "date_paid").as_str()))?,
        Some(raw) if raw.trim().is_empty() => None,
        Some(raw) => Some(parse_date(raw)?),
    };
    let due_date = match non_empty_opt(payload.due_date.as_deref()) {
        Some(raw) => parse_date(&raw)?,
        None => parse_date(&value_str(&existing, "due_date"))?,
    };
    let mode = match non_empty_opt(payload.mode.as_deref()) {
        Some(mode) => validated_mode(&mode)?,
        None => value_str(&existing, "mode"),
    };
    let status = match non_empty_opt(payload.status.as_deref()) {
        Some(status) => validated_status(&status)?,
        None => value_str(&existing, "status"),
    };
    let notes = match payload.notes.as_deref() {
        None => non_empty_opt(Some(value_str(&existing, "notes").as_str())),
        Some(raw) if raw.is_empty() => None,
        Some(raw) => Some(raw.to_string()),
    };

    let patch = TransactionPatch {
        amount,
        date_paid,
        due_date,
        mode,
        status,
        notes,
    };
    let updated = update_transaction(pool, &path.transaction_id, &patch).await?;
    Ok(Json(updated))
}

async fn delete(
    State(state): State<AppState>,
    Path(path): Path<TransactionPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let pool = db_pool(&state)?;

    let existing = fetch_owned(pool, &path.transaction_id, &user.id).await?;
    delete_transaction(pool, &path.transaction_id).await?;

    write_activity(
        state.db_pool.as_ref(),
        Some(&user.id),
        "delete_transaction",
        &format!(
            "Deleted ₹{} transaction due {}",
            number_from_value(existing.get("amount")),
            value_str(&existing, "due_date")
        ),
    )
    .await;

    Ok(Json(json!({ "message": "Transaction deleted" })))
}

async fn property_owned_by(
    pool: &sqlx::PgPool,
    property_id: &str,
    owner_id: &str,
) -> AppResult<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM properties WHERE id = $1::uuid AND owner_id = $2::uuid)",
    )
    .bind(property_id)
    .bind(owner_id)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)
}

fn validated_status(raw: &str) -> AppResult<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if ALLOWED_STATUSES.contains(&normalized.as_str()) {
        return Ok(normalized);
    }
    Err(AppError::BadRequest(format!("Invalid status '{raw}'.")))
}

fn validated_mode(raw: &str) -> AppResult<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if ALLOWED_MODES.contains(&normalized.as_str()) {
        return Ok(normalized);
    }
    Err(AppError::BadRequest(format!("Invalid payment mode '{raw}'.")))
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date.".to_string()))
}

fn parse_date_opt(value: Option<&str>) -> AppResult<Option<NaiveDate>> {
    match non_empty_opt(value) {
        Some(raw) => Ok(Some(parse_date(&raw)?)),
        None => Ok(None),
    }
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_date_opt, validated_mode, validated_status};

    #[test]
    fn accepts_known_statuses_and_modes() {
        assert_eq!(validated_status(" Paid ").unwrap(), "paid");
        assert_eq!(validated_mode("UPI").unwrap(), "upi");
        assert!(validated_status("settled").is_err());
        assert!(validated_mode("barter").is_err());
    }

    #[test]
    fn optional_dates_parse_or_reject() {
        assert_eq!(parse_date_opt(None).unwrap(), None);
        assert_eq!(parse_date_opt(Some("  ")).unwrap(), None);
        assert!(parse_date_opt(Some("2024-03-05")).unwrap().is_some());
        assert!(parse_date_opt(Some("05/03/2024")).is_err());
    }
}
