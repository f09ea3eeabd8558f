use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::AppError;
use crate::scope::AccessScope;

/// Canonical join shape every scoped read goes through. `to_jsonb` keeps the
/// row payload schema-driven; the joined names ride along for display.
const SELECT_ROW: &str = "SELECT to_jsonb(tr) \
     || jsonb_build_object('property_name', p.name, 'tenant_name', ten.name) AS row \
     FROM transactions tr \
     JOIN properties p ON tr.property_id = p.id \
     LEFT JOIN tenants ten ON tr.tenant_id = ten.id \
     WHERE 1=1";

const COUNT_ROWS: &str = "SELECT COUNT(*)::bigint AS total \
     FROM transactions tr \
     JOIN properties p ON tr.property_id = p.id \
     LEFT JOIN tenants ten ON tr.tenant_id = ten.id \
     WHERE 1=1";

#[derive(Debug, Clone, Default)]
pub struct TransactionFilters {
    pub property_id: Option<String>,
    pub tenant_id: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub property_id: String,
    pub tenant_id: Option<String>,
    pub amount: f64,
    pub date_paid: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub mode: String,
    pub status: String,
    pub receipt_path: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

/// Full-column patch: callers merge the incoming edit over the existing row
/// first, so a single UPDATE writes every mutable field.
#[derive(Debug, Clone)]
pub struct TransactionPatch {
    pub amount: f64,
    pub date_paid: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub mode: String,
    pub status: String,
    pub notes: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<Postgres>, filters: &TransactionFilters) {
    if let Some(property_id) = &filters.property_id {
        query.push(" AND tr.property_id = ");
        query.push_bind(property_id.clone());
        query.push("::uuid");
    }
    if let Some(tenant_id) = &filters.tenant_id {
        query.push(" AND tr.tenant_id = ");
        query.push_bind(tenant_id.clone());
        query.push("::uuid");
    }
    if let Some(status) = &filters.status {
        query.push(" AND tr.status = ");
        query.push_bind(status.clone());
    }
    if let Some(from_date) = filters.from_date {
        query.push(" AND tr.due_date >= ");
        query.push_bind(from_date);
    }
    if let Some(to_date) = filters.to_date {
        query.push(" AND tr.due_date <= ");
        query.push_bind(to_date);
    }
}

pub async fn list_transactions(
    pool: &PgPool,
    scope: &AccessScope,
    filters: &TransactionFilters,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>, AppError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
    scope.push_predicate(&mut query);
    push_filters(&mut query, filters);
    query.push(" ORDER BY tr.due_date DESC");
    query.push(" LIMIT ").push_bind(limit.clamp(1, 1000));
    query.push(" OFFSET ").push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn count_transactions(
    pool: &PgPool,
    scope: &AccessScope,
    filters: &TransactionFilters,
) -> Result<i64, AppError> {
    let mut query = QueryBuilder::<Postgres>::new(COUNT_ROWS);
    scope.push_predicate(&mut query);
    push_filters(&mut query, filters);

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

/// Most recently recorded transactions in scope, for dashboards.
pub async fn list_recent(
    pool: &PgPool,
    scope: &AccessScope,
    limit: i64,
) -> Result<Vec<Value>, AppError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
    scope.push_predicate(&mut query);
    query.push(" ORDER BY tr.created_at DESC");
    query.push(" LIMIT ").push_bind(limit.clamp(1, 100));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// Unsettled obligations in scope ordered by due date, optionally bounded to
/// a date window.
pub async fn list_unsettled(
    pool: &PgPool,
    scope: &AccessScope,
    window: Option<(NaiveDate, NaiveDate)>,
    limit: i64,
) -> Result<Vec<Value>, AppError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
    scope.push_predicate(&mut query);
    query.push(" AND tr.status IN ('pending', 'overdue')");
    if let Some((from_date, to_date)) = window {
        query.push(" AND tr.due_date >= ").push_bind(from_date);
        query.push(" AND tr.due_date <= ").push_bind(to_date);
    }
    query.push(" ORDER BY tr.due_date ASC");
    query.push(" LIMIT ").push_bind(limit.clamp(1, 100));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// Every transaction in scope whose due date falls in the given calendar
/// year. This is the single fetch the aggregation engine works from, so it
/// carries no row cap: a truncated fetch would silently skew the totals.
pub async fn list_for_year(
    pool: &PgPool,
    scope: &AccessScope,
    year: i32,
    property_id: Option<&str>,
) -> Result<Vec<Value>, AppError> {
    let mut query = year_fetch_query(scope, year, property_id)?;
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

fn year_fetch_query(
    scope: &AccessScope,
    year: i32,
    property_id: Option<&str>,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let year_start = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid year {year}.")))?;
    let next_year_start = NaiveDate::from_ymd_opt(year + 1, 1, 1)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid year {year}.")))?;

    let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
    scope.push_predicate(&mut query);
    query.push(" AND tr.due_date >= ").push_bind(year_start);
    query.push(" AND tr.due_date < ").push_bind(next_year_start);
    if let Some(property_id) = property_id {
        query.push(" AND tr.property_id = ");
        query.push_bind(property_id.to_string());
        query.push("::uuid");
    }
    query.push(" ORDER BY tr.due_date ASC");
    Ok(query)
}

pub async fn get_transaction(pool: &PgPool, transaction_id: &str) -> Result<Value, AppError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
    query.push(" AND tr.id = ");
    query.push_bind(transaction_id.to_string());
    query.push("::uuid LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    read_row(row).ok_or_else(|| AppError::NotFound("Transaction not found.".to_string()))
}

/// Fetch for mutation by the property owner or the original creator.
pub async fn fetch_editable(
    pool: &PgPool,
    transaction_id: &str,
    user_id: &str,
) -> Result<Value, AppError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
    query.push(" AND tr.id = ");
    query.push_bind(transaction_id.to_string());
    query.push("::uuid AND (p.owner_id = ");
    query.push_bind(user_id.to_string());
    query.push("::uuid OR tr.created_by = ");
    query.push_bind(user_id.to_string());
    query.push("::uuid) LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    read_row(row).ok_or_else(|| AppError::NotFound("Transaction not found.".to_string()))
}

/// Fetch for mutation by the property owner only (delete path).
pub async fn fetch_owned(
    pool: &PgPool,
    transaction_id: &str,
    owner_id: &str,
) -> Result<Value, AppError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
    query.push(" AND tr.id = ");
    query.push_bind(transaction_id.to_string());
    query.push("::uuid AND p.owner_id = ");
    query.push_bind(owner_id.to_string());
    query.push("::uuid LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    read_row(row).ok_or_else(|| AppError::NotFound("Transaction not found.".to_string()))
}

pub async fn insert_transaction(
    pool: &PgPool,
    record: &NewTransaction,
) -> Result<Value, AppError> {
    let transaction_id: String = sqlx::query_scalar(
        "INSERT INTO transactions \
             (property_id, tenant_id, amount, date_paid, due_date, mode, status, \
              receipt_path, notes, created_by) \
         VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, $7, $8, $9, $10::uuid) \
         RETURNING id::text",
    )
    .bind(&record.property_id)
    .bind(record.tenant_id.as_deref())
    .bind(record.amount)
    .bind(record.date_paid)
    .bind(record.due_date)
    .bind(&record.mode)
    .bind(&record.status)
    .bind(record.receipt_path.as_deref())
    .bind(record.notes.as_deref())
    .bind(record.created_by.as_deref())
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    get_transaction(pool, &transaction_id).await
}

pub async fn update_transaction(
    pool: &PgPool,
    transaction_id: &str,
    patch: &TransactionPatch,
) -> Result<Value, AppError> {
    sqlx::query(
        "UPDATE transactions \
         SET amount = $2, date_paid = $3, due_date = $4, mode = $5, status = $6, notes = $7 \
         WHERE id = $1::uuid",
    )
    .bind(transaction_id)
    .bind(patch.amount)
    .bind(patch.date_paid)
    .bind(patch.due_date)
    .bind(&patch.mode)
    .bind(&patch.status)
    .bind(patch.notes.as_deref())
    .execute(pool)
    .await
    .map_err(map_db_error)?;

    get_transaction(pool, transaction_id).await
}

pub async fn delete_transaction(pool: &PgPool, transaction_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM transactions WHERE id = $1::uuid")
        .bind(transaction_id)
        .execute(pool)
        .await
        .map_err(map_db_error)?;
    Ok(())
}

/// Distinct (tenant, property) pairs already carrying an obligation due in
/// the given month, as one set-fetch for the generator's planning step.
pub async fn covered_pairs_for_period(
    pool: &PgPool,
    year: i32,
    month: u32,
) -> Result<std::collections::HashSet<(String, String)>, AppError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT DISTINCT tenant_id::text, property_id::text \
         FROM transactions \
         WHERE tenant_id IS NOT NULL \
           AND EXTRACT(YEAR FROM due_date)::int = $1 \
           AND EXTRACT(MONTH FROM due_date)::int = $2",
    )
    .bind(year)
    .bind(month as i32)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows.into_iter().collect())
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn read_row(row: Option<PgRow>) -> Option<Value> {
    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
}

pub fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

pub fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

pub fn number_from_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::{push_filters, year_fetch_query, TransactionFilters, COUNT_ROWS, SELECT_ROW};
    use crate::scope::AccessScope;
    use chrono::NaiveDate;
    use sqlx::{Postgres, QueryBuilder};

    #[test]
    fn list_sql_applies_scope_then_filters() {
        let scope = AccessScope::Owner {
            user_id: "u".to_string(),
        };
        let filters = TransactionFilters {
            property_id: Some("p".to_string()),
            status: Some("paid".to_string()),
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };

        let mut query = QueryBuilder::<Postgres>::new(SELECT_ROW);
        scope.push_predicate(&mut query);
        push_filters(&mut query, &filters);
        let sql = query.sql().to_string();

        assert!(sql.contains("p.owner_id = $1::uuid"), "got: {sql}");
        assert!(sql.contains("tr.property_id = $2::uuid"), "got: {sql}");
        assert!(sql.contains("tr.status = $3"), "got: {sql}");
        assert!(sql.contains("tr.due_date >= $4"), "got: {sql}");
    }

    #[test]
    fn count_sql_shares_join_shape() {
        assert!(COUNT_ROWS.contains("JOIN properties p ON tr.property_id = p.id"));
        assert!(COUNT_ROWS.contains("LEFT JOIN tenants ten ON tr.tenant_id = ten.id"));
    }

    #[test]
    fn year_fetch_is_windowed_but_uncapped() {
        let scope = AccessScope::Owner {
            user_id: "u".to_string(),
        };
        let query = year_fetch_query(&scope, 2024, None).unwrap();
        let sql = query.sql();

        assert!(sql.contains("tr.due_date >= $2"), "got: {sql}");
        assert!(sql.contains("tr.due_date < $3"), "got: {sql}");
        assert!(!sql.contains("LIMIT"), "got: {sql}");

        assert!(year_fetch_query(&scope, i32::MAX, None).is_err());
    }

    #[test]
    fn empty_filters_add_no_clauses() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        push_filters(&mut query, &TransactionFilters::default());
        assert_eq!(query.sql(), "SELECT 1 WHERE 1=1");
    }
}
