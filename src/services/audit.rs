use sqlx::PgPool;
use tracing::warn;

/// Append one row to the activity log. Best-effort: the log is an audit
/// trail, never a reason to fail the request that triggered it.
pub async fn write_activity(pool: Option<&PgPool>, user_id: Option<&str>, action: &str, details: &str) {
    let Some(pool) = pool else {
        return;
    };

    if let Err(error) =
        sqlx::query("INSERT INTO activity_log (user_id, action, details) VALUES ($1::uuid, $2, $3)")
            .bind(user_id)
            .bind(action)
            .bind(details)
            .execute(pool)
            .await
    {
        warn!(error = %error, action, "Failed to write activity log entry");
    }
}
