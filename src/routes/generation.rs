use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use chrono_tz::Tz;

use crate::auth::{require_user, Role};
use crate::error::{AppError, AppResult};
use crate::services::rent_generation::{run_rent_generation, GenerationRun};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/rent-generation/run", axum::routing::post(run))
}

/// Manual trigger for the monthly generation pass. Accepts either the
/// internal API key or an authenticated landlord.
async fn run(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<GenerationRun>> {
    authorize(&state, &headers)?;
    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;

    let timezone: Tz = state
        .config
        .rent_generation_timezone
        .parse()
        .unwrap_or(chrono_tz::UTC);
    let today = Utc::now().with_timezone(&timezone).date_naive();

    let run = run_rent_generation(pool, today, state.config.rent_due_day).await;
    Ok(Json(run))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    if let Some(expected) = state.config.internal_api_key.as_deref() {
        let provided = headers
            .get("x-internal-api-key")
            .and_then(|value| value.to_str().ok());
        if provided == Some(expected) {
            return Ok(());
        }
    }

    let user = require_user(state, headers)?;
    if user.role != Role::Landlord {
        return Err(AppError::Forbidden(
            "Only landlords can trigger rent generation.".to_string(),
        ));
    }
    Ok(())
}
