pub mod dashboard;
pub mod generation;
pub mod health;
pub mod transactions;

use crate::state::AppState;

pub fn v1_router() -> axum::Router<AppState> {
    axum::Router::new()
        .merge(health::router())
        .merge(transactions::router())
        .merge(dashboard::router())
        .merge(generation::router())
}
