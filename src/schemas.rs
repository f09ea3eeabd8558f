use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_mode_cash() -> String {
    "cash".to_string()
}
fn default_status_pending() -> String {
    "pending".to_string()
}
fn default_limit_50() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateTransactionInput {
    pub property_id: String,
    pub tenant_id: Option<String>,
    #[validate(range(min = 0.0))]
    pub amount: f64,
    pub date_paid: Option<String>,
    pub due_date: String,
    #[serde(default = "default_mode_cash")]
    pub mode: String,
    #[serde(default = "default_status_pending")]
    pub status: String,
    pub receipt_path: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateTransactionInput {
    #[validate(range(min = 0.0))]
    pub amount: Option<f64>,
    pub date_paid: Option<String>,
    pub due_date: Option<String>,
    pub mode: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TransactionsQuery {
    pub property_id: Option<String>,
    pub tenant_id: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    #[serde(default = "default_limit_50")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct SummaryQuery {
    pub year: Option<i32>,
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TransactionPath {
    pub transaction_id: String,
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

pub fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{clamp_limit_in_range, non_empty_opt, CreateTransactionInput};

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(0, 1, 1000), 1);
        assert_eq!(clamp_limit_in_range(5000, 1, 1000), 1000);
        assert_eq!(clamp_limit_in_range(50, 1, 1000), 50);
    }

    #[test]
    fn filters_blank_optionals() {
        assert_eq!(non_empty_opt(Some("  ")), None);
        assert_eq!(non_empty_opt(Some(" x ")), Some("x".to_string()));
        assert_eq!(non_empty_opt(None), None);
    }

    #[test]
    fn create_input_defaults_mode_and_status() {
        let input: CreateTransactionInput = serde_json::from_value(serde_json::json!({
            "property_id": "p1",
            "amount": 100.0,
            "due_date": "2024-03-05"
        }))
        .unwrap();
        assert_eq!(input.mode, "cash");
        assert_eq!(input.status, "pending");
    }
}
