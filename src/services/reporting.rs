use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use sqlx::PgPool;

use crate::error::AppError;
use crate::repository::transactions::{list_for_year, number_from_value, value_str};
use crate::scope::AccessScope;

/// One calendar month of activity. Months with no transactions are simply
/// absent; zero-filling for display is the client's concern.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MonthlySummary {
    pub month: u32,
    pub paid_amount: f64,
    pub pending_amount: f64,
    pub paid_count: i64,
    pub pending_count: i64,
    pub overdue_count: i64,
    pub total_count: i64,
}

/// Whole-year totals. Always present in a summary, all-zero when nothing
/// matched the scope and year.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct AnnualSummary {
    pub total_paid: f64,
    pub total_pending: f64,
    pub paid_count: i64,
    pub overdue_count: i64,
    pub total_count: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PropertySummary {
    pub id: String,
    pub name: String,
    pub paid_amount: f64,
    pub pending_amount: f64,
    pub total_count: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ModeSummary {
    pub mode: String,
    pub count: i64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TransactionSummary {
    pub monthly: Vec<MonthlySummary>,
    pub annual: AnnualSummary,
    #[serde(rename = "byProperty")]
    pub by_property: Vec<PropertySummary>,
    #[serde(rename = "byMode")]
    pub by_mode: Vec<ModeSummary>,
    pub year: i32,
}

/// Compute the year's grouped summaries for one scope.
pub async fn transaction_summary(
    pool: &PgPool,
    scope: &AccessScope,
    year: i32,
    property_id: Option<&str>,
) -> Result<TransactionSummary, AppError> {
    let rows = list_for_year(pool, scope, year, property_id).await?;
    Ok(summarize(&rows, year))
}

/// Pure grouping over already-scoped rows.
///
/// Bucketing rules: the grouping month is the calendar month of `due_date`
/// (a late payment still counts toward the month it was owed), `status` is
/// authoritative for paid-vs-pending regardless of `date_paid`, and the
/// non-paid bucket folds pending and overdue together.
pub fn summarize(rows: &[Value], year: i32) -> TransactionSummary {
    let mut monthly: BTreeMap<u32, MonthlySummary> = BTreeMap::new();
    let mut annual = AnnualSummary::default();
    let mut by_property: BTreeMap<String, PropertySummary> = BTreeMap::new();
    let mut by_mode: BTreeMap<String, ModeSummary> = BTreeMap::new();

    for row in rows {
        let due_date = value_str(row, "due_date");
        let Ok(due_date) = NaiveDate::parse_from_str(&due_date, "%Y-%m-%d") else {
            continue;
        };
        let month = due_date.month();
        let status = value_str(row, "status");
        let amount = number_from_value(row.as_object().and_then(|obj| obj.get("amount")));
        let paid = status == "paid";

        let bucket = monthly.entry(month).or_insert_with(|| MonthlySummary {
            month,
            ..Default::default()
        });
        bucket.total_count += 1;
        annual.total_count += 1;
        if paid {
            bucket.paid_amount += amount;
            bucket.paid_count += 1;
            annual.total_paid += amount;
            annual.paid_count += 1;
        } else {
            bucket.pending_amount += amount;
            annual.total_pending += amount;
            match status.as_str() {
                "overdue" => {
                    bucket.overdue_count += 1;
                    annual.overdue_count += 1;
                }
                _ => bucket.pending_count += 1,
            }
        }

        let property_id = value_str(row, "property_id");
        let property = by_property
            .entry(property_id.clone())
            .or_insert_with(|| PropertySummary {
                id: property_id,
                name: value_str(row, "property_name"),
                ..Default::default()
            });
        property.total_count += 1;
        if paid {
            property.paid_amount += amount;
        } else {
            property.pending_amount += amount;
        }

        if paid {
            let mode = value_str(row, "mode");
            let mode_bucket = by_mode.entry(mode.clone()).or_insert_with(|| ModeSummary {
                mode,
                ..Default::default()
            });
            mode_bucket.count += 1;
            mode_bucket.total_amount += amount;
        }
    }

    let monthly = monthly
        .into_values()
        .map(|mut bucket| {
            bucket.paid_amount = round2(bucket.paid_amount);
            bucket.pending_amount = round2(bucket.pending_amount);
            bucket
        })
        .collect();

    annual.total_paid = round2(annual.total_paid);
    annual.total_pending = round2(annual.total_pending);

    let mut by_property: Vec<PropertySummary> = by_property
        .into_values()
        .map(|mut property| {
            property.paid_amount = round2(property.paid_amount);
            property.pending_amount = round2(property.pending_amount);
            property
        })
        .collect();
    by_property.sort_by(|left, right| right.paid_amount.total_cmp(&left.paid_amount));

    let by_mode = by_mode
        .into_values()
        .map(|mut mode| {
            mode.total_amount = round2(mode.total_amount);
            mode
        })
        .collect();

    TransactionSummary {
        monthly,
        annual,
        by_property,
        by_mode,
        year,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{summarize, AnnualSummary};

    fn row(
        due_date: &str,
        status: &str,
        amount: f64,
        mode: &str,
        property_id: &str,
        date_paid: Option<&str>,
    ) -> Value {
        json!({
            "id": format!("tx-{due_date}-{property_id}"),
            "property_id": property_id,
            "property_name": format!("Property {property_id}"),
            "tenant_id": "t1",
            "amount": amount,
            "due_date": due_date,
            "date_paid": date_paid,
            "mode": mode,
            "status": status,
        })
    }

    #[test]
    fn empty_input_yields_zeroed_annual_and_empty_groupings() {
        let summary = summarize(&[], 2024);
        assert_eq!(summary.annual, AnnualSummary::default());
        assert!(summary.monthly.is_empty());
        assert!(summary.by_property.is_empty());
        assert!(summary.by_mode.is_empty());
        assert_eq!(summary.year, 2024);
    }

    #[test]
    fn freshly_generated_obligation_shows_up_as_pending() {
        // One generated row for March 2024, nothing else.
        let rows = vec![row("2024-03-05", "pending", 15000.0, "cash", "p1", None)];
        let summary = summarize(&rows, 2024);

        assert_eq!(summary.annual.total_pending, 15000.0);
        assert_eq!(summary.annual.total_paid, 0.0);
        assert_eq!(summary.annual.total_count, 1);
        assert_eq!(summary.monthly.len(), 1);
        assert_eq!(summary.monthly[0].month, 3);
        assert_eq!(summary.monthly[0].pending_amount, 15000.0);
        assert_eq!(summary.monthly[0].pending_count, 1);
        assert!(summary.by_mode.is_empty(), "unpaid rows never reach byMode");
        assert_eq!(summary.by_property[0].pending_amount, 15000.0);
    }

    #[test]
    fn month_attribution_follows_due_date_not_paid_date() {
        let rows = vec![row(
            "2024-01-05",
            "paid",
            8000.0,
            "upi",
            "p1",
            Some("2024-03-20"),
        )];
        let summary = summarize(&rows, 2024);

        assert_eq!(summary.monthly.len(), 1);
        assert_eq!(summary.monthly[0].month, 1);
        assert_eq!(summary.monthly[0].paid_amount, 8000.0);
    }

    #[test]
    fn pending_bucket_folds_in_overdue_amounts() {
        let rows = vec![
            row("2024-06-05", "pending", 5000.0, "cash", "p1", None),
            row("2024-06-05", "overdue", 7000.0, "cash", "p2", None),
        ];
        let summary = summarize(&rows, 2024);

        assert_eq!(summary.monthly[0].pending_amount, 12000.0);
        assert_eq!(summary.monthly[0].pending_count, 1);
        assert_eq!(summary.monthly[0].overdue_count, 1);
        assert_eq!(summary.annual.total_pending, 12000.0);
        assert_eq!(summary.annual.overdue_count, 1);
    }

    #[test]
    fn status_is_authoritative_even_without_a_paid_date() {
        // Known soft spot: paid rows may lack date_paid. They still bucket
        // as paid.
        let rows = vec![row("2024-02-05", "paid", 6000.0, "cash", "p1", None)];
        let summary = summarize(&rows, 2024);

        assert_eq!(summary.annual.total_paid, 6000.0);
        assert_eq!(summary.annual.total_pending, 0.0);
        assert_eq!(summary.by_mode.len(), 1);
    }

    #[test]
    fn properties_order_by_paid_amount_descending() {
        let rows = vec![
            row("2024-01-05", "paid", 3000.0, "cash", "p1", Some("2024-01-06")),
            row("2024-01-05", "paid", 9000.0, "cash", "p2", Some("2024-01-06")),
            row("2024-02-05", "pending", 4000.0, "cash", "p3", None),
        ];
        let summary = summarize(&rows, 2024);

        let ids: Vec<&str> = summary
            .by_property
            .iter()
            .map(|property| property.id.as_str())
            .collect();
        assert_eq!(ids, vec!["p2", "p1", "p3"]);
    }

    #[test]
    fn modes_group_paid_rows_only() {
        let rows = vec![
            row("2024-01-05", "paid", 3000.0, "upi", "p1", Some("2024-01-06")),
            row("2024-02-05", "paid", 5000.0, "upi", "p1", Some("2024-02-06")),
            row("2024-03-05", "paid", 2000.0, "cash", "p1", Some("2024-03-06")),
            row("2024-04-05", "pending", 9000.0, "upi", "p1", None),
        ];
        let summary = summarize(&rows, 2024);

        assert_eq!(summary.by_mode.len(), 2);
        let upi = summary
            .by_mode
            .iter()
            .find(|mode| mode.mode == "upi")
            .unwrap();
        assert_eq!(upi.count, 2);
        assert_eq!(upi.total_amount, 8000.0);
    }

    #[test]
    fn months_come_back_in_ascending_order() {
        let rows = vec![
            row("2024-11-05", "pending", 1000.0, "cash", "p1", None),
            row("2024-02-05", "pending", 1000.0, "cash", "p1", None),
            row("2024-07-05", "pending", 1000.0, "cash", "p1", None),
        ];
        let summary = summarize(&rows, 2024);
        let months: Vec<u32> = summary.monthly.iter().map(|bucket| bucket.month).collect();
        assert_eq!(months, vec![2, 7, 11]);
    }
}
