use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::models::{
    DataQualityError, StatementPayload, StatementRecord, StatementType,
};

/// Provider field name → canonical metric name, per statement type.
/// Provider responses carry many more fields than these; anything unmapped
/// is dropped without comment.
const INCOME_FIELDS: &[(&str, &str)] = &[
    ("totalRevenue", "total_revenue"),
    ("costOfRevenue", "cost_of_revenue"),
    ("grossProfit", "gross_profit"),
    ("operatingIncome", "operating_income"),
    ("netIncome", "net_income"),
    ("ebitda", "ebitda"),
    ("researchAndDevelopment", "research_and_development"),
    ("operatingExpenses", "operating_expenses"),
];

const BALANCE_FIELDS: &[(&str, &str)] = &[
    ("totalAssets", "total_assets"),
    ("totalCurrentAssets", "current_assets"),
    ("cashAndCashEquivalentsAtCarryingValue", "cash_and_equivalents"),
    ("inventory", "inventory"),
    ("totalLiabilities", "total_liabilities"),
    ("totalCurrentLiabilities", "current_liabilities"),
    ("totalShareholderEquity", "total_equity"),
    ("longTermDebt", "long_term_debt"),
    ("currentDebt", "current_debt"),
];

const CASHFLOW_FIELDS: &[(&str, &str)] = &[
    ("operatingCashflow", "operating_cashflow"),
    ("cashflowFromInvestment", "investing_cashflow"),
    ("cashflowFromFinancing", "financing_cashflow"),
    ("capitalExpenditures", "capital_expenditures"),
];

/// Fields every company-year is expected to report.
const CRITICAL_FIELDS: &[&str] = &["total_revenue", "net_income", "total_assets"];

pub fn field_map(statement_type: StatementType) -> &'static [(&'static str, &'static str)] {
    match statement_type {
        StatementType::Income => INCOME_FIELDS,
        StatementType::Balance => BALANCE_FIELDS,
        StatementType::CashFlow => CASHFLOW_FIELDS,
    }
}

/// Inclusive range of fiscal years kept by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiscalWindow {
    pub min_year: i32,
    pub max_year: i32,
}

impl FiscalWindow {
    /// Window ending at `latest_year`, reaching `years` back.
    pub fn lookback_from(latest_year: i32, years: i32) -> Self {
        Self {
            min_year: latest_year - years,
            max_year: latest_year,
        }
    }

    /// Window ending at the current calendar year.
    pub fn current(years: i32) -> Self {
        Self::lookback_from(Utc::now().year(), years)
    }

    fn contains(&self, year: i32) -> bool {
        year >= self.min_year && year <= self.max_year
    }
}

/// Convert one provider payload into normalized statement records.
///
/// Values that are absent, the provider's `"None"` marker, or unparsable are
/// reported as data-quality errors and excluded; the rest of the statement
/// still goes through. Output order is stable, so normalizing the same
/// payload twice yields identical records.
pub fn normalize(
    company_id: i64,
    payload: &StatementPayload,
    statement_type: StatementType,
    window: FiscalWindow,
) -> (Vec<StatementRecord>, Vec<DataQualityError>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for report in &payload.annual_reports {
        let fiscal_year = match parse_fiscal_year(&report.fiscal_date_ending) {
            Some(year) => year,
            None => {
                errors.push(
                    DataQualityError::new(
                        "invalid_fiscal_date",
                        format!("unparsable fiscalDateEnding {:?}", report.fiscal_date_ending),
                    )
                    .with_statement(statement_type),
                );
                continue;
            }
        };

        if !window.contains(fiscal_year) {
            continue;
        }

        let currency = report
            .reported_currency
            .clone()
            .unwrap_or_else(|| "USD".to_string());
        let raw_fragment = serde_json::to_string(report).unwrap_or_default();

        for (api_field, metric_name) in field_map(statement_type) {
            match coerce_value(report.fields.get(*api_field)) {
                Coerced::Value(value) => records.push(StatementRecord {
                    company_id,
                    statement_type,
                    fiscal_year,
                    fiscal_period: "FY".to_string(),
                    metric_name: (*metric_name).to_string(),
                    metric_value: value,
                    reported_currency: currency.clone(),
                    raw_fragment: raw_fragment.clone(),
                }),
                Coerced::Missing => errors.push(
                    DataQualityError::new("missing_value", format!("{} not reported", api_field))
                        .with_statement(statement_type)
                        .with_year(fiscal_year)
                        .with_field(metric_name),
                ),
                Coerced::NonNumeric(raw) => errors.push(
                    DataQualityError::new(
                        "non_numeric_value",
                        format!("cannot parse {:?} as a number", raw),
                    )
                    .with_statement(statement_type)
                    .with_year(fiscal_year)
                    .with_field(metric_name),
                ),
            }
        }
    }

    debug!(
        "normalized {} records from {} {} reports ({} issues)",
        records.len(),
        payload.annual_reports.len(),
        statement_type,
        errors.len()
    );

    (records, errors)
}

/// Cross-field checks over a company's combined records, grouped by year:
/// negative revenue, the balance-sheet identity within a 1% tolerance, and
/// missing critical fields. Violations are recorded, never fatal.
pub fn validate_quality(records: &[StatementRecord]) -> Vec<DataQualityError> {
    let mut by_year: BTreeMap<i32, HashMap<&str, Decimal>> = BTreeMap::new();
    for record in records {
        by_year
            .entry(record.fiscal_year)
            .or_default()
            .insert(record.metric_name.as_str(), record.metric_value);
    }

    let mut errors = Vec::new();
    for (year, metrics) in &by_year {
        if let Some(revenue) = metrics.get("total_revenue") {
            if *revenue < Decimal::ZERO {
                errors.push(
                    DataQualityError::new("negative_revenue", format!("total_revenue = {}", revenue))
                        .with_year(*year)
                        .with_field("total_revenue"),
                );
            }
        }

        if let (Some(assets), Some(liabilities), Some(equity)) = (
            metrics.get("total_assets"),
            metrics.get("total_liabilities"),
            metrics.get("total_equity"),
        ) {
            let diff = (*assets - (*liabilities + *equity)).abs();
            // 1% tolerance for rounding in reported figures.
            let tolerance = if *assets > Decimal::ZERO {
                *assets * Decimal::new(1, 2)
            } else {
                Decimal::new(1000, 0)
            };
            if diff > tolerance {
                errors.push(
                    DataQualityError::new(
                        "balance_sheet_mismatch",
                        format!(
                            "assets {} vs liabilities + equity {} (diff {})",
                            assets,
                            *liabilities + *equity,
                            diff
                        ),
                    )
                    .with_year(*year),
                );
            }
        }

        let missing: Vec<&str> = CRITICAL_FIELDS
            .iter()
            .filter(|field| !metrics.contains_key(**field))
            .copied()
            .collect();
        if !missing.is_empty() {
            errors.push(
                DataQualityError::new("missing_fields", missing.join(", ")).with_year(*year),
            );
        }
    }

    errors
}

fn parse_fiscal_year(fiscal_date_ending: &str) -> Option<i32> {
    fiscal_date_ending.get(..4)?.parse().ok()
}

enum Coerced {
    Value(Decimal),
    Missing,
    NonNumeric(String),
}

fn coerce_value(value: Option<&Value>) -> Coerced {
    match value {
        None | Some(Value::Null) => Coerced::Missing,
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed == "None" {
                Coerced::Missing
            } else {
                match trimmed.parse::<Decimal>() {
                    Ok(value) => Coerced::Value(value),
                    Err(_) => Coerced::NonNumeric(raw.clone()),
                }
            }
        }
        Some(Value::Number(n)) => match n.to_string().parse::<Decimal>() {
            Ok(value) => Coerced::Value(value),
            Err(_) => Coerced::NonNumeric(n.to_string()),
        },
        Some(other) => Coerced::NonNumeric(other.to_string()),
    }
}
