use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::models::{CalculatedMetric, DataQualityError, MetricCategory, StatementRecord};

/// All ratios are rounded to this many decimal places so repeated runs over
/// the same inputs store the same value.
const RATIO_SCALE: u32 = 4;

/// Outcome of evaluating one formula. Absence is an expected result, not an
/// error: a missing metric row means "insufficient data", which is distinct
/// from a computed zero.
enum Ratio {
    Value(Decimal),
    /// A required input is missing; skip without comment.
    Skip,
    /// Inputs present but the denominator is zero; skip and record a note.
    ZeroDenominator,
}

fn ratio(numerator: Option<Decimal>, denominator: Option<Decimal>) -> Ratio {
    match (numerator, denominator) {
        (Some(_), Some(d)) if d.is_zero() => Ratio::ZeroDenominator,
        (Some(n), Some(d)) => match n.checked_div(d) {
            Some(value) => Ratio::Value(value.round_dp(RATIO_SCALE)),
            None => Ratio::Skip,
        },
        _ => Ratio::Skip,
    }
}

/// Compute the fixed ratio catalogue for one company-year from its
/// normalized statement values. Returns the metrics that could be computed
/// plus a note for each formula skipped on a zero denominator; never yields
/// infinity or NaN.
pub fn calculate(
    company_id: i64,
    fiscal_year: i32,
    records: &[StatementRecord],
) -> (Vec<CalculatedMetric>, Vec<DataQualityError>) {
    let inputs: HashMap<&str, Decimal> = records
        .iter()
        .filter(|r| r.fiscal_year == fiscal_year)
        .map(|r| (r.metric_name.as_str(), r.metric_value))
        .collect();
    let get = |name: &str| inputs.get(name).copied();

    // Composite inputs: both components must be reported, otherwise the sum
    // would fabricate a total from partial data.
    let total_debt = match (get("long_term_debt"), get("current_debt")) {
        (Some(long_term), Some(current)) => Some(long_term + current),
        _ => None,
    };
    let quick_assets = match (get("current_assets"), get("inventory")) {
        (Some(assets), Some(inventory)) => Some(assets - inventory),
        _ => None,
    };

    let mut metrics = Vec::new();
    let mut errors = Vec::new();
    let mut push = |name: &str, category: MetricCategory, result: Ratio, denominator: &str| {
        match result {
            Ratio::Value(value) => metrics.push(CalculatedMetric {
                company_id,
                fiscal_year,
                metric_name: name.to_string(),
                metric_value: value,
                category,
            }),
            Ratio::Skip => {}
            Ratio::ZeroDenominator => errors.push(
                DataQualityError::new(
                    "zero_denominator",
                    format!("{} skipped: {} is zero", name, denominator),
                )
                .with_year(fiscal_year)
                .with_field(name),
            ),
        }
    };

    push(
        "net_margin",
        MetricCategory::Profitability,
        ratio(get("net_income"), get("total_revenue")),
        "total_revenue",
    );
    push(
        "gross_margin",
        MetricCategory::Profitability,
        ratio(get("gross_profit"), get("total_revenue")),
        "total_revenue",
    );
    push(
        "operating_margin",
        MetricCategory::Profitability,
        ratio(get("operating_income"), get("total_revenue")),
        "total_revenue",
    );
    push(
        "return_on_equity",
        MetricCategory::Profitability,
        ratio(get("net_income"), get("total_equity")),
        "total_equity",
    );
    push(
        "current_ratio",
        MetricCategory::Liquidity,
        ratio(get("current_assets"), get("current_liabilities")),
        "current_liabilities",
    );
    push(
        "quick_ratio",
        MetricCategory::Liquidity,
        ratio(quick_assets, get("current_liabilities")),
        "current_liabilities",
    );
    push(
        "debt_to_equity",
        MetricCategory::Leverage,
        ratio(total_debt, get("total_equity")),
        "total_equity",
    );
    push(
        "asset_turnover",
        MetricCategory::Efficiency,
        ratio(get("total_revenue"), get("total_assets")),
        "total_assets",
    );

    (metrics, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatementType;
    use pretty_assertions::assert_eq;

    fn record(name: &str, value: &str) -> StatementRecord {
        StatementRecord {
            company_id: 1,
            statement_type: StatementType::Income,
            fiscal_year: 2023,
            fiscal_period: "FY".to_string(),
            metric_name: name.to_string(),
            metric_value: value.parse().unwrap(),
            reported_currency: "USD".to_string(),
            raw_fragment: String::new(),
        }
    }

    fn metric<'a>(metrics: &'a [CalculatedMetric], name: &str) -> Option<&'a CalculatedMetric> {
        metrics.iter().find(|m| m.metric_name == name)
    }

    #[test]
    fn net_margin_is_exact_decimal() {
        let records = vec![record("total_revenue", "1000.00"), record("net_income", "150.00")];

        let (metrics, errors) = calculate(1, 2023, &records);

        let net_margin = metric(&metrics, "net_margin").unwrap();
        assert_eq!(net_margin.metric_value, "0.1500".parse::<Decimal>().unwrap());
        assert_eq!(net_margin.category, MetricCategory::Profitability);
        assert!(errors.is_empty());
    }

    #[test]
    fn repeated_calculation_is_bit_identical() {
        let records = vec![
            record("total_revenue", "16034000000"),
            record("net_income", "3262000000"),
            record("total_assets", "21712000000"),
            record("total_equity", "11398000000"),
        ];

        let (first, _) = calculate(1, 2023, &records);
        let (second, _) = calculate(1, 2023, &records);

        assert_eq!(first, second);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.metric_value.to_string(), b.metric_value.to_string());
        }
    }

    #[test]
    fn missing_equity_skips_only_equity_ratios() {
        let records = vec![
            record("total_revenue", "1000"),
            record("net_income", "150"),
            record("total_assets", "2000"),
            record("current_assets", "800"),
            record("inventory", "100"),
            record("current_liabilities", "400"),
            record("long_term_debt", "500"),
            record("current_debt", "50"),
        ];

        let (metrics, errors) = calculate(1, 2023, &records);

        assert!(metric(&metrics, "return_on_equity").is_none());
        assert!(metric(&metrics, "debt_to_equity").is_none());
        // Absence is silent; it is not a data-quality event.
        assert!(errors.is_empty());

        assert!(metric(&metrics, "net_margin").is_some());
        assert!(metric(&metrics, "current_ratio").is_some());
        assert!(metric(&metrics, "quick_ratio").is_some());
        assert!(metric(&metrics, "asset_turnover").is_some());
    }

    #[test]
    fn zero_revenue_skips_margins_with_a_note() {
        let records = vec![record("total_revenue", "0.00"), record("net_income", "50.00")];

        let (metrics, errors) = calculate(1, 2023, &records);

        assert!(metric(&metrics, "net_margin").is_none());
        let note = errors.iter().find(|e| e.field.as_deref() == Some("net_margin"));
        assert_eq!(note.unwrap().kind, "zero_denominator");
        // Zero revenue over zero assets would be asset turnover; only
        // formulas whose inputs were all present produce notes.
        assert!(errors.iter().all(|e| e.kind == "zero_denominator"));
    }

    #[test]
    fn quick_ratio_subtracts_inventory() {
        let records = vec![
            record("current_assets", "800"),
            record("inventory", "200"),
            record("current_liabilities", "400"),
        ];

        let (metrics, _) = calculate(1, 2023, &records);

        assert_eq!(
            metric(&metrics, "quick_ratio").unwrap().metric_value,
            "1.5".parse::<Decimal>().unwrap()
        );
        assert_eq!(
            metric(&metrics, "current_ratio").unwrap().metric_value,
            "2".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn debt_to_equity_requires_both_debt_components() {
        let partial = vec![record("long_term_debt", "500"), record("total_equity", "1000")];
        let (metrics, _) = calculate(1, 2023, &partial);
        assert!(metric(&metrics, "debt_to_equity").is_none());

        let full = vec![
            record("long_term_debt", "500"),
            record("current_debt", "100"),
            record("total_equity", "1000"),
        ];
        let (metrics, _) = calculate(1, 2023, &full);
        assert_eq!(
            metric(&metrics, "debt_to_equity").unwrap().metric_value,
            "0.6".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn records_from_other_years_are_ignored() {
        let mut records = vec![record("total_revenue", "1000"), record("net_income", "100")];
        let mut stale = record("net_income", "999999");
        stale.fiscal_year = 2020;
        records.push(stale);

        let (metrics, _) = calculate(1, 2023, &records);

        assert_eq!(
            metric(&metrics, "net_margin").unwrap().metric_value,
            "0.1".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn ratios_are_rounded_to_four_places() {
        let records = vec![record("total_revenue", "3"), record("net_income", "1")];

        let (metrics, _) = calculate(1, 2023, &records);

        assert_eq!(
            metric(&metrics, "net_margin").unwrap().metric_value,
            "0.3333".parse::<Decimal>().unwrap()
        );
    }
}
