//! Common test utilities: scratch databases, configs and canned provider
//! payloads shared by the integration tests.

use chrono::Datelike;
use serde_json::json;

use fundamentals_etl::database::DatabaseManager;
use fundamentals_etl::models::{Config, StatementType};

/// Create a fresh scratch database file with the default companies seeded.
/// Keep the returned TempDir alive for the duration of the test.
pub async fn fresh_database() -> (tempfile::TempDir, DatabaseManager) {
    let dir = tempfile::tempdir().expect("failed to create scratch dir");
    let path = dir.path().join("test.db");
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let db = DatabaseManager::new(&url)
        .await
        .expect("failed to initialize test database");
    db.seed_default_companies()
        .await
        .expect("failed to seed companies");

    (dir, db)
}

/// Config pointed at a mock provider, with all delays zeroed for tests.
pub fn test_config(base_url: String, symbols: &[&str]) -> Config {
    Config {
        api_key: "demo".to_string(),
        base_url,
        call_delay_ms: 0,
        retry_backoff_ms: 0,
        max_retries: 3,
        years_to_fetch: 3,
        target_companies: symbols.iter().map(|s| s.to_string()).collect(),
        database_url: "sqlite::memory:".to_string(),
        workflow_name: "fundamentals_etl".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
    }
}

pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// A complete, internally consistent annual report for one statement type.
pub fn report_json(statement_type: StatementType, year: i32) -> serde_json::Value {
    let fiscal_date = format!("{year}-12-31");
    match statement_type {
        StatementType::Income => json!({
            "fiscalDateEnding": fiscal_date,
            "reportedCurrency": "USD",
            "totalRevenue": "1000",
            "costOfRevenue": "600",
            "grossProfit": "400",
            "operatingIncome": "250",
            "netIncome": "150",
            "ebitda": "300",
            "researchAndDevelopment": "50",
            "operatingExpenses": "150"
        }),
        StatementType::Balance => json!({
            "fiscalDateEnding": fiscal_date,
            "reportedCurrency": "USD",
            "totalAssets": "2000",
            "totalCurrentAssets": "800",
            "cashAndCashEquivalentsAtCarryingValue": "300",
            "inventory": "100",
            "totalLiabilities": "1200",
            "totalCurrentLiabilities": "400",
            "totalShareholderEquity": "795",
            "longTermDebt": "500",
            "currentDebt": "50"
        }),
        StatementType::CashFlow => json!({
            "fiscalDateEnding": fiscal_date,
            "reportedCurrency": "USD",
            "operatingCashflow": "280",
            "cashflowFromInvestment": "-120",
            "cashflowFromFinancing": "-60",
            "capitalExpenditures": "90"
        }),
    }
}

/// A full provider response body for one (symbol, statement type) call.
pub fn statement_body(
    statement_type: StatementType,
    symbol: &str,
    years: &[i32],
) -> serde_json::Value {
    json!({
        "symbol": symbol,
        "annualReports": years
            .iter()
            .map(|year| report_json(statement_type, *year))
            .collect::<Vec<_>>(),
    })
}
