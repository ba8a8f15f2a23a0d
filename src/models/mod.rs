use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A company in the tracked universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
    /// Manual processing weight; higher goes first when the call budget is tight.
    pub priority: i64,
}

/// The closed set of statement types the provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementType {
    Income,
    Balance,
    CashFlow,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [
        StatementType::Income,
        StatementType::Balance,
        StatementType::CashFlow,
    ];

    /// Stable identifier used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Income => "INCOME",
            StatementType::Balance => "BALANCE",
            StatementType::CashFlow => "CASHFLOW",
        }
    }

    /// Provider `function` query parameter for this statement type.
    pub fn provider_function(&self) -> &'static str {
        match self {
            StatementType::Income => "INCOME_STATEMENT",
            StatementType::Balance => "BALANCE_SHEET",
            StatementType::CashFlow => "CASH_FLOW",
        }
    }
}

impl std::fmt::Display for StatementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized statement fact, keyed by
/// (company, statement type, fiscal year, fiscal period, metric name).
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRecord {
    pub company_id: i64,
    pub statement_type: StatementType,
    pub fiscal_year: i32,
    pub fiscal_period: String,
    pub metric_name: String,
    pub metric_value: Decimal,
    pub reported_currency: String,
    /// Original provider payload fragment, retained for traceability.
    pub raw_fragment: String,
}

/// Category tag for a derived ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricCategory {
    Profitability,
    Liquidity,
    Leverage,
    Efficiency,
}

impl MetricCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::Profitability => "PROFITABILITY",
            MetricCategory::Liquidity => "LIQUIDITY",
            MetricCategory::Leverage => "LEVERAGE",
            MetricCategory::Efficiency => "EFFICIENCY",
        }
    }
}

/// A derived ratio, keyed by (company, fiscal year, metric name).
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedMetric {
    pub company_id: i64,
    pub fiscal_year: i32,
    pub metric_name: String,
    pub metric_value: Decimal,
    pub category: MetricCategory,
}

/// A non-fatal anomaly in input data. Recorded in the run summary; never
/// aborts processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub kind: String,
    pub detail: String,
}

impl DataQualityError {
    pub fn new(kind: &str, detail: impl Into<String>) -> Self {
        Self {
            symbol: None,
            statement_type: None,
            fiscal_year: None,
            field: None,
            kind: kind.to_string(),
            detail: detail.into(),
        }
    }

    pub fn with_statement(mut self, statement_type: StatementType) -> Self {
        self.statement_type = Some(statement_type.as_str().to_string());
        self
    }

    pub fn with_year(mut self, fiscal_year: i32) -> Self {
        self.fiscal_year = Some(fiscal_year);
        self
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    /// Stamp the company symbol on an error raised below the company loop.
    pub fn tagged(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Partial => "PARTIAL",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline invocation; mirrors an `etl_runs` row.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub workflow_name: String,
    pub companies_processed: i64,
    pub api_calls_made: i64,
    pub api_failures: i64,
    pub data_quality_errors: Vec<DataQualityError>,
    pub execution_time_seconds: i64,
    pub status: RunStatus,
    pub error_details: Option<String>,
}

/// A persisted `etl_runs` row. Append-only history.
#[derive(Debug, Clone, Serialize)]
pub struct EtlRun {
    pub id: i64,
    pub run_date: DateTime<Utc>,
    pub workflow_name: String,
    pub companies_processed: i64,
    pub api_calls_made: i64,
    pub api_failures: i64,
    pub data_quality_errors: Vec<DataQualityError>,
    pub execution_time_seconds: i64,
    pub status: String,
    pub error_details: Option<String>,
}

/// Provider statement response: a symbol plus its annual reports.
#[derive(Debug, Clone, Deserialize)]
pub struct StatementPayload {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(rename = "annualReports", default)]
    pub annual_reports: Vec<AnnualReport>,
}

/// One reporting period from the provider, fields left provider-shaped.
/// Values arrive as strings (`"123456"`, `"None"`); coercion happens in the
/// normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnualReport {
    #[serde(rename = "fiscalDateEnding")]
    pub fiscal_date_ending: String,
    #[serde(rename = "reportedCurrency", skip_serializing_if = "Option::is_none")]
    pub reported_currency: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Startup/per-company configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable required")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {detail}")]
    InvalidVar { var: &'static str, detail: String },
    #[error("company {0} not found in database")]
    UnknownCompany(String),
}

/// Configuration for the application, resolved once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    /// Minimum delay between provider calls, milliseconds.
    pub call_delay_ms: u64,
    /// Fixed pause between retry attempts, milliseconds.
    pub retry_backoff_ms: u64,
    pub max_retries: u32,
    pub years_to_fetch: i32,
    pub target_companies: Vec<String>,
    pub database_url: String,
    pub workflow_name: String,
    pub bind_address: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Ok(Config {
            api_key: std::env::var("ALPHA_VANTAGE_API_KEY")
                .map_err(|_| ConfigError::MissingVar("ALPHA_VANTAGE_API_KEY"))?,
            base_url: std::env::var("ALPHA_VANTAGE_BASE_URL")
                .unwrap_or_else(|_| "https://www.alphavantage.co/query".to_string()),
            call_delay_ms: parse_var("ALPHA_VANTAGE_DELAY_MS", 12_000)?,
            retry_backoff_ms: parse_var("ALPHA_VANTAGE_RETRY_BACKOFF_MS", 15_000)?,
            max_retries: parse_var("ALPHA_VANTAGE_MAX_RETRIES", 3)?,
            years_to_fetch: parse_var("YEARS_TO_FETCH", 3)?,
            target_companies: std::env::var("TARGET_COMPANIES")
                .unwrap_or_else(|_| "TEL,ST,DD".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:fundamentals.db?mode=rwc".to_string()),
            workflow_name: std::env::var("WORKFLOW_NAME")
                .unwrap_or_else(|_| "fundamentals_etl".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1:5000".to_string()),
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            var,
            detail: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
