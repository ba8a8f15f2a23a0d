use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::models::{
    CalculatedMetric, Company, DataQualityError, EtlRun, RunSummary, StatementRecord,
};

/// Failures while writing to or reading from the store. Fatal to the current
/// batch, never to the whole run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("failed to encode data quality errors: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if missing) and migrate the database.
    pub async fn new(database_url: &str) -> Result<Self, LoadError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // One connection: the pipeline is sequential, and `sqlite::memory:`
        // databases are per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = DatabaseManager { pool };
        db.run_migrations().await?;
        info!("database initialized at {}", database_url);

        Ok(db)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), LoadError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY,
                symbol TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                sector TEXT,
                industry TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS financial_statements (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL,
                statement_type TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                fiscal_period TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value TEXT NOT NULL,
                reported_currency TEXT NOT NULL,
                raw_fragment TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (company_id) REFERENCES companies(id),
                UNIQUE(company_id, statement_type, fiscal_year, fiscal_period, metric_name)
            )",
            "CREATE TABLE IF NOT EXISTS calculated_metrics (
                id INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL,
                fiscal_year INTEGER NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value TEXT NOT NULL,
                metric_category TEXT NOT NULL,
                calculated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (company_id) REFERENCES companies(id),
                UNIQUE(company_id, fiscal_year, metric_name)
            )",
            "CREATE TABLE IF NOT EXISTS etl_runs (
                id INTEGER PRIMARY KEY,
                run_date DATETIME NOT NULL,
                workflow_name TEXT NOT NULL,
                companies_processed INTEGER NOT NULL,
                api_calls_made INTEGER NOT NULL,
                api_failures INTEGER NOT NULL,
                data_quality_errors TEXT NOT NULL,
                execution_time_seconds INTEGER NOT NULL,
                status TEXT NOT NULL,
                error_details TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_statements_company_year
                ON financial_statements(company_id, fiscal_year)",
            "CREATE INDEX IF NOT EXISTS idx_metrics_company_year
                ON calculated_metrics(company_id, fiscal_year)",
            "CREATE INDEX IF NOT EXISTS idx_etl_runs_run_date ON etl_runs(run_date)",
            "CREATE VIEW IF NOT EXISTS latest_company_metrics AS
                SELECT m.company_id, c.symbol, m.fiscal_year, m.metric_name,
                       m.metric_value, m.metric_category
                FROM calculated_metrics m
                JOIN companies c ON c.id = m.company_id
                JOIN (
                    SELECT company_id, MAX(fiscal_year) AS fiscal_year
                    FROM calculated_metrics
                    GROUP BY company_id
                ) latest
                  ON latest.company_id = m.company_id
                 AND latest.fiscal_year = m.fiscal_year",
            "CREATE VIEW IF NOT EXISTS recent_run_health AS
                SELECT id, run_date, workflow_name, companies_processed,
                       api_calls_made, api_failures, execution_time_seconds, status
                FROM etl_runs
                ORDER BY run_date DESC, id DESC
                LIMIT 30",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Look up a company by ticker symbol. Companies are seeded, never
    /// auto-created by the pipeline.
    pub async fn company_by_symbol(&self, symbol: &str) -> Result<Option<Company>, LoadError> {
        let row = sqlx::query(
            "SELECT id, symbol, name, sector, industry, priority
             FROM companies WHERE symbol = ?1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Company {
            id: row.get("id"),
            symbol: row.get("symbol"),
            name: row.get("name"),
            sector: row.get("sector"),
            industry: row.get("industry"),
            priority: row.get("priority"),
        }))
    }

    /// Insert-or-replace one company's statement batch in a single
    /// transaction: either the whole batch commits or none of it does.
    pub async fn upsert_statements(&self, records: &[StatementRecord]) -> Result<u64, LoadError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO financial_statements (
                    company_id, statement_type, fiscal_year, fiscal_period,
                    metric_name, metric_value, reported_currency, raw_fragment
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(company_id, statement_type, fiscal_year, fiscal_period, metric_name)
                DO UPDATE SET
                    metric_value = excluded.metric_value,
                    reported_currency = excluded.reported_currency,
                    raw_fragment = excluded.raw_fragment,
                    created_at = CURRENT_TIMESTAMP",
            )
            .bind(record.company_id)
            .bind(record.statement_type.as_str())
            .bind(record.fiscal_year)
            .bind(&record.fiscal_period)
            .bind(&record.metric_name)
            .bind(record.metric_value.to_string())
            .bind(&record.reported_currency)
            .bind(&record.raw_fragment)
            .execute(&mut tx)
            .await?;
        }
        tx.commit().await?;

        Ok(records.len() as u64)
    }

    /// Insert-or-replace calculated metrics, one transaction per batch.
    pub async fn upsert_metrics(&self, metrics: &[CalculatedMetric]) -> Result<u64, LoadError> {
        if metrics.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for metric in metrics {
            sqlx::query(
                "INSERT INTO calculated_metrics (
                    company_id, fiscal_year, metric_name, metric_value, metric_category
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(company_id, fiscal_year, metric_name)
                DO UPDATE SET
                    metric_value = excluded.metric_value,
                    metric_category = excluded.metric_category,
                    calculated_at = CURRENT_TIMESTAMP",
            )
            .bind(metric.company_id)
            .bind(metric.fiscal_year)
            .bind(&metric.metric_name)
            .bind(metric.metric_value.to_string())
            .bind(metric.category.as_str())
            .execute(&mut tx)
            .await?;
        }
        tx.commit().await?;

        Ok(metrics.len() as u64)
    }

    /// Bump a company's updated_at after a successful load.
    pub async fn touch_company(&self, company_id: i64) -> Result<(), LoadError> {
        sqlx::query("UPDATE companies SET updated_at = CURRENT_TIMESTAMP WHERE id = ?1")
            .bind(company_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append one run summary to the run history. Rows are immutable once
    /// written.
    pub async fn record_run(&self, summary: &RunSummary) -> Result<i64, LoadError> {
        let errors_json = serde_json::to_string(&summary.data_quality_errors)?;

        let result = sqlx::query(
            "INSERT INTO etl_runs (
                run_date, workflow_name, companies_processed, api_calls_made,
                api_failures, data_quality_errors, execution_time_seconds,
                status, error_details
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(Utc::now())
        .bind(&summary.workflow_name)
        .bind(summary.companies_processed)
        .bind(summary.api_calls_made)
        .bind(summary.api_failures)
        .bind(errors_json)
        .bind(summary.execution_time_seconds)
        .bind(summary.status.as_str())
        .bind(&summary.error_details)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent run row, if any. The "latest health" view over history.
    pub async fn latest_run(&self) -> Result<Option<EtlRun>, LoadError> {
        let row = sqlx::query(
            "SELECT id, run_date, workflow_name, companies_processed, api_calls_made,
                    api_failures, data_quality_errors, execution_time_seconds,
                    status, error_details
             FROM etl_runs
             ORDER BY run_date DESC, id DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw_errors: String = row.get("data_quality_errors");
                let data_quality_errors: Vec<DataQualityError> =
                    serde_json::from_str(&raw_errors)?;
                Ok(Some(EtlRun {
                    id: row.get("id"),
                    run_date: row.get::<DateTime<Utc>, _>("run_date"),
                    workflow_name: row.get("workflow_name"),
                    companies_processed: row.get("companies_processed"),
                    api_calls_made: row.get("api_calls_made"),
                    api_failures: row.get("api_failures"),
                    data_quality_errors,
                    execution_time_seconds: row.get("execution_time_seconds"),
                    status: row.get("status"),
                    error_details: row.get("error_details"),
                }))
            }
            None => Ok(None),
        }
    }

    /// Row counts, mostly for operational checks and tests.
    pub async fn statement_count(&self) -> Result<i64, LoadError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM financial_statements")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn metric_count(&self) -> Result<i64, LoadError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM calculated_metrics")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn run_count(&self) -> Result<i64, LoadError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM etl_runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Seed the default company universe. Safe to re-run.
    pub async fn seed_default_companies(&self) -> Result<usize, LoadError> {
        let companies = [
            ("TEL", "TE Connectivity", "Industrials", "Electronic Components", 3i64),
            ("ST", "Sensata Technologies", "Industrials", "Sensors & Controls", 2),
            ("DD", "DuPont de Nemours", "Materials", "Specialty Chemicals", 1),
        ];

        for (symbol, name, sector, industry, priority) in companies {
            sqlx::query(
                "INSERT INTO companies (symbol, name, sector, industry, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(symbol) DO UPDATE SET
                    name = excluded.name,
                    sector = excluded.sector,
                    industry = excluded.industry,
                    priority = excluded.priority",
            )
            .bind(symbol)
            .bind(name)
            .bind(sector)
            .bind(industry)
            .bind(priority)
            .execute(&self.pool)
            .await?;
        }

        Ok(companies.len())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricCategory, RunStatus, StatementType};
    use rust_decimal::Decimal;

    async fn test_db() -> DatabaseManager {
        let db = DatabaseManager::new("sqlite::memory:").await.unwrap();
        db.seed_default_companies().await.unwrap();
        db
    }

    fn statement(company_id: i64, name: &str, value: &str) -> StatementRecord {
        StatementRecord {
            company_id,
            statement_type: StatementType::Income,
            fiscal_year: 2023,
            fiscal_period: "FY".to_string(),
            metric_name: name.to_string(),
            metric_value: value.parse().unwrap(),
            reported_currency: "USD".to_string(),
            raw_fragment: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn seeded_companies_are_found_by_symbol() {
        let db = test_db().await;

        let tel = db.company_by_symbol("TEL").await.unwrap().unwrap();
        assert_eq!(tel.name, "TE Connectivity");
        assert_eq!(tel.priority, 3);

        assert!(db.company_by_symbol("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reseeding_does_not_duplicate_companies() {
        let db = test_db().await;
        db.seed_default_companies().await.unwrap();

        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn statement_upsert_replaces_instead_of_duplicating() {
        let db = test_db().await;
        let company = db.company_by_symbol("TEL").await.unwrap().unwrap();

        db.upsert_statements(&[statement(company.id, "total_revenue", "1000")])
            .await
            .unwrap();
        db.upsert_statements(&[statement(company.id, "total_revenue", "1100")])
            .await
            .unwrap();

        assert_eq!(db.statement_count().await.unwrap(), 1);
        let value: String = sqlx::query_scalar(
            "SELECT metric_value FROM financial_statements WHERE metric_name = 'total_revenue'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(value, "1100");
    }

    #[tokio::test]
    async fn metric_upsert_replaces_instead_of_duplicating() {
        let db = test_db().await;
        let company = db.company_by_symbol("ST").await.unwrap().unwrap();

        let mut metric = CalculatedMetric {
            company_id: company.id,
            fiscal_year: 2023,
            metric_name: "net_margin".to_string(),
            metric_value: "0.15".parse::<Decimal>().unwrap(),
            category: MetricCategory::Profitability,
        };
        db.upsert_metrics(std::slice::from_ref(&metric)).await.unwrap();
        metric.metric_value = "0.16".parse().unwrap();
        db.upsert_metrics(std::slice::from_ref(&metric)).await.unwrap();

        assert_eq!(db.metric_count().await.unwrap(), 1);
        let value: String =
            sqlx::query_scalar("SELECT metric_value FROM calculated_metrics LIMIT 1")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(value, "0.16");
    }

    #[tokio::test]
    async fn statements_for_unknown_company_are_rejected() {
        let db = test_db().await;

        let err = db
            .upsert_statements(&[statement(9999, "total_revenue", "1000")])
            .await;
        assert!(err.is_err());
        assert_eq!(db.statement_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_rows_round_trip_including_error_list() {
        let db = test_db().await;

        let summary = RunSummary {
            workflow_name: "fundamentals_etl".to_string(),
            companies_processed: 2,
            api_calls_made: 9,
            api_failures: 3,
            data_quality_errors: vec![DataQualityError::new("missing_value", "inventory")
                .tagged("DD")
                .with_year(2022)],
            execution_time_seconds: 41,
            status: RunStatus::Partial,
            error_details: None,
        };

        db.record_run(&summary).await.unwrap();
        let run = db.latest_run().await.unwrap().unwrap();

        assert_eq!(run.status, "PARTIAL");
        assert_eq!(run.companies_processed, 2);
        assert_eq!(run.api_calls_made, 9);
        assert_eq!(run.api_failures, 3);
        assert_eq!(run.data_quality_errors.len(), 1);
        assert_eq!(run.data_quality_errors[0].symbol.as_deref(), Some("DD"));
    }

    #[tokio::test]
    async fn latest_metrics_view_only_shows_most_recent_year() {
        let db = test_db().await;
        let company = db.company_by_symbol("TEL").await.unwrap().unwrap();

        for (year, value) in [(2022, "0.12"), (2023, "0.15")] {
            db.upsert_metrics(&[CalculatedMetric {
                company_id: company.id,
                fiscal_year: year,
                metric_name: "net_margin".to_string(),
                metric_value: value.parse().unwrap(),
                category: MetricCategory::Profitability,
            }])
            .await
            .unwrap();
        }

        let rows = sqlx::query("SELECT fiscal_year, metric_value FROM latest_company_metrics")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64, _>("fiscal_year"), 2023);
        assert_eq!(rows[0].get::<String, _>("metric_value"), "0.15");
    }
}
