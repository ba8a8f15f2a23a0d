use std::time::Instant;

use tracing::{error, info, warn};

use crate::api::StatementProvider;
use crate::database::DatabaseManager;
use crate::metrics;
use crate::models::{
    Company, Config, ConfigError, DataQualityError, RunStatus, RunSummary, StatementRecord,
    StatementType,
};
use crate::transform::{self, FiscalWindow};

/// Accumulator for one pipeline invocation. Owned by the orchestrator and
/// passed by reference through the company loop; there is no cross-run or
/// process-wide counter state.
pub struct RunStats {
    started: Instant,
    pub companies_attempted: i64,
    pub companies_processed: i64,
    pub api_calls: i64,
    pub api_failures: i64,
    pub quality_errors: Vec<DataQualityError>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            companies_attempted: 0,
            companies_processed: 0,
            api_calls: 0,
            api_failures: 0,
            quality_errors: Vec::new(),
        }
    }

    pub fn count_api_call(&mut self) {
        self.api_calls += 1;
    }

    pub fn count_api_failure(&mut self) {
        self.api_failures += 1;
    }

    pub fn push_quality(&mut self, error: DataQualityError) {
        self.quality_errors.push(error);
    }

    pub fn extend_quality(&mut self, errors: impl IntoIterator<Item = DataQualityError>) {
        self.quality_errors.extend(errors);
    }

    /// Derive the terminal status: SUCCESS only for a clean sweep, FAILED
    /// when nothing was processed, PARTIAL in between.
    pub fn status(&self) -> RunStatus {
        if self.companies_processed == 0 {
            RunStatus::Failed
        } else if self.api_failures == 0
            && self.quality_errors.is_empty()
            && self.companies_processed == self.companies_attempted
        {
            RunStatus::Success
        } else {
            RunStatus::Partial
        }
    }

    pub fn into_summary(self, workflow_name: &str) -> RunSummary {
        let status = self.status();
        let error_details = match status {
            RunStatus::Failed => Some("no companies were successfully processed".to_string()),
            _ => None,
        };
        RunSummary {
            workflow_name: workflow_name.to_string(),
            companies_processed: self.companies_processed,
            api_calls_made: self.api_calls,
            api_failures: self.api_failures,
            data_quality_errors: self.quality_errors,
            execution_time_seconds: self.started.elapsed().as_secs() as i64,
            status,
            error_details,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequences extract → normalize → load → calculate per company, one company
/// at a time. The only public entry point for running the pipeline.
pub struct EtlPipeline<P: StatementProvider> {
    provider: P,
    db: DatabaseManager,
    config: Config,
}

impl<P: StatementProvider> EtlPipeline<P> {
    pub fn new(provider: P, db: DatabaseManager, config: Config) -> Self {
        Self {
            provider,
            db,
            config,
        }
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    /// Run one full pipeline invocation. A single company's failure never
    /// aborts the run; the summary row is recorded unconditionally at the
    /// end, and the returned summary mirrors it.
    pub async fn run(&self) -> RunSummary {
        let mut stats = RunStats::new();

        info!(
            "starting {} for {} companies",
            self.config.workflow_name,
            self.config.target_companies.len()
        );

        let companies = self.resolve_companies(&mut stats).await;
        let window = FiscalWindow::current(self.config.years_to_fetch);

        for company in &companies {
            info!("processing {} ({})", company.symbol, company.name);
            match self.process_company(company, window, &mut stats).await {
                Ok(true) => {
                    stats.companies_processed += 1;
                    info!("✅ finished {}", company.symbol);
                }
                Ok(false) => {
                    warn!("no usable data for {}; moving on", company.symbol);
                }
                Err(err) => {
                    warn!("load failed for {}: {}; moving on", company.symbol, err);
                    stats.push_quality(
                        DataQualityError::new("load_failed", err.to_string())
                            .tagged(&company.symbol),
                    );
                }
            }
        }

        let summary = stats.into_summary(&self.config.workflow_name);
        info!(
            "run complete: status={} companies={} api_calls={} api_failures={} quality_issues={} duration={}s",
            summary.status,
            summary.companies_processed,
            summary.api_calls_made,
            summary.api_failures,
            summary.data_quality_errors.len(),
            summary.execution_time_seconds
        );

        // Recording is the last, unconditional step of every invocation.
        if let Err(err) = self.db.record_run(&summary).await {
            error!("failed to record run summary: {}", err);
        }

        summary
    }

    /// Resolve configured symbols to company rows, highest priority first.
    /// Unknown symbols are a configuration error for that company only.
    async fn resolve_companies(&self, stats: &mut RunStats) -> Vec<Company> {
        let mut companies = Vec::new();
        for symbol in &self.config.target_companies {
            stats.companies_attempted += 1;
            match self.db.company_by_symbol(symbol).await {
                Ok(Some(company)) => companies.push(company),
                Ok(None) => {
                    error!("company {} not found in database; skipping", symbol);
                    stats.push_quality(
                        DataQualityError::new(
                            "unknown_company",
                            ConfigError::UnknownCompany(symbol.clone()).to_string(),
                        )
                        .tagged(symbol),
                    );
                }
                Err(err) => {
                    error!("failed to look up company {}: {}", symbol, err);
                    stats.push_quality(
                        DataQualityError::new("load_failed", err.to_string()).tagged(symbol),
                    );
                }
            }
        }

        companies.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        companies
    }

    /// Fetch, normalize, load and derive for one company. Returns whether the
    /// company produced usable data; a load error aborts the company (its
    /// remaining batches and metrics) but not the run.
    async fn process_company(
        &self,
        company: &Company,
        window: FiscalWindow,
        stats: &mut RunStats,
    ) -> Result<bool, crate::database::LoadError> {
        let mut company_records: Vec<StatementRecord> = Vec::new();

        for statement_type in StatementType::ALL {
            let payload = match self
                .provider
                .fetch_statement(&company.symbol, statement_type, stats)
                .await
            {
                Ok(payload) => payload,
                Err(err) => {
                    // Already counted against the run by the client.
                    warn!(
                        "failed to fetch {} for {}: {}",
                        statement_type, company.symbol, err
                    );
                    continue;
                }
            };

            let (records, errors) =
                transform::normalize(company.id, &payload, statement_type, window);
            stats.extend_quality(errors.into_iter().map(|e| e.tagged(&company.symbol)));

            if records.is_empty() {
                warn!(
                    "no {} records for {} within the lookback window",
                    statement_type, company.symbol
                );
                continue;
            }

            let written = self.db.upsert_statements(&records).await?;
            info!(
                "loaded {} {} records for {}",
                written, statement_type, company.symbol
            );
            company_records.extend(records);
        }

        if company_records.is_empty() {
            stats.push_quality(
                DataQualityError::new(
                    "no_usable_records",
                    "no statement type produced usable records",
                )
                .tagged(&company.symbol),
            );
            return Ok(false);
        }

        stats.extend_quality(
            transform::validate_quality(&company_records)
                .into_iter()
                .map(|e| e.tagged(&company.symbol)),
        );

        let mut years: Vec<i32> = company_records.iter().map(|r| r.fiscal_year).collect();
        years.sort_unstable();
        years.dedup();

        let mut company_metrics = Vec::new();
        for year in years {
            let (year_metrics, errors) = metrics::calculate(company.id, year, &company_records);
            stats.extend_quality(errors.into_iter().map(|e| e.tagged(&company.symbol)));
            company_metrics.extend(year_metrics);
        }

        let written = self.db.upsert_metrics(&company_metrics).await?;
        info!("calculated {} metrics for {}", written, company.symbol);

        self.db.touch_company(company.id).await?;
        Ok(true)
    }
}
