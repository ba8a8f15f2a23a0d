use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::models::{Config, StatementPayload, StatementType};
use crate::pipeline::RunStats;

use super::{CallThrottle, ProviderError, StatementProvider};

/// Client for the statement provider's REST API.
///
/// One GET per (symbol, statement type); authentication is an API key query
/// parameter. Never caches — every call is a live fetch. Daily-quota
/// management is the scheduler's concern, not enforced here.
pub struct AlphaVantageClient {
    client: Client,
    api_key: String,
    base_url: String,
    throttle: CallThrottle,
    max_retries: u32,
    retry_backoff: Duration,
}

impl AlphaVantageClient {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("fundamentals-etl/0.1")
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            throttle: CallThrottle::new(Duration::from_millis(config.call_delay_ms)),
            max_retries: config.max_retries.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// One attempt against the wire, classified but not retried.
    async fn request_once(
        &self,
        symbol: &str,
        statement_type: StatementType,
    ) -> Result<StatementPayload, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", statement_type.provider_function()),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status { status });
        }

        let body = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body)?;

        // The provider reports application errors inside a 200 response.
        if let Some(message) = value.get("Error Message").and_then(|v| v.as_str()) {
            return Err(ProviderError::Api(message.to_string()));
        }
        if let Some(note) = value.get("Note").and_then(|v| v.as_str()) {
            return Err(ProviderError::RateLimited(note.to_string()));
        }

        let payload: StatementPayload = serde_json::from_value(value)?;
        Ok(payload)
    }
}

#[async_trait::async_trait]
impl StatementProvider for AlphaVantageClient {
    /// Fetch with bounded retry: transient failures get `max_retries`
    /// attempts with a fixed backoff; fatal ones short-circuit immediately.
    async fn fetch_statement(
        &self,
        symbol: &str,
        statement_type: StatementType,
        stats: &mut RunStats,
    ) -> Result<StatementPayload, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.throttle.wait().await;
            stats.count_api_call();

            debug!(
                "fetching {} for {} (attempt {}/{})",
                statement_type, symbol, attempt, self.max_retries
            );

            match self.request_once(symbol, statement_type).await {
                Ok(payload) => {
                    debug!(
                        "fetched {} for {}: {} annual reports",
                        statement_type,
                        symbol,
                        payload.annual_reports.len()
                    );
                    return Ok(payload);
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    warn!(
                        "transient failure fetching {} for {}: {}; retrying in {:?}",
                        statement_type, symbol, err, self.retry_backoff
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(err) => {
                    stats.count_api_failure();
                    return Err(err);
                }
            }
        }
    }
}
