use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::{StatementPayload, StatementType};
use crate::pipeline::RunStats;

pub mod alpha_vantage;
pub use alpha_vantage::AlphaVantageClient;

/// Errors raised while fetching statement data from the provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure (connect, timeout, body read).
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status from the provider.
    #[error("provider returned HTTP {status}")]
    Status { status: StatusCode },

    /// Provider-reported rate limit (the `Note` body on a 200 response).
    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    /// Provider rejected the request (`Error Message` body, e.g. bad symbol
    /// or invalid API key).
    #[error("provider rejected request: {0}")]
    Api(String),

    /// Response body was not the expected statement JSON.
    #[error("malformed statement payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether a retry could plausibly succeed. Classification is kept here,
    /// away from any I/O, so it can be tested directly.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::RateLimited(_) => true,
            ProviderError::Status { status } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ProviderError::Api(_) | ProviderError::Malformed(_) => false,
        }
    }
}

/// Process-wide throttle enforcing a minimum delay between provider calls.
///
/// The delay applies across companies and statement types: the provider's
/// quota is per API key, not per call site. Callers serialize on the inner
/// lock, so the gap is honored even if two tasks race.
pub struct CallThrottle {
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallThrottle {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_call: Mutex::new(None),
        }
    }

    /// Sleep until at least `min_delay` has passed since the previous call,
    /// then mark this call. The first call goes through immediately.
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Seam between the pipeline and the provider wire. Production code uses
/// [`AlphaVantageClient`]; tests inject a canned transport.
#[async_trait::async_trait]
pub trait StatementProvider {
    /// Fetch one statement type for one company. Implementations count every
    /// dispatched call and every exhausted failure into `stats`.
    async fn fetch_statement(
        &self,
        symbol: &str,
        statement_type: StatementType,
        stats: &mut RunStats,
    ) -> Result<StatementPayload, ProviderError>;
}
