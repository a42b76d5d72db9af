//! Credit metering.
//!
//! Caches the server-owned daily token counter and derives the credit view
//! the status display and generation gate consume. Every remote call is
//! best-effort: a metering failure leaves the cache unchanged and is logged,
//! never surfaced. A stale credit display must not block the portal.

pub mod quota;

pub use quota::QuotaSnapshot;

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::config::{Config, QuotaConfig};

/// Timeout for metering calls.
const REQUEST_TIMEOUT_SECS: u64 = 15;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Non-2xx or transport failure from the usage endpoint. Logged, never
/// propagated past this module.
#[derive(Debug, Error)]
pub enum MeteringError {
    #[error("metering endpoint returned {status}")]
    Status { status: reqwest::StatusCode },
    #[error("metering endpoint unreachable: {0}")]
    Network(#[from] reqwest::Error),
}

/// Usage counter as the metering service reports it.
#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    tokens_used: u64,
}

#[derive(Debug, Serialize)]
struct UsageUpdate {
    tokens: u64,
}

/// Cached view of the remote usage counter, scoped to the current identity.
pub struct CreditMeter {
    session: Arc<SessionManager>,
    client: Client,
    base_url: String,
    quota: QuotaConfig,
    tokens_used: Mutex<u64>,
}

impl CreditMeter {
    pub fn new(config: &Config, session: Arc<SessionManager>) -> Self {
        Self {
            session,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.metering.base_url.trim_end_matches('/').to_string(),
            quota: config.quota.clone(),
            tokens_used: Mutex::new(0),
        }
    }

    /// Re-fetch the usage counter for the current identity. Without a valid
    /// session the cache resets to 0; the counter belongs to an account,
    /// not to an anonymous viewer.
    pub async fn refresh(&self) {
        let Some(session) = self.session.session().await else {
            debug!("no session — clearing cached usage counter");
            *self.tokens_used.lock() = 0;
            return;
        };

        match self.fetch(&session.id_token).await {
            Ok(tokens_used) => {
                debug!(tokens_used, "usage counter refreshed");
                *self.tokens_used.lock() = tokens_used;
            }
            Err(e) => warn!("credit refresh failed: {e}"),
        }
    }

    /// Report a generation's token spend and adopt the server's confirmed
    /// counter. The cache is never advanced on failure.
    pub async fn record(&self, tokens: u64) {
        let Some(session) = self.session.session().await else {
            debug!("no session — skipping usage report");
            return;
        };

        match self.submit(&session.id_token, tokens).await {
            Ok(tokens_used) => {
                debug!(tokens_used, "usage counter updated");
                *self.tokens_used.lock() = tokens_used;
            }
            Err(e) => warn!("usage report failed: {e}"),
        }
    }

    /// Derived quota view for the cached counter. Recomputed on every read.
    pub fn snapshot(&self) -> QuotaSnapshot {
        quota::snapshot(*self.tokens_used.lock(), &self.quota)
    }

    /// Cached tokens consumed today (last server-confirmed value).
    pub fn tokens_used(&self) -> u64 {
        *self.tokens_used.lock()
    }

    async fn fetch(&self, bearer: &str) -> Result<u64, MeteringError> {
        let response = self
            .client
            .get(format!("{}/data", self.base_url))
            .header("Authorization", format!("Bearer {bearer}"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MeteringError::Status {
                status: response.status(),
            });
        }

        let usage: UsageResponse = response.json().await?;
        Ok(usage.tokens_used)
    }

    async fn submit(&self, bearer: &str, tokens: u64) -> Result<u64, MeteringError> {
        let response = self
            .client
            .put(format!("{}/data", self.base_url))
            .header("Authorization", format!("Bearer {bearer}"))
            .json(&UsageUpdate { tokens })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MeteringError::Status {
                status: response.status(),
            });
        }

        let usage: UsageResponse = response.json().await?;
        Ok(usage.tokens_used)
    }
}
