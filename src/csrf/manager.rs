//! CSRF token lifecycle: issue, validate, sweep, clear

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::CsrfConfig;
use crate::core::error::{CsrfError, Error, Result};
use crate::core::utils::{now, redact};
use crate::csrf::store::TokenStore;
use crate::csrf::token::{IssuedToken, TokenRecord, MIN_TOKEN_LENGTH};

/// Manager settings, usually taken from [`CsrfConfig`]
#[derive(Debug, Clone)]
pub struct CsrfSettings {
    /// Lifetime of newly issued tokens
    pub ttl: Duration,
    /// Store size at which the oldest tokens are evicted on issue
    pub max_tokens: usize,
    /// Remove a token on its first successful validation
    pub single_use: bool,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self::from(&CsrfConfig::default())
    }
}

impl From<&CsrfConfig> for CsrfSettings {
    fn from(config: &CsrfConfig) -> Self {
        Self {
            ttl: config.ttl,
            max_tokens: config.max_tokens,
            single_use: config.single_use,
        }
    }
}

/// Snapshot of the token store for the debug endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfStats {
    /// Entries currently held, expired or not
    pub total_tokens: usize,
    /// Entries still inside their TTL
    pub active_tokens: usize,
    /// Entries past their TTL that the sweeper has not removed yet
    pub expired_tokens: usize,
    /// Tokens issued by this instance since start
    pub total_issued: u64,
}

/// Issues and checks anti-forgery tokens against a [`TokenStore`]
pub struct CsrfManager<S: TokenStore> {
    store: S,
    settings: CsrfSettings,
    issued: AtomicU64,
}

impl<S: TokenStore> CsrfManager<S> {
    /// Create a manager over `store`
    pub fn new(store: S, settings: CsrfSettings) -> Self {
        Self {
            store,
            settings,
            issued: AtomicU64::new(0),
        }
    }

    /// Active settings
    pub fn settings(&self) -> &CsrfSettings {
        &self.settings
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Issue a token with the configured TTL
    pub async fn issue(&self) -> Result<IssuedToken> {
        self.issue_record(self.settings.ttl, None).await
    }

    /// Issue a token with an explicit TTL
    pub async fn issue_with_ttl(&self, ttl: Duration) -> Result<IssuedToken> {
        if ttl.is_zero() {
            return Err(Error::invalid_input("token TTL must be greater than zero"));
        }
        self.issue_record(ttl, None).await
    }

    /// Issue a token that only validates for `session`
    pub async fn issue_for_session(&self, session: &str) -> Result<IssuedToken> {
        if session.is_empty() {
            return Err(Error::invalid_input("session identifier must not be empty"));
        }
        self.issue_record(self.settings.ttl, Some(session.to_string()))
            .await
    }

    async fn issue_record(&self, ttl: Duration, session: Option<String>) -> Result<IssuedToken> {
        let record = TokenRecord::issue(now(), ttl, session);
        let issued = IssuedToken::from(&record);
        let token = redact(&record.value);

        let admission = self
            .store
            .insert_bounded(record, self.settings.max_tokens)
            .await?;
        if admission.evicted > 0 {
            warn!(evicted = admission.evicted, max_tokens = self.settings.max_tokens, "token store at capacity, evicted oldest tokens");
        }
        debug!(token = %token, purged = admission.purged, "issued CSRF token");

        self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(issued)
    }

    /// Check a presented token.
    ///
    /// Tokens bound to a session are rejected here; use
    /// [`validate_for_session`](Self::validate_for_session) for those.
    pub async fn validate(&self, presented: Option<&str>) -> Result<TokenRecord> {
        self.check(presented, None).await
    }

    /// Check a presented token on behalf of `session`.
    ///
    /// Unbound tokens are accepted for any session.
    pub async fn validate_for_session(
        &self,
        presented: Option<&str>,
        session: Option<&str>,
    ) -> Result<TokenRecord> {
        self.check(presented, Some(session)).await
    }

    async fn check(
        &self,
        presented: Option<&str>,
        session: Option<Option<&str>>,
    ) -> Result<TokenRecord> {
        let value = match presented.map(str::trim) {
            None | Some("") => return Err(CsrfError::Missing.into()),
            Some(v) if v.len() < MIN_TOKEN_LENGTH => return Err(CsrfError::Malformed.into()),
            Some(v) => v,
        };

        let record = match self.store.get(value).await? {
            Some(record) => record,
            None => {
                debug!(token = %redact(value), "CSRF token not found");
                return Err(CsrfError::NotFound.into());
            }
        };

        if record.is_expired_at(now()) {
            self.store.remove(value).await?;
            debug!(token = %redact(value), "CSRF token expired");
            return Err(CsrfError::Expired.into());
        }

        if let Some(bound) = record.session.as_deref() {
            let caller = session.flatten();
            if caller != Some(bound) {
                return Err(CsrfError::SessionMismatch.into());
            }
        }

        if self.settings.single_use && !self.store.remove(value).await? {
            // Lost a race with another request presenting the same token.
            return Err(CsrfError::NotFound.into());
        }

        Ok(record)
    }

    /// Entries currently held by the store
    pub async fn count(&self) -> Result<usize> {
        self.store.len().await
    }

    /// Remove every token, returning how many were removed
    pub async fn clear(&self) -> Result<usize> {
        let cleared = self.store.clear().await?;
        info!(cleared, "cleared all CSRF tokens");
        Ok(cleared)
    }

    /// Remove expired tokens, returning how many were removed
    pub async fn sweep(&self) -> Result<usize> {
        let removed = self.store.purge_expired(now()).await?;
        if removed > 0 {
            debug!(removed, "swept expired CSRF tokens");
        }
        Ok(removed)
    }

    /// Token counts for diagnostics
    pub async fn stats(&self) -> Result<CsrfStats> {
        let at = now();
        let records = self.store.records().await?;
        let expired_tokens = records.iter().filter(|r| r.is_expired_at(at)).count();

        Ok(CsrfStats {
            total_tokens: records.len(),
            active_tokens: records.len() - expired_tokens,
            expired_tokens,
            total_issued: self.issued.load(Ordering::Relaxed),
        })
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = manager.sweep().await {
                    warn!(error = %e, "CSRF sweep failed");
                }
            }
        })
    }
}
