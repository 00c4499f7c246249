use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::error::FiscalError;
use super::types::DocumentType;

/// Highest value that still fits the 9-digit `secuencial`.
pub const MAX_SEQUENTIAL: u64 = 999_999_999;

/// The tuple a sequential is unique within.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceScope {
    pub company_id: String,
    pub document_type: DocumentType,
    pub establishment: String,
    pub emission_point: String,
}

impl std::fmt::Display for SequenceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}-{}",
            self.company_id,
            self.document_type.code(),
            self.establishment,
            self.emission_point
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    /// Lock wait timed out or the transaction lost a serialization race.
    #[error("sequence row busy: {0}")]
    Conflict(String),
    /// The scope has used every 9-digit number.
    #[error("sequence exhausted for {0}")]
    Exhausted(String),
    #[error("sequence store failure: {0}")]
    Backend(String),
}

/// Atomic read-increment-reserve of the next sequential.
///
/// A database implementation locks the scope row (`SELECT ... FOR UPDATE`)
/// and increments inside the same transaction. Only the scope row is
/// locked, so different scopes never contend.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn reserve_next(&self, scope: &SequenceScope) -> Result<u64, SequenceError>;
}

/// In-process store with one async mutex per scope.
#[derive(Debug)]
pub struct MemorySequenceStore {
    counters: std::sync::Mutex<HashMap<SequenceScope, Arc<Mutex<u64>>>>,
    lock_timeout: Duration,
}

impl Default for MemorySequenceStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemorySequenceStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            counters: std::sync::Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Continue a scope from the highest number already issued in it.
    pub fn seed(&self, scope: SequenceScope, last_issued: u64) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.insert(scope, Arc::new(Mutex::new(last_issued)));
    }

    /// Last number reserved in `scope` (0 if none).
    pub async fn current(&self, scope: &SequenceScope) -> u64 {
        let counter = self.counter(scope);
        let value = *counter.lock().await;
        value
    }

    fn counter(&self, scope: &SequenceScope) -> Arc<Mutex<u64>> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn reserve_next(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        let counter = self.counter(scope);
        let mut guard = tokio::time::timeout(self.lock_timeout, counter.lock())
            .await
            .map_err(|_| SequenceError::Conflict(format!("lock wait timeout on {scope}")))?;
        if *guard >= MAX_SEQUENTIAL {
            return Err(SequenceError::Exhausted(scope.to_string()));
        }
        *guard += 1;
        Ok(*guard)
    }
}

/// Exponential backoff schedule shared by allocation and submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    pub multiplier: u32,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Hands out unique, gap-free sequentials per [`SequenceScope`].
pub struct SequenceAllocator {
    store: Arc<dyn SequenceStore>,
    retry: RetryPolicy,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn SequenceStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Reserve the next sequential, retrying lock conflicts with backoff.
    pub async fn next_sequential(&self, scope: &SequenceScope) -> Result<u64, FiscalError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.reserve_next(scope).await {
                Ok(value) => {
                    tracing::debug!(%scope, sequential = value, attempt, "sequential reserved");
                    return Ok(value);
                }
                Err(SequenceError::Conflict(reason)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(%scope, attempt, ?delay, %reason, "sequence conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(%scope, attempt, error = %err, "sequence allocation failed");
                    return Err(FiscalError::AllocationFailed {
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Render a sequential as the 9-digit `secuencial`.
pub fn format_sequential(value: u64) -> Result<String, FiscalError> {
    if value == 0 || value > MAX_SEQUENTIAL {
        return Err(FiscalError::invalid(
            "sequential",
            format!("{value} does not fit 9 digits"),
        ));
    }
    Ok(format_sequential_unchecked(value))
}

pub(crate) fn format_sequential_unchecked(value: u64) -> String {
    format!("{value:09}")
}
