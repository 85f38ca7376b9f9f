// graph_ingest/src/retry.rs
// Receive backoff policy and the retry wrapper for loader HTTP calls.

use std::future::Future;
use std::time::Duration;

use backoff::{ExponentialBackoff, future::retry};
use rand::Rng;
use tracing::{info, warn};

use crate::error::{IngestError, Result};

/// Exponential backoff with proportional jitter, used between failed queue receives.
///
/// `backoff = min(max, base * 2^(retry - 1))`, then a random jitter of up to
/// `backoff * jitter_factor` is added on top.
#[derive(Debug, Clone, PartialEq,)]
pub struct BackoffPolicy {
    pub base:          Duration,
    pub max:           Duration,
    pub jitter_factor: f64,
    pub max_retries:   u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base:          Duration::from_secs(10,),
            max:           Duration::from_secs(100,),
            jitter_factor: 0.25,
            max_retries:   8,
        }
    }
}

impl BackoffPolicy {
    /// Builds a policy from second-valued settings, rejecting negative or non-finite input.
    pub fn from_secs(base: f64, max: f64, jitter_factor: f64, max_retries: u32,) -> Result<Self,> {
        let seconds = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value,).map_err(|_| {
                IngestError::Configuration(format!(
                    "{} must be a finite, non-negative number of seconds, got {}",
                    name, value
                ),)
            },)
        };
        if !jitter_factor.is_finite() || jitter_factor < 0.0 {
            return Err(IngestError::Configuration(format!(
                "JITTER_FACTOR must be a finite, non-negative number, got {}",
                jitter_factor
            ),),);
        }
        Ok(Self {
            base: seconds("BASE_BACKOFF_SECONDS", base,)?,
            max: seconds("MAX_BACKOFF_SECONDS", max,)?,
            jitter_factor,
            max_retries,
        },)
    }

    /// Backoff before jitter for the given 1-based retry count.
    pub fn base_delay(&self, retry_count: u32,) -> Duration {
        let exponent = retry_count.saturating_sub(1,).min(31,);
        let scaled = self.base.as_secs_f64() * f64::from(1u32 << exponent,);
        Duration::try_from_secs_f64(scaled.min(self.max.as_secs_f64(),),).unwrap_or(self.max,)
    }

    /// Backoff for `retry_count` with jitter drawn from `unit` in `[0, 1)`.
    pub fn delay_with(&self, retry_count: u32, unit: f64,) -> Duration {
        let backoff = self.base_delay(retry_count,);
        let jitter = backoff.as_secs_f64() * self.jitter_factor * unit.clamp(0.0, 1.0,);
        backoff + Duration::try_from_secs_f64(jitter,).unwrap_or_default()
    }

    pub fn delay(&self, retry_count: u32,) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(0.0..1.0,);
        let delay = self.delay_with(retry_count, unit,);
        info!(
            retry_count,
            backoff_secs = self.base_delay(retry_count).as_secs_f64(),
            delay_secs = delay.as_secs_f64(),
            "Computed receive backoff"
        );
        delay
    }

    /// Upper bound on any delay this policy can produce.
    pub fn ceiling(&self,) -> Duration {
        let ceiling = self.max.as_secs_f64() * (1.0 + self.jitter_factor.max(0.0,));
        Duration::try_from_secs_f64(ceiling,).unwrap_or(self.max,)
    }
}

pub async fn execute_with_retry<F, Fut, T,>(operation: F,) -> Result<T,>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, backoff::Error<IngestError,>,>,>,
{
    let backoff = ExponentialBackoff {
        max_elapsed_time: Some(Duration::from_secs(60,),),
        ..ExponentialBackoff::default()
    };

    retry(backoff, operation,).await
}

/// Helper to wrap an IngestError into a backoff::Error.
pub fn transient_error(err: IngestError,) -> backoff::Error<IngestError,> {
    warn!("Transient error encountered, retrying: {}", err);
    backoff::Error::transient(err,)
}

pub fn permanent_error(err: IngestError,) -> backoff::Error<IngestError,> {
    backoff::Error::permanent(err,)
}

pub fn wrap_error(err: IngestError,) -> backoff::Error<IngestError,> {
    if err.is_transient() {
        transient_error(err,)
    } else {
        permanent_error(err,)
    }
}
