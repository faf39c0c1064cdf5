//! Bounded retries for network operations
//!
//! Every IMAP round trip the engine makes goes through [`retrying!`]: the
//! operation runs under the configured timeout, recoverable failures are
//! retried with exponential backoff, and a dropped connection is re-opened
//! (re-selecting the folder that was selected) before the next attempt.

use crate::config::MigratorConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per operation, including the first
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
    /// Limit for a single network operation
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MigratorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MigratorConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            backoff_multiplier: config.retry.backoff_multiplier,
            jitter_enabled: config.retry.jitter,
            operation_timeout: Duration::from_secs(config.network.timeout_seconds),
        }
    }

    /// Delay before retrying after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let delay_ms =
            (self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent)) as u64;

        let delay = std::cmp::min(Duration::from_millis(delay_ms), self.max_delay);

        if self.jitter_enabled {
            add_jitter(delay)
        } else {
            delay
        }
    }
}

/// Spread retries of concurrent pairs by up to 10% either way
fn add_jitter(delay: Duration) -> Duration {
    let jitter_range = delay.as_millis() as f64 * 0.1;
    if jitter_range <= 0.0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let adjusted_ms = (delay.as_millis() as f64 + jitter).max(0.0) as u64;
    Duration::from_millis(adjusted_ms)
}

/// Run `$op` against the session held by `$link`, retrying per `$policy`.
///
/// Evaluates to `ImapResult<T>`. The closure-like `|session| expr` form binds
/// the live session for each attempt; `expr` must be a future.
macro_rules! retrying {
    ($policy:expr, $link:expr, $what:expr, |$session:ident| $op:expr) => {{
        let policy: &$crate::migration::retry::RetryPolicy = $policy;
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let outcome: $crate::imap::ImapResult<_> = match $link.session_mut() {
                Some($session) => match ::tokio::time::timeout(policy.operation_timeout, $op).await
                {
                    Ok(result) => result,
                    Err(_) => Err($crate::imap::ImapError::Timeout),
                },
                None => Err($crate::imap::ImapError::connection("not connected")),
            };

            match outcome {
                Ok(value) => break Ok(value),
                Err(error) => {
                    if error.is_connection_error() {
                        $link.invalidate();
                    }
                    if !error.is_recoverable() || attempt >= policy.max_attempts {
                        break Err(error);
                    }
                    let delay = policy.delay_for(attempt);
                    ::tracing::warn!(
                        "{} failed on {} (attempt {}/{}): {}, retrying in {:?}",
                        $what,
                        $link.describe(),
                        attempt,
                        policy.max_attempts,
                        error,
                        delay
                    );
                    ::tokio::time::sleep(delay).await;
                    if !$link.is_connected() {
                        if let Err(reconnect_error) = $link.reconnect(policy).await {
                            ::tracing::warn!(
                                "Reconnecting to {} failed: {}",
                                $link.describe(),
                                reconnect_error
                            );
                        }
                    }
                }
            }
        }
    }};
}

pub(crate) use retrying;
