use std::time::Duration;

/// Tunables of the processing engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest wait for a per-payment lock before the call fails with `Timeout`.
    pub lock_timeout: Duration,
    /// Attempts for a repository call that fails transiently.
    pub repository_attempts: u32,
    /// First backoff between repository attempts; doubles each retry.
    pub repository_backoff: Duration,
    /// Deadline applied when an init request does not carry one.
    pub payment_ttl: chrono::Duration,
    /// Prefix of the hosted payment form URL returned by init.
    pub payment_form_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            repository_attempts: 3,
            repository_backoff: Duration::from_millis(50),
            payment_ttl: chrono::Duration::hours(24),
            payment_form_url: "http://localhost:8080/PaymentForm".to_string(),
        }
    }
}

/// Tunables of the webhook dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker tasks; each payment is pinned to one worker.
    pub workers: usize,
    /// Delay before the second attempt; doubles for every further attempt.
    pub backoff_base: Duration,
    pub user_agent: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            backoff_base: Duration::from_secs(1),
            user_agent: concat!("payment-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Settings of the periodic expiry sweep.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}
