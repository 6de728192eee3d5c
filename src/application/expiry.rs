use crate::application::engine::PaymentEngine;
use crate::config::SweeperConfig;
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::watch;

/// Periodically expires overdue payments through the engine, so each one
/// goes through the payment lock and the state machine like any API call.
#[derive(Clone)]
pub struct ExpirySweeper {
    engine: Arc<PaymentEngine>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    /// A `batch_size` of zero is raised to one.
    pub fn new(engine: Arc<PaymentEngine>, mut config: SweeperConfig) -> Self {
        config.batch_size = config.batch_size.max(1);
        Self { engine, config }
    }

    /// Sweeps every `interval` until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(err) = self.tick().await {
                tracing::error!(error = %err, "expiry sweep failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("expiry sweeper stopped");
    }

    /// One sweep; drains in batches until nothing overdue is left.
    pub async fn tick(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let expired = self.engine.expire_due(self.config.batch_size).await?;
            total += expired;
            if expired < self.config.batch_size {
                break;
            }
        }
        if total > 0 {
            tracing::info!(expired = total, "expired overdue payments");
        }
        Ok(total)
    }
}
