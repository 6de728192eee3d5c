use crate::application::retry::RetryPolicy;
use crate::config::DispatcherConfig;
use crate::domain::event::TransitionEvent;
use crate::domain::ports::{
    ClockRef, DeliveryStoreRef, EventSink, SendFailure, TeamRepositoryRef, WebhookRequest,
    WebhookSenderRef,
};
use crate::domain::team::DEFAULT_WEBHOOK_ATTEMPTS;
use crate::domain::webhook::{
    self, DELIVERY_HEADER, DeliveryOutcome, EVENT_HEADER, SIGNATURE_HEADER, STATUS_CHANGED_EVENT,
    WebhookDelivery, WebhookPayload,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Delivers signed notifications for committed transitions.
///
/// Events are routed to one of `workers` queues by hashing the payment id,
/// so every payment's notifications go out one at a time and in the order
/// they were published, while different payments are delivered in parallel.
/// `publish` never waits on the network.
pub struct WebhookDispatcher {
    shards: RwLock<Vec<mpsc::UnboundedSender<TransitionEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookDispatcher {
    /// Spawns the worker tasks on the current tokio runtime.
    pub fn start(
        teams: TeamRepositoryRef,
        sender: WebhookSenderRef,
        deliveries: DeliveryStoreRef,
        clock: ClockRef,
        config: DispatcherConfig,
    ) -> Self {
        let count = config.workers.max(1);
        let mut shards = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = Worker {
                index,
                teams: teams.clone(),
                sender: sender.clone(),
                deliveries: deliveries.clone(),
                clock: clock.clone(),
                config: config.clone(),
            };
            shards.push(tx);
            workers.push(tokio::spawn(worker.run(rx)));
        }
        Self {
            shards: RwLock::new(shards),
            workers: Mutex::new(workers),
        }
    }

    /// Stops accepting events, waits for queued deliveries (including their
    /// retries) to finish and joins the workers.
    pub async fn shutdown(&self) {
        self.shards
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for handle in workers {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "webhook worker panicked");
            }
        }
    }
}

impl EventSink for WebhookDispatcher {
    fn publish(&self, event: TransitionEvent) {
        let shards = self.shards.read().unwrap_or_else(|p| p.into_inner());
        if shards.is_empty() {
            tracing::warn!(payment_id = %event.payment_id, "dispatcher stopped, event dropped");
            return;
        }
        let index = shard_for(&event.payment_id, shards.len());
        if let Err(err) = shards[index].send(event) {
            tracing::warn!(payment_id = %err.0.payment_id, "webhook worker gone, event dropped");
        }
    }
}

fn shard_for(payment_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    payment_id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

struct Worker {
    index: usize,
    teams: TeamRepositoryRef,
    sender: WebhookSenderRef,
    deliveries: DeliveryStoreRef,
    clock: ClockRef,
    config: DispatcherConfig,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<TransitionEvent>) {
        tracing::debug!(worker = self.index, "webhook worker started");
        while let Some(event) = rx.recv().await {
            self.deliver(event).await;
        }
        tracing::debug!(worker = self.index, "webhook worker stopped");
    }

    async fn deliver(&self, event: TransitionEvent) {
        let body = match WebhookPayload::from_event(&event).canonical_body() {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(payment_id = %event.payment_id, error = %err, "webhook payload not serializable");
                return;
            }
        };

        let lookup = RetryPolicy::new(DEFAULT_WEBHOOK_ATTEMPTS, self.config.backoff_base);
        let team = match lookup
            .run("webhook team lookup", || self.teams.get(&event.team_slug))
            .await
        {
            Ok(Some(team)) => team,
            Ok(None) => {
                tracing::warn!(team = %event.team_slug, "unknown team, webhook skipped");
                return;
            }
            Err(err) => {
                // The target is unknown, so the failure is kept on record for inspection.
                let mut delivery = self.new_delivery(&event, String::new(), &body, lookup.attempts);
                delivery.outcome = DeliveryOutcome::Failed;
                delivery.next_attempt_at = None;
                delivery.last_error = Some(format!("team lookup failed: {}", err));
                self.record(&delivery).await;
                tracing::error!(
                    payment_id = %event.payment_id,
                    team = %event.team_slug,
                    error = %err,
                    "team lookup failed, webhook delivery failed"
                );
                return;
            }
        };
        let (Some(url), Some(secret)) = (team.webhook_url, team.webhook_secret) else {
            return;
        };

        let signature = webhook::sign(&secret, &body);
        let policy = team.webhook_policy;
        let backoff = RetryPolicy::new(policy.attempts, self.config.backoff_base);
        let mut delivery = self.new_delivery(&event, url.clone(), &body, backoff.attempts);
        self.record(&delivery).await;

        for attempt in 1..=backoff.attempts {
            let request = WebhookRequest {
                url: url.clone(),
                headers: vec![
                    (SIGNATURE_HEADER.to_string(), signature.clone()),
                    (EVENT_HEADER.to_string(), STATUS_CHANGED_EVENT.to_string()),
                    (DELIVERY_HEADER.to_string(), delivery.delivery_id.clone()),
                ],
                body: body.clone(),
            };
            let result = self.sender.send(request, policy.timeout()).await;

            delivery.attempt_number = attempt;
            delivery.updated_at = self.clock.now();
            match result {
                Ok(code) if (200..300).contains(&code) => {
                    delivery.last_response_code = Some(code);
                    delivery.last_error = None;
                    delivery.next_attempt_at = None;
                    delivery.outcome = DeliveryOutcome::Delivered;
                    self.record(&delivery).await;
                    tracing::info!(
                        payment_id = %delivery.payment_id,
                        status = %delivery.status,
                        attempt,
                        "webhook delivered"
                    );
                    return;
                }
                Ok(code) => {
                    delivery.last_response_code = Some(code);
                    delivery.last_error = Some(format!("HTTP {}", code));
                }
                Err(SendFailure::Timeout) => {
                    delivery.last_response_code = None;
                    delivery.last_error = Some("timed out".to_string());
                }
                Err(SendFailure::Connection(reason)) => {
                    delivery.last_response_code = None;
                    delivery.last_error = Some(reason);
                }
            }

            if attempt < backoff.attempts {
                let delay = backoff.delay_after(attempt);
                delivery.outcome = DeliveryOutcome::Retrying;
                delivery.next_attempt_at = chrono::Duration::from_std(delay)
                    .ok()
                    .map(|d| delivery.updated_at + d);
                self.record(&delivery).await;
                tracing::warn!(
                    payment_id = %delivery.payment_id,
                    status = %delivery.status,
                    attempt,
                    error = delivery.last_error.as_deref().unwrap_or_default(),
                    "webhook attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        delivery.outcome = DeliveryOutcome::Failed;
        delivery.next_attempt_at = None;
        self.record(&delivery).await;
        tracing::error!(
            payment_id = %delivery.payment_id,
            status = %delivery.status,
            attempts = delivery.attempt_number,
            error = delivery.last_error.as_deref().unwrap_or_default(),
            "webhook delivery failed permanently"
        );
    }

    fn new_delivery(
        &self,
        event: &TransitionEvent,
        target_url: String,
        body: &[u8],
        max_attempts: u32,
    ) -> WebhookDelivery {
        let now = self.clock.now();
        WebhookDelivery {
            delivery_id: Uuid::new_v4().to_string(),
            payment_id: event.payment_id.clone(),
            team_slug: event.team_slug.clone(),
            status: event.to_status,
            target_url,
            payload_hash: webhook::payload_hash(body),
            attempt_number: 0,
            max_attempts,
            next_attempt_at: Some(now),
            last_response_code: None,
            last_error: None,
            outcome: DeliveryOutcome::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    async fn record(&self, delivery: &WebhookDelivery) {
        if let Err(err) = self.deliveries.record(delivery.clone()).await {
            tracing::warn!(delivery_id = %delivery.delivery_id, error = %err, "delivery record not stored");
        }
    }
}
