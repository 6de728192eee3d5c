use crate::domain::event::TransitionEvent;
use crate::domain::payment::Payment;
use crate::domain::ports::{DeliveryStore, EventSink, PaymentRepository, TeamRepository, Volume};
use crate::domain::team::Team;
use crate::domain::webhook::{DeliveryOutcome, WebhookDelivery};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<String, Payment>,
    orders: HashMap<(String, String), String>,
}

/// A thread-safe in-memory payment repository.
///
/// Keeps payments by id plus a `(team, order)` index under one
/// `Arc<RwLock<..>>`, so the uniqueness check and the insert are atomic.
#[derive(Default, Clone)]
pub struct InMemoryPaymentRepository {
    tables: Arc<RwLock<PaymentTables>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        let order_key = (payment.team_slug.clone(), payment.order_id.clone());
        if tables.orders.contains_key(&order_key) {
            return Err(PaymentError::Conflict(format!(
                "order {} already exists",
                payment.order_id
            )));
        }
        if tables.payments.contains_key(&payment.payment_id) {
            return Err(PaymentError::Conflict(format!(
                "payment {} already exists",
                payment.payment_id
            )));
        }
        tables.orders.insert(order_key, payment.payment_id.clone());
        tables.payments.insert(payment.payment_id.clone(), payment);
        Ok(())
    }

    async fn update(&self, payment: Payment, expected_version: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .payments
            .get_mut(&payment.payment_id)
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.payment_id)))?;
        if stored.version != expected_version {
            return Err(PaymentError::Conflict(format!(
                "payment {} was modified concurrently",
                payment.payment_id
            )));
        }
        let mut payment = payment;
        payment.version = expected_version + 1;
        *stored = payment;
        Ok(())
    }

    async fn get(&self, payment_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(payment_id).cloned())
    }

    async fn find_by_order(&self, team_slug: &str, order_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        let key = (team_slug.to_string(), order_id.to_string());
        Ok(tables
            .orders
            .get(&key)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn team_volume(
        &self,
        team_slug: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Volume> {
        let tables = self.tables.read().await;
        let volume = tables
            .payments
            .values()
            .filter(|p| {
                p.team_slug == team_slug && p.created_at >= since && p.consumes_limits(now)
            })
            .fold(Volume::default(), |acc, p| Volume {
                total_amount: acc.total_amount.saturating_add(p.amount.value()),
                count: acc.count.saturating_add(1),
            });
        Ok(volume)
    }

    async fn list_expirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let tables = self.tables.read().await;
        let mut due: Vec<&Payment> = tables
            .payments
            .values()
            .filter(|p| p.is_past_deadline(now))
            .collect();
        due.sort_by_key(|p| p.expires_at);
        Ok(due
            .into_iter()
            .take(limit)
            .map(|p| p.payment_id.clone())
            .collect())
    }
}

/// A thread-safe in-memory team registry.
#[derive(Default, Clone)]
pub struct InMemoryTeamRepository {
    teams: Arc<RwLock<HashMap<String, Team>>>,
}

impl InMemoryTeamRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TeamRepository for InMemoryTeamRepository {
    async fn store(&self, team: Team) -> Result<()> {
        let mut teams = self.teams.write().await;
        teams.insert(team.slug.clone(), team);
        Ok(())
    }

    async fn get(&self, slug: &str) -> Result<Option<Team>> {
        let teams = self.teams.read().await;
        Ok(teams.get(slug).cloned())
    }
}

/// Delivery records keyed by delivery id, kept in arrival order.
#[derive(Default, Clone)]
pub struct InMemoryDeliveryStore {
    deliveries: Arc<RwLock<Vec<WebhookDelivery>>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn record(&self, delivery: WebhookDelivery) -> Result<()> {
        let mut deliveries = self.deliveries.write().await;
        match deliveries
            .iter_mut()
            .find(|d| d.delivery_id == delivery.delivery_id)
        {
            Some(existing) => *existing = delivery,
            None => deliveries.push(delivery),
        }
        Ok(())
    }

    async fn for_payment(&self, payment_id: &str) -> Result<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .iter()
            .filter(|d| d.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn failed(&self) -> Result<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .iter()
            .filter(|d| d.outcome == DeliveryOutcome::Failed)
            .cloned()
            .collect())
    }
}

/// Event sink that only remembers what it was given.
///
/// Used where no webhook delivery is wanted, and by tests.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: TransitionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
