use super::card::CardData;
use super::event::TransitionEvent;
use super::payment::Payment;
use super::team::Team;
use super::webhook::WebhookDelivery;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Sum and count of payments that consume a team's volume limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Volume {
    pub total_amount: i64,
    pub count: u32,
}

/// Durable store of payments.
///
/// `(team_slug, order_id)` is unique: `insert` fails with `Conflict` when it
/// is taken. `update` is a compare-and-set on `Payment::version` and fails with
/// `Conflict` when the stored version differs from `expected_version`; on
/// success the stored version is `expected_version + 1`.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Stores a new payment.
    ///
    /// # Arguments
    ///
    /// * `payment` - A payment at version 0 whose order id is not yet taken.
    async fn insert(&self, payment: Payment) -> Result<()>;
    /// Replaces a stored payment.
    ///
    /// # Arguments
    ///
    /// * `payment` - The new state of the payment.
    /// * `expected_version` - The version the caller read before changing it.
    async fn update(&self, payment: Payment, expected_version: u64) -> Result<()>;
    async fn get(&self, payment_id: &str) -> Result<Option<Payment>>;
    /// Looks a payment up by the merchant's order id.
    async fn find_by_order(&self, team_slug: &str, order_id: &str) -> Result<Option<Payment>>;
    /// Volume of payments created at or after `since` that still consume
    /// limits at `now` (see `Payment::consumes_limits`).
    async fn team_volume(
        &self,
        team_slug: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Volume>;
    /// Ids of in-flight payments whose deadline is at or before `now`.
    async fn list_expirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>>;
}

#[async_trait]
pub trait TeamRepository: Send + Sync {
    /// Inserts or replaces the team with the same slug.
    async fn store(&self, team: Team) -> Result<()>;
    async fn get(&self, slug: &str) -> Result<Option<Team>>;
}

/// Key of a per-payment exclusive section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Order { team_slug: String, order_id: String },
    Payment(String),
}

impl LockKey {
    pub fn order(team_slug: &str, order_id: &str) -> Self {
        LockKey::Order {
            team_slug: team_slug.to_string(),
            order_id: order_id.to_string(),
        }
    }

    pub fn payment(payment_id: &str) -> Self {
        LockKey::Payment(payment_id.to_string())
    }
}

/// Held exclusion; dropping it releases the key.
pub struct LockGuard {
    _inner: Box<dyn Any + Send>,
}

impl LockGuard {
    pub fn new<T: Any + Send>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// Exclusive, non-reentrant locks keyed by [`LockKey`].
///
/// Acquisition waits at most `timeout` and then fails with `Timeout`. A
/// waiter that is cancelled holds nothing.
#[async_trait]
pub trait KeyLock: Send + Sync {
    async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<LockGuard>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Approved { bank_order_id: String },
    Declined { reason: String },
    Rejected { reason: String },
}

/// Issuer-side authorization of a card for a payment.
#[async_trait]
pub trait CardAuthorizer: Send + Sync {
    async fn authorize(&self, payment: &Payment, card: &CardData) -> Result<AuthorizationDecision>;
}

/// Receives committed transitions. Must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: TransitionEvent);
}

/// Outgoing webhook HTTP request.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    Timeout,
    Connection(String),
}

/// Transport for webhook requests; returns the HTTP status code.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(
        &self,
        request: WebhookRequest,
        timeout: Duration,
    ) -> std::result::Result<u16, SendFailure>;
}

/// Inspection interface over webhook deliveries.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Inserts a delivery, or replaces the record with the same delivery id.
    async fn record(&self, delivery: WebhookDelivery) -> Result<()>;
    /// Deliveries of one payment, oldest first.
    async fn for_payment(&self, payment_id: &str) -> Result<Vec<WebhookDelivery>>;
    /// Deliveries that gave up, including those whose team could not be read.
    async fn failed(&self) -> Result<Vec<WebhookDelivery>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type PaymentRepositoryRef = Arc<dyn PaymentRepository>;
pub type TeamRepositoryRef = Arc<dyn TeamRepository>;
pub type KeyLockRef = Arc<dyn KeyLock>;
pub type CardAuthorizerRef = Arc<dyn CardAuthorizer>;
pub type EventSinkRef = Arc<dyn EventSink>;
pub type WebhookSenderRef = Arc<dyn WebhookSender>;
pub type DeliveryStoreRef = Arc<dyn DeliveryStore>;
pub type ClockRef = Arc<dyn Clock>;
