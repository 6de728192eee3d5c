mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{APPROVED_PAN, DEMO, DEMO_PASSWORD, demo_team};
use payment_gateway::application::engine::PaymentEngine;
use payment_gateway::application::requests::{AuthorizeRequest, ConfirmRequest, InitRequest};
use payment_gateway::domain::card::CardData;
use payment_gateway::domain::payment::{Payment, PaymentStatus};
use payment_gateway::domain::ports::{
    KeyLock, LockKey, PaymentRepository, TeamRepository, Volume,
};
use payment_gateway::error::Result;
use payment_gateway::infrastructure::in_memory::{
    InMemoryPaymentRepository, InMemoryTeamRepository, RecordingEventSink,
};
use payment_gateway::infrastructure::lock::InMemoryKeyLock;
use std::sync::Arc;
use std::time::Duration;

/// Payment store whose updates stall before they are written.
struct SlowUpdates {
    inner: InMemoryPaymentRepository,
    delay: Duration,
}

#[async_trait]
impl PaymentRepository for SlowUpdates {
    async fn insert(&self, payment: Payment) -> Result<()> {
        self.inner.insert(payment).await
    }

    async fn update(&self, payment: Payment, expected_version: u64) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update(payment, expected_version).await
    }

    async fn get(&self, payment_id: &str) -> Result<Option<Payment>> {
        self.inner.get(payment_id).await
    }

    async fn find_by_order(&self, team_slug: &str, order_id: &str) -> Result<Option<Payment>> {
        self.inner.find_by_order(team_slug, order_id).await
    }

    async fn team_volume(
        &self,
        team_slug: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Volume> {
        self.inner.team_volume(team_slug, since, now).await
    }

    async fn list_expirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        self.inner.list_expirable(now, limit).await
    }
}

struct Setup {
    engine: Arc<PaymentEngine>,
    payments: Arc<SlowUpdates>,
    locks: Arc<InMemoryKeyLock>,
    events: Arc<RecordingEventSink>,
}

async fn setup(update_delay: Duration) -> Setup {
    let teams = Arc::new(InMemoryTeamRepository::new());
    teams.store(demo_team(None)).await.unwrap();
    let payments = Arc::new(SlowUpdates {
        inner: InMemoryPaymentRepository::new(),
        delay: update_delay,
    });
    let locks = Arc::new(InMemoryKeyLock::new());
    let events = Arc::new(RecordingEventSink::new());
    let engine = PaymentEngine::new(payments.clone(), teams, events.clone()).with_lock(locks.clone());
    Setup {
        engine: Arc::new(engine),
        payments,
        locks,
        events,
    }
}

async fn authorized_payment(setup: &Setup) -> String {
    let created = setup
        .engine
        .init(InitRequest::new(DEMO, "order-1", 150_000, "RUB").sign(DEMO_PASSWORD))
        .await
        .unwrap();
    let authorized = setup
        .engine
        .authorize(AuthorizeRequest {
            payment_id: created.payment_id.clone(),
            card: CardData::with_expiry(APPROVED_PAN, "12/30", "123").unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(authorized.status, PaymentStatus::Authorized);
    created.payment_id
}

fn confirm(payment_id: &str) -> ConfirmRequest {
    ConfirmRequest::new(DEMO, payment_id, Some(150_000)).sign(DEMO_PASSWORD)
}

#[tokio::test]
async fn test_aborted_waiter_leaves_payment_untouched() {
    let setup = setup(Duration::ZERO).await;
    let payment_id = authorized_payment(&setup).await;
    let published = setup.events.events().len();

    let held = setup
        .locks
        .acquire(LockKey::payment(&payment_id), Duration::from_secs(1))
        .await
        .unwrap();
    let engine = setup.engine.clone();
    let request = confirm(&payment_id);
    let waiter = tokio::spawn(async move { engine.confirm(request).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    drop(held);

    let stored = setup.payments.get(&payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Authorized);
    assert_eq!(setup.events.events().len(), published);
    assert!(setup.locks.is_empty());

    let confirmed = setup.engine.confirm(confirm(&payment_id)).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Confirmed);
}

#[tokio::test]
async fn test_abort_before_commit_releases_lock() {
    let setup = setup(Duration::from_millis(200)).await;
    let payment_id = authorized_payment(&setup).await;
    let published = setup.events.events().len();

    let engine = setup.engine.clone();
    let request = confirm(&payment_id);
    let in_flight = tokio::spawn(async move { engine.confirm(request).await });
    // The confirm now holds the payment lock and stalls inside the write.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!setup.locks.is_empty());
    in_flight.abort();
    assert!(in_flight.await.unwrap_err().is_cancelled());

    let stored = setup.payments.get(&payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Authorized);
    assert_eq!(stored.version, 2);
    assert_eq!(setup.events.events().len(), published);
    assert!(setup.locks.is_empty());

    let confirmed = setup.engine.confirm(confirm(&payment_id)).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Confirmed);
}
