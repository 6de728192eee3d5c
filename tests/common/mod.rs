#![allow(dead_code)]

use chrono::Utc;
use payment_gateway::application::dispatcher::WebhookDispatcher;
use payment_gateway::application::engine::PaymentEngine;
use payment_gateway::application::requests::{AuthorizeRequest, InitRequest, PaymentResponse};
use payment_gateway::config::{DispatcherConfig, EngineConfig};
use payment_gateway::domain::card::CardData;
use payment_gateway::domain::ports::TeamRepository;
use payment_gateway::domain::team::{Team, TeamLimits, WebhookPolicy};
use payment_gateway::error::Result;
use payment_gateway::infrastructure::clock::ManualClock;
use payment_gateway::infrastructure::http::ReqwestWebhookSender;
use payment_gateway::infrastructure::in_memory::{
    InMemoryDeliveryStore, InMemoryPaymentRepository, InMemoryTeamRepository,
};
use std::fs::File;
use std::io::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEMO: &str = "demo";
pub const DEMO_PASSWORD: &str = "demo-password-hash";
pub const WEBHOOK_SECRET: &str = "whsec-demo";
pub const APPROVED_PAN: &str = "4111111111111111";

pub fn demo_team(webhook_url: Option<String>) -> Team {
    Team {
        slug: DEMO.to_string(),
        password_hash: DEMO_PASSWORD.to_string(),
        active: true,
        webhook_secret: webhook_url.as_ref().map(|_| WEBHOOK_SECRET.to_string()),
        webhook_url,
        success_url: None,
        fail_url: None,
        limits: TeamLimits::default(),
        webhook_policy: WebhookPolicy {
            attempts: 3,
            timeout_secs: 2,
        },
    }
}

/// Engine wired to the real webhook dispatcher, with a manual clock and
/// millisecond retry backoff.
pub struct Gateway {
    pub engine: Arc<PaymentEngine>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub deliveries: Arc<InMemoryDeliveryStore>,
    pub payments: Arc<InMemoryPaymentRepository>,
    pub clock: Arc<ManualClock>,
}

impl Gateway {
    pub async fn new(team: Team) -> Self {
        let teams = Arc::new(InMemoryTeamRepository::new());
        teams.store(team).await.unwrap();
        let payments = Arc::new(InMemoryPaymentRepository::new());
        let deliveries = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let dispatcher = Arc::new(WebhookDispatcher::start(
            teams.clone(),
            Arc::new(ReqwestWebhookSender::new("payment-gateway-tests").unwrap()),
            deliveries.clone(),
            clock.clone(),
            DispatcherConfig {
                workers: 4,
                backoff_base: Duration::from_millis(1),
                ..Default::default()
            },
        ));
        let engine = PaymentEngine::new(payments.clone(), teams, dispatcher.clone())
            .with_clock(clock.clone())
            .with_config(EngineConfig {
                repository_backoff: Duration::from_millis(1),
                ..Default::default()
            });

        Self {
            engine: Arc::new(engine),
            dispatcher,
            deliveries,
            payments,
            clock,
        }
    }

    pub async fn init(&self, order_id: &str, amount: i64) -> PaymentResponse {
        self.engine
            .init(InitRequest::new(DEMO, order_id, amount, "RUB").sign(DEMO_PASSWORD))
            .await
            .unwrap()
    }

    pub async fn authorize(&self, payment_id: &str, pan: &str) -> Result<PaymentResponse> {
        self.engine
            .authorize(AuthorizeRequest {
                payment_id: payment_id.to_string(),
                card: CardData::with_expiry(pan, "12/30", "123")?,
            })
            .await
    }
}

/// Writes a teams file holding the demo team, returning its path.
pub fn write_teams_file(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("teams.json");
    let teams = serde_json::json!([{
        "slug": DEMO,
        "passwordHash": DEMO_PASSWORD,
        "limits": {"currencies": ["RUB"], "maxAmount": 10_000_000}
    }]);
    std::fs::write(&path, serde_json::to_vec_pretty(&teams)?)?;
    Ok(path)
}

/// Writes `orders` full init/authorize/confirm cycles as an operations file.
pub fn generate_operations_csv(path: &Path, orders: usize) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(file);

    wtr.write_record(["op", "team", "order", "amount", "currency", "pan", "expiry", "cvv"])?;

    for i in 1..=orders {
        let order = format!("order-{}", i);
        wtr.write_record(["init", DEMO, &order, "150000", "RUB"])?;
        wtr.write_record(["authorize", DEMO, &order, "", "", APPROVED_PAN, "12/30", "123"])?;
        wtr.write_record(["confirm", DEMO, &order, "150000"])?;
    }

    wtr.flush()?;
    Ok(())
}
