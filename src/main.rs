use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payment_gateway::application::dispatcher::WebhookDispatcher;
use payment_gateway::application::engine::PaymentEngine;
use payment_gateway::application::expiry::ExpirySweeper;
use payment_gateway::config::{DispatcherConfig, EngineConfig, SweeperConfig};
use payment_gateway::domain::ports::{DeliveryStoreRef, PaymentRepositoryRef, TeamRepositoryRef};
use payment_gateway::infrastructure::clock::SystemClock;
use payment_gateway::infrastructure::http::ReqwestWebhookSender;
use payment_gateway::infrastructure::in_memory::{
    InMemoryDeliveryStore, InMemoryPaymentRepository, InMemoryTeamRepository,
};
use payment_gateway::interfaces::batch::BatchDriver;
use payment_gateway::interfaces::csv::operation_reader::OperationReader;
use payment_gateway::interfaces::csv::result_writer::ResultWriter;
use payment_gateway::interfaces::teams::load_teams_file;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Operations CSV file (op,team,order,amount,currency,pan,expiry,cvv)
    input: PathBuf,

    /// Team configuration JSON file
    #[arg(long, env = "GATEWAY_TEAMS")]
    teams: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "GATEWAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Longest wait for a payment lock, in milliseconds
    #[arg(long, env = "GATEWAY_LOCK_TIMEOUT_MS", default_value_t = 5_000)]
    lock_timeout_ms: u64,

    /// Payment lifetime when init carries no due date, in seconds
    #[arg(long, env = "GATEWAY_PAYMENT_TTL_SECS", default_value_t = 86_400)]
    payment_ttl_secs: i64,

    /// Base URL of the hosted payment form
    #[arg(
        long,
        env = "GATEWAY_PAYMENT_FORM_URL",
        default_value = "http://localhost:8080/PaymentForm"
    )]
    payment_form_url: String,

    /// Webhook worker tasks
    #[arg(long, env = "GATEWAY_WEBHOOK_WORKERS", default_value_t = 4)]
    webhook_workers: usize,

    /// Delay before the first webhook retry, in milliseconds; doubles per retry
    #[arg(long, env = "GATEWAY_WEBHOOK_BACKOFF_MS", default_value_t = 1_000)]
    webhook_backoff_ms: u64,

    /// Interval of the expiry sweep, in seconds
    #[arg(long, env = "GATEWAY_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            payment_ttl: chrono::Duration::seconds(self.payment_ttl_secs),
            payment_form_url: self.payment_form_url.clone(),
            ..EngineConfig::default()
        }
    }

    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.webhook_workers,
            backoff_base: Duration::from_millis(self.webhook_backoff_ms),
            ..DispatcherConfig::default()
        }
    }

    fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            ..SweeperConfig::default()
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

#[cfg(feature = "storage-rocksdb")]
fn open_storage(db_path: Option<PathBuf>) -> Result<(PaymentRepositoryRef, TeamRepositoryRef)> {
    use payment_gateway::infrastructure::rocksdb::RocksDBStore;

    if let Some(db_path) = db_path {
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        let payments: PaymentRepositoryRef = Arc::new(store.clone());
        let teams: TeamRepositoryRef = Arc::new(store);
        return Ok((payments, teams));
    }
    Ok(in_memory_storage())
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_storage(db_path: Option<PathBuf>) -> Result<(PaymentRepositoryRef, TeamRepositoryRef)> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_storage())
}

fn in_memory_storage() -> (PaymentRepositoryRef, TeamRepositoryRef) {
    let payments: PaymentRepositoryRef = Arc::new(InMemoryPaymentRepository::new());
    let teams: TeamRepositoryRef = Arc::new(InMemoryTeamRepository::new());
    (payments, teams)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let teams = load_teams_file(&cli.teams).into_diagnostic()?;
    let (payments, team_repo) = open_storage(cli.db_path.clone())?;
    for team in &teams {
        team_repo.store(team.clone()).await.into_diagnostic()?;
    }
    tracing::info!(teams = teams.len(), "team configuration loaded");

    let dispatcher_config = cli.dispatcher_config();
    let sender = ReqwestWebhookSender::new(&dispatcher_config.user_agent).into_diagnostic()?;
    let deliveries: DeliveryStoreRef = Arc::new(InMemoryDeliveryStore::new());
    let dispatcher = Arc::new(WebhookDispatcher::start(
        team_repo.clone(),
        Arc::new(sender),
        deliveries.clone(),
        Arc::new(SystemClock),
        dispatcher_config,
    ));

    let engine = Arc::new(
        PaymentEngine::new(payments, team_repo, dispatcher.clone())
            .with_config(cli.engine_config()),
    );

    let (stop_sweeper, sweeper_signal) = watch::channel(false);
    let sweeper = ExpirySweeper::new(engine.clone(), cli.sweeper_config());
    let sweeper = tokio::spawn(sweeper.run(sweeper_signal));

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    let mut driver = BatchDriver::new(engine, &teams);
    let stdout = io::stdout();
    let mut writer = ResultWriter::new(stdout.lock());
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                let result = driver.execute(op).await;
                writer.write(&result).into_diagnostic()?;
            }
            Err(e) => {
                tracing::error!(error = %e, "skipping malformed operation row");
            }
        }
    }
    writer.flush().into_diagnostic()?;

    // Deliveries still queued go out before exit.
    let _ = stop_sweeper.send(true);
    sweeper.await.into_diagnostic()?;
    dispatcher.shutdown().await;

    let failed = deliveries.failed().await.into_diagnostic()?;
    if !failed.is_empty() {
        tracing::warn!(failed = failed.len(), "some webhook deliveries failed permanently");
    }

    Ok(())
}
