use crate::domain::payment::Payment;
use crate::domain::ports::{PaymentRepository, TeamRepository, Volume};
use crate::domain::team::Team;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for payments keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping `team \0 order` to a payment id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for team configurations keyed by slug.
pub const CF_TEAMS: &str = "teams";

/// A persistent store implementation using RocksDB.
///
/// Payments, the order index and teams live in separate Column Families.
/// Writes that check before they put (order uniqueness, version
/// compare-and-set) are serialized by a write gate and committed with a
/// single `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with the required
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_PAYMENTS, CF_ORDERS, CF_TEAMS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::ServiceUnavailable(format!("column family {} not found", name))
        })
    }

    fn read_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, payment_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_payments(&self) -> Result<Vec<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            payments.push(serde_json::from_slice(&value)?);
        }
        Ok(payments)
    }
}

fn order_key(team_slug: &str, order_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(team_slug.len() + order_id.len() + 1);
    key.extend_from_slice(team_slug.as_bytes());
    key.push(0);
    key.extend_from_slice(order_id.as_bytes());
    key
}

#[async_trait]
impl PaymentRepository for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let orders = self.cf(CF_ORDERS)?;
        let key = order_key(&payment.team_slug, &payment.order_id);
        if self.db.get_pinned_cf(orders, &key)?.is_some() {
            return Err(PaymentError::Conflict(format!(
                "order {} already exists",
                payment.order_id
            )));
        }
        if self.read_payment(&payment.payment_id)?.is_some() {
            return Err(PaymentError::Conflict(format!(
                "payment {} already exists",
                payment.payment_id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(orders, &key, payment.payment_id.as_bytes());
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.payment_id.as_bytes(),
            serde_json::to_vec(&payment)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn update(&self, payment: Payment, expected_version: u64) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let stored = self
            .read_payment(&payment.payment_id)?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.payment_id)))?;
        if stored.version != expected_version {
            return Err(PaymentError::Conflict(format!(
                "payment {} was modified concurrently",
                payment.payment_id
            )));
        }
        let mut payment = payment;
        payment.version = expected_version + 1;
        self.db.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.payment_id.as_bytes(),
            serde_json::to_vec(&payment)?,
        )?;
        Ok(())
    }

    async fn get(&self, payment_id: &str) -> Result<Option<Payment>> {
        self.read_payment(payment_id)
    }

    async fn find_by_order(&self, team_slug: &str, order_id: &str) -> Result<Option<Payment>> {
        let orders = self.cf(CF_ORDERS)?;
        match self.db.get_cf(orders, order_key(team_slug, order_id))? {
            Some(id) => {
                let id = String::from_utf8_lossy(&id);
                self.read_payment(&id)
            }
            None => Ok(None),
        }
    }

    // Full scans: the embedded store backs the single-node batch driver.
    async fn team_volume(
        &self,
        team_slug: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Volume> {
        Ok(self
            .scan_payments()?
            .into_iter()
            .filter(|p| {
                p.team_slug == team_slug && p.created_at >= since && p.consumes_limits(now)
            })
            .fold(Volume::default(), |acc, p| Volume {
                total_amount: acc.total_amount.saturating_add(p.amount.value()),
                count: acc.count.saturating_add(1),
            }))
    }

    async fn list_expirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let mut due: Vec<Payment> = self
            .scan_payments()?
            .into_iter()
            .filter(|p| p.is_past_deadline(now))
            .collect();
        due.sort_by_key(|p| p.expires_at);
        Ok(due.into_iter().take(limit).map(|p| p.payment_id).collect())
    }
}

#[async_trait]
impl TeamRepository for RocksDBStore {
    async fn store(&self, team: Team) -> Result<()> {
        let cf = self.cf(CF_TEAMS)?;
        self.db
            .put_cf(cf, team.slug.as_bytes(), serde_json::to_vec(&team)?)?;
        Ok(())
    }

    async fn get(&self, slug: &str) -> Result<Option<Team>> {
        let cf = self.cf(CF_TEAMS)?;
        match self.db.get_cf(cf, slug.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
