use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A positive payment amount in integer minor units (kopecks, cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self, PaymentError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationFailed(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = PaymentError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 alphabetic currency code, always three uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, PaymentError> {
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code.to_string()))
        } else {
            Err(PaymentError::ValidationFailed(format!(
                "Currency must be a three-letter uppercase code, got '{}'",
                code
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    New,
    FormShowed,
    Authorizing,
    Authorized,
    AuthFail,
    Confirming,
    Confirmed,
    Cancelling,
    Cancelled,
    Rejected,
    Refunded,
    DeadlineExpired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::New => "NEW",
            PaymentStatus::FormShowed => "FORM_SHOWED",
            PaymentStatus::Authorizing => "AUTHORIZING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::AuthFail => "AUTH_FAIL",
            PaymentStatus::Confirming => "CONFIRMING",
            PaymentStatus::Confirmed => "CONFIRMED",
            PaymentStatus::Cancelling => "CANCELLING",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Rejected => "REJECTED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::DeadlineExpired => "DEADLINE_EXPIRED",
        }
    }

    /// Terminal for its path. CONFIRMED may still be refunded.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Confirmed
                | PaymentStatus::Cancelled
                | PaymentStatus::Rejected
                | PaymentStatus::Refunded
                | PaymentStatus::DeadlineExpired
                | PaymentStatus::AuthFail
        )
    }

    /// States a passive deadline check may move to DEADLINE_EXPIRED.
    pub fn is_expirable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::New | PaymentStatus::FormShowed | PaymentStatus::Authorizing
        )
    }

    /// Failed or withdrawn payments do not consume team volume limits.
    pub fn counts_toward_limits(&self) -> bool {
        !matches!(
            self,
            PaymentStatus::AuthFail
                | PaymentStatus::Rejected
                | PaymentStatus::Cancelled
                | PaymentStatus::DeadlineExpired
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payment intent and its lifecycle bookkeeping.
///
/// Mutated only by the processing engine; `version` increases on every
/// persisted change and backs optimistic concurrency checks in repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub order_id: String,
    pub team_slug: String,
    pub amount: Amount,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub description: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub form_showed_at: Option<DateTime<Utc>>,
    pub authorizing_started_at: Option<DateTime<Utc>>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub card_mask: Option<String>,
    pub bank_order_id: Option<String>,
    pub failure_reason: Option<String>,
    pub authorization_attempts: u32,
    pub fingerprint: String,
    pub version: u64,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payment_id: String,
        team_slug: &str,
        order_id: &str,
        amount: Amount,
        currency: Currency,
        description: Option<String>,
        data: BTreeMap<String, String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let fingerprint = fingerprint(team_slug, order_id, amount, &currency);
        Self {
            payment_id,
            order_id: order_id.to_string(),
            team_slug: team_slug.to_string(),
            amount,
            currency,
            status: PaymentStatus::New,
            description,
            data,
            created_at,
            updated_at: created_at,
            expires_at,
            form_showed_at: None,
            authorizing_started_at: None,
            authorized_at: None,
            confirmed_at: None,
            cancelled_at: None,
            refunded_at: None,
            expired_at: None,
            card_mask: None,
            bank_order_id: None,
            failure_reason: None,
            authorization_attempts: 0,
            fingerprint,
            version: 0,
        }
    }

    /// Whether a deadline check at `now` must expire this payment.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.status.is_expirable() && self.expires_at <= now
    }

    /// Whether the payment uses up team limits at `now`. A payment past its
    /// deadline is read as DEADLINE_EXPIRED even before the sweeper stores it.
    pub fn consumes_limits(&self, now: DateTime<Utc>) -> bool {
        self.status.counts_toward_limits() && !self.is_past_deadline(now)
    }

    /// Moves to `status` and stamps the matching per-transition timestamp.
    ///
    /// Only the engine calls this, after the state machine accepted the edge.
    pub fn record_transition(&mut self, status: PaymentStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        let stamp = match status {
            PaymentStatus::FormShowed => &mut self.form_showed_at,
            PaymentStatus::Authorizing => &mut self.authorizing_started_at,
            PaymentStatus::Authorized => &mut self.authorized_at,
            PaymentStatus::Confirmed => &mut self.confirmed_at,
            PaymentStatus::Cancelled => &mut self.cancelled_at,
            PaymentStatus::Refunded => &mut self.refunded_at,
            PaymentStatus::DeadlineExpired => &mut self.expired_at,
            _ => return,
        };
        *stamp = Some(at);
    }

    /// True when a repeated init carries the same terms as this payment.
    pub fn matches_terms(&self, amount: Amount, currency: &Currency) -> bool {
        self.fingerprint == fingerprint(&self.team_slug, &self.order_id, amount, currency)
    }
}

/// Idempotency fingerprint of an init request.
pub fn fingerprint(team_slug: &str, order_id: &str, amount: Amount, currency: &Currency) -> String {
    let mut hasher = Sha256::new();
    hasher.update(team_slug.as_bytes());
    hasher.update([0u8]);
    hasher.update(order_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(amount.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(currency.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
