//! Request and response shapes of the engine operations.
//!
//! Field names follow the merchant API (`TeamSlug`, `OrderId`, ...). Each
//! signed request knows which of its scalars feed the token; the `sign`
//! helpers are what a merchant integration (or the batch driver) uses.

use crate::domain::card::CardData;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::token::TokenCodec;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitRequest {
    pub team_slug: String,
    pub amount: i64,
    pub order_id: String,
    pub currency: String,
    #[serde(default)]
    pub token: String,
    pub description: Option<String>,
    pub redirect_due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Accepted for compatibility; never part of the token.
    pub receipt: Option<serde_json::Value>,
}

impl InitRequest {
    pub fn new(team_slug: &str, order_id: &str, amount: i64, currency: &str) -> Self {
        Self {
            team_slug: team_slug.to_string(),
            amount,
            order_id: order_id.to_string(),
            currency: currency.to_string(),
            token: String::new(),
            description: None,
            redirect_due_date: None,
            data: BTreeMap::new(),
            receipt: None,
        }
    }

    pub fn expected_token(&self, password: &str) -> String {
        TokenCodec::compute_init_token(
            &self.amount.to_string(),
            &self.currency,
            &self.order_id,
            password,
            &self.team_slug,
        )
    }

    pub fn sign(mut self, password: &str) -> Self {
        self.token = self.expected_token(password);
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfirmRequest {
    pub team_slug: String,
    pub payment_id: String,
    pub amount: Option<i64>,
    #[serde(default)]
    pub token: String,
}

impl ConfirmRequest {
    pub fn new(team_slug: &str, payment_id: &str, amount: Option<i64>) -> Self {
        Self {
            team_slug: team_slug.to_string(),
            payment_id: payment_id.to_string(),
            amount,
            token: String::new(),
        }
    }

    pub fn expected_token(&self, password: &str) -> String {
        payment_token(self.amount, &self.payment_id, password, &self.team_slug)
    }

    pub fn sign(mut self, password: &str) -> Self {
        self.token = self.expected_token(password);
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CancelRequest {
    pub team_slug: String,
    pub payment_id: String,
    pub amount: Option<i64>,
    #[serde(default)]
    pub token: String,
}

impl CancelRequest {
    pub fn new(team_slug: &str, payment_id: &str, amount: Option<i64>) -> Self {
        Self {
            team_slug: team_slug.to_string(),
            payment_id: payment_id.to_string(),
            amount,
            token: String::new(),
        }
    }

    pub fn expected_token(&self, password: &str) -> String {
        payment_token(self.amount, &self.payment_id, password, &self.team_slug)
    }

    pub fn sign(mut self, password: &str) -> Self {
        self.token = self.expected_token(password);
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckRequest {
    pub team_slug: String,
    pub payment_id: String,
    #[serde(default)]
    pub token: String,
}

impl CheckRequest {
    pub fn new(team_slug: &str, payment_id: &str) -> Self {
        Self {
            team_slug: team_slug.to_string(),
            payment_id: payment_id.to_string(),
            token: String::new(),
        }
    }

    pub fn expected_token(&self, password: &str) -> String {
        TokenCodec::compute_check_token(&self.payment_id, password, &self.team_slug)
    }

    pub fn sign(mut self, password: &str) -> Self {
        self.token = self.expected_token(password);
        self
    }
}

/// Payment form submission. Authenticated by the form's CSRF protection, not
/// by a merchant token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizeRequest {
    pub payment_id: String,
    pub card: CardData,
}

fn payment_token(amount: Option<i64>, payment_id: &str, password: &str, team_slug: &str) -> String {
    let amount = amount.map(|a| a.to_string());
    TokenCodec::compute_payment_token(amount.as_deref(), payment_id, password, team_slug)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub team_slug: String,
    pub order_id: String,
    pub payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(rename = "PaymentURL", skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_mask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PaymentResponse {
    pub fn from_payment(payment: &Payment, payment_url: Option<String>) -> Self {
        Self {
            success: true,
            team_slug: payment.team_slug.clone(),
            order_id: payment.order_id.clone(),
            payment_id: payment.payment_id.clone(),
            amount: payment.amount.value(),
            currency: payment.currency.to_string(),
            status: payment.status,
            payment_url,
            card_mask: payment.card_mask.clone(),
            failure_reason: payment.failure_reason.clone(),
        }
    }
}

/// Uniform error body: stable code plus a human message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error_code: &'static str,
    pub message: String,
}

impl From<&PaymentError> for ErrorResponse {
    fn from(err: &PaymentError) -> Self {
        Self {
            success: false,
            error_code: err.code(),
            message: err.to_string(),
        }
    }
}
