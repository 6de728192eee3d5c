use crate::domain::payment::{Payment, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A committed status change, handed to the webhook dispatcher.
///
/// Carries a snapshot of the payment so the notification never has to read
/// state back from the repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub payment_id: String,
    pub order_id: String,
    pub team_slug: String,
    pub from_status: PaymentStatus,
    pub to_status: PaymentStatus,
    pub timestamp: DateTime<Utc>,
    pub reason_code: String,
    pub amount: i64,
    pub currency: String,
    pub card_mask: Option<String>,
    pub data: BTreeMap<String, String>,
}

impl TransitionEvent {
    pub fn from_payment(payment: &Payment, from_status: PaymentStatus, reason_code: &str) -> Self {
        Self {
            payment_id: payment.payment_id.clone(),
            order_id: payment.order_id.clone(),
            team_slug: payment.team_slug.clone(),
            from_status,
            to_status: payment.status,
            timestamp: payment.updated_at,
            reason_code: reason_code.to_string(),
            amount: payment.amount.value(),
            currency: payment.currency.to_string(),
            card_mask: payment.card_mask.clone(),
            data: payment.data.clone(),
        }
    }
}
