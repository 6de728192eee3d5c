//! Webhook payloads, signatures and delivery records.

use crate::domain::event::TransitionEvent;
use crate::domain::payment::PaymentStatus;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";
pub const STATUS_CHANGED_EVENT: &str = "payment.status_changed";
const SIGNATURE_PREFIX: &str = "sha256=";

/// JSON body posted to a merchant.
///
/// Each payload carries its own status snapshot and timestamp. A retried older
/// notification can arrive after a newer one, so receivers must treat the
/// payload with the latest `timestamp` as authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub team_slug: String,
    pub timestamp: DateTime<Utc>,
    pub data: BTreeMap<String, serde_json::Value>,
}

impl WebhookPayload {
    pub fn from_event(event: &TransitionEvent) -> Self {
        let mut data = BTreeMap::new();
        data.insert("orderId".to_string(), event.order_id.clone().into());
        data.insert("previousStatus".to_string(), event.from_status.as_str().into());
        data.insert("reasonCode".to_string(), event.reason_code.clone().into());
        data.insert("amount".to_string(), event.amount.into());
        data.insert("currency".to_string(), event.currency.clone().into());
        if let Some(mask) = &event.card_mask {
            data.insert("cardMask".to_string(), mask.clone().into());
        }
        if !event.data.is_empty() {
            let merchant: serde_json::Map<String, serde_json::Value> = event
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect();
            data.insert("merchantData".to_string(), merchant.into());
        }
        Self {
            payment_id: event.payment_id.clone(),
            status: event.to_status,
            team_slug: event.team_slug.clone(),
            timestamp: event.timestamp,
            data,
        }
    }

    /// Canonical body bytes: fixed field order, sorted `data` keys, no
    /// insignificant whitespace.
    pub fn canonical_body(&self) -> Result<Vec<u8>, PaymentError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Receiver-side check of a signature header, in constant time.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let expected = sign(secret, body);
    let provided = header.trim();
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Pending,
    Retrying,
    Delivered,
    Failed,
}

/// Delivery record for one transition event, updated on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub delivery_id: String,
    pub payment_id: String,
    pub team_slug: String,
    pub status: PaymentStatus,
    pub target_url: String,
    pub payload_hash: String,
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_response_code: Option<u16>,
    pub last_error: Option<String>,
    pub outcome: DeliveryOutcome,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.outcome,
            DeliveryOutcome::Delivered | DeliveryOutcome::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event() -> TransitionEvent {
        TransitionEvent {
            payment_id: "pay-1".to_string(),
            order_id: "order-1".to_string(),
            team_slug: "demo".to_string(),
            from_status: PaymentStatus::Authorized,
            to_status: PaymentStatus::Confirmed,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            reason_code: "confirmed".to_string(),
            amount: 150_000,
            currency: "RUB".to_string(),
            card_mask: Some("411111******1111".to_string()),
            data: BTreeMap::from([("customer".to_string(), "42".to_string())]),
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = WebhookPayload::from_event(&event());
        let value: serde_json::Value =
            serde_json::from_slice(&payload.canonical_body().unwrap()).unwrap();
        assert_eq!(value["paymentId"], "pay-1");
        assert_eq!(value["status"], "CONFIRMED");
        assert_eq!(value["teamSlug"], "demo");
        assert_eq!(value["data"]["previousStatus"], "AUTHORIZED");
        assert_eq!(value["data"]["merchantData"]["customer"], "42");
    }

    #[test]
    fn test_canonical_body_is_stable() {
        let a = WebhookPayload::from_event(&event()).canonical_body().unwrap();
        let b = WebhookPayload::from_event(&event()).canonical_body().unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(b"{\"paymentId\":\"pay-1\",\"status\":\"CONFIRMED\""));
    }

    #[test]
    fn test_sign_and_verify() {
        let body = b"{\"paymentId\":\"pay-1\"}";
        let signature = sign("whsec", body);
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
        assert!(verify_signature("whsec", body, &signature));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("whsec", b"{}", &signature));
    }
}
