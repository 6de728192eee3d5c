use crate::domain::card::CardData;
use crate::domain::payment::Payment;
use crate::domain::ports::{AuthorizationDecision, CardAuthorizer};
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub const DECLINED_PAN: &str = "4000000000000002";
pub const INSUFFICIENT_FUNDS_PAN: &str = "4000000000009995";
pub const BLOCKED_PAN: &str = "4000000000000069";

/// Sandbox issuer: approves every card except a few reserved test numbers.
///
/// | PAN                | outcome                         |
/// |--------------------|---------------------------------|
/// | `4000000000000002` | declined                        |
/// | `4000000000009995` | declined, insufficient funds    |
/// | `4000000000000069` | rejected, card blocked          |
#[derive(Debug, Default, Clone, Copy)]
pub struct TestCardAuthorizer;

#[async_trait]
impl CardAuthorizer for TestCardAuthorizer {
    async fn authorize(&self, payment: &Payment, card: &CardData) -> Result<AuthorizationDecision> {
        let decision = match card.pan.as_str() {
            DECLINED_PAN => AuthorizationDecision::Declined {
                reason: "card declined by issuer".to_string(),
            },
            INSUFFICIENT_FUNDS_PAN => AuthorizationDecision::Declined {
                reason: "insufficient funds".to_string(),
            },
            BLOCKED_PAN => AuthorizationDecision::Rejected {
                reason: "card blocked".to_string(),
            },
            _ => AuthorizationDecision::Approved {
                bank_order_id: Uuid::new_v4().simple().to_string(),
            },
        };
        tracing::debug!(
            payment_id = %payment.payment_id,
            card = %card.mask(),
            ?decision,
            "sandbox authorization"
        );
        Ok(decision)
    }
}
