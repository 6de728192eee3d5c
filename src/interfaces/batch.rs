use super::csv::operation_reader::{Operation, OperationKind};
use super::csv::result_writer::OperationResult;
use crate::application::engine::PaymentEngine;
use crate::application::requests::{
    AuthorizeRequest, CancelRequest, CheckRequest, ConfirmRequest, InitRequest, PaymentResponse,
};
use crate::domain::card::CardData;
use crate::domain::team::Team;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Replays operation rows against the engine, acting as every merchant.
///
/// Requests are signed with the team's password hash, and `order` columns
/// are resolved to the payment id that init returned for them.
pub struct BatchDriver {
    engine: Arc<PaymentEngine>,
    passwords: HashMap<String, String>,
    payments: HashMap<(String, String), String>,
}

impl BatchDriver {
    pub fn new(engine: Arc<PaymentEngine>, teams: &[Team]) -> Self {
        let passwords = teams
            .iter()
            .map(|team| (team.slug.clone(), team.password_hash.clone()))
            .collect();
        Self {
            engine,
            passwords,
            payments: HashMap::new(),
        }
    }

    pub async fn execute(&mut self, op: Operation) -> OperationResult {
        let outcome = self.dispatch(&op).await;
        let known_id = self.payment_id(&op).ok();
        match outcome {
            Ok(response) => OperationResult {
                op: op.op,
                team: op.team,
                order: op.order,
                payment_id: Some(response.payment_id),
                status: Some(response.status),
                error: None,
            },
            Err(err) => {
                tracing::warn!(op = %op.op, team = %op.team, order = %op.order, error = %err, "operation failed");
                OperationResult {
                    op: op.op,
                    team: op.team,
                    order: op.order,
                    payment_id: known_id,
                    status: None,
                    error: Some(err.code()),
                }
            }
        }
    }

    async fn dispatch(&mut self, op: &Operation) -> Result<PaymentResponse> {
        // Unknown teams still reach the engine, which rejects the token.
        let password = self.passwords.get(&op.team).cloned().unwrap_or_default();
        match op.op {
            OperationKind::Init => {
                let amount = op.amount.ok_or_else(|| missing("amount"))?;
                let currency = op.currency.as_deref().ok_or_else(|| missing("currency"))?;
                let response = self
                    .engine
                    .init(InitRequest::new(&op.team, &op.order, amount, currency).sign(&password))
                    .await?;
                self.payments.insert(
                    (op.team.clone(), op.order.clone()),
                    response.payment_id.clone(),
                );
                Ok(response)
            }
            OperationKind::ShowForm => self.engine.show_form(&self.payment_id(op)?).await,
            OperationKind::Authorize => {
                let card = CardData::with_expiry(
                    op.pan.as_deref().ok_or_else(|| missing("pan"))?,
                    op.expiry.as_deref().ok_or_else(|| missing("expiry"))?,
                    op.cvv.as_deref().ok_or_else(|| missing("cvv"))?,
                )?;
                self.engine
                    .authorize(AuthorizeRequest {
                        payment_id: self.payment_id(op)?,
                        card,
                    })
                    .await
            }
            OperationKind::Confirm => {
                let request = ConfirmRequest::new(&op.team, &self.payment_id(op)?, op.amount);
                self.engine.confirm(request.sign(&password)).await
            }
            OperationKind::Cancel => {
                let request = CancelRequest::new(&op.team, &self.payment_id(op)?, op.amount);
                self.engine.cancel(request.sign(&password)).await
            }
            OperationKind::Check => {
                let request = CheckRequest::new(&op.team, &self.payment_id(op)?);
                self.engine.check(request.sign(&password)).await
            }
        }
    }

    fn payment_id(&self, op: &Operation) -> Result<String> {
        self.payments
            .get(&(op.team.clone(), op.order.clone()))
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("order {}", op.order)))
    }
}

fn missing(column: &str) -> PaymentError {
    PaymentError::ValidationFailed(format!("column {} is required", column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;
    use crate::domain::ports::TeamRepository;
    use crate::domain::team::{TeamLimits, WebhookPolicy};
    use crate::infrastructure::in_memory::{
        InMemoryPaymentRepository, InMemoryTeamRepository, RecordingEventSink,
    };

    fn op(kind: OperationKind, order: &str, amount: Option<i64>) -> Operation {
        Operation {
            op: kind,
            team: "demo".to_string(),
            order: order.to_string(),
            amount,
            currency: Some("RUB".to_string()),
            pan: Some("4111111111111111".to_string()),
            expiry: Some("12/30".to_string()),
            cvv: Some("123".to_string()),
        }
    }

    async fn driver() -> BatchDriver {
        let team = Team {
            slug: "demo".to_string(),
            password_hash: "secret".to_string(),
            active: true,
            webhook_url: None,
            webhook_secret: None,
            success_url: None,
            fail_url: None,
            limits: TeamLimits::default(),
            webhook_policy: WebhookPolicy::default(),
        };
        let teams = Arc::new(InMemoryTeamRepository::new());
        teams.store(team.clone()).await.unwrap();
        let engine = PaymentEngine::new(
            Arc::new(InMemoryPaymentRepository::new()),
            teams,
            Arc::new(RecordingEventSink::new()),
        );
        BatchDriver::new(Arc::new(engine), &[team])
    }

    #[tokio::test]
    async fn test_full_lifecycle_rows() {
        let mut driver = driver().await;
        let init = driver
            .execute(op(OperationKind::Init, "order-1", Some(150_000)))
            .await;
        assert_eq!(init.status, Some(PaymentStatus::New));

        for (kind, expected) in [
            (OperationKind::ShowForm, PaymentStatus::FormShowed),
            (OperationKind::Authorize, PaymentStatus::Authorized),
            (OperationKind::Confirm, PaymentStatus::Confirmed),
            (OperationKind::Check, PaymentStatus::Confirmed),
            (OperationKind::Cancel, PaymentStatus::Refunded),
        ] {
            let result = driver.execute(op(kind, "order-1", None)).await;
            assert_eq!(result.status, Some(expected), "{}", kind);
            assert_eq!(result.payment_id, init.payment_id);
        }
    }

    #[tokio::test]
    async fn test_failures_become_codes() {
        let mut driver = driver().await;
        let unknown = driver.execute(op(OperationKind::Confirm, "nope", None)).await;
        assert_eq!(unknown.error, Some("NOT_FOUND"));
        assert_eq!(unknown.payment_id, None);

        let mut no_amount = op(OperationKind::Init, "order-1", None);
        no_amount.currency = None;
        let result = driver.execute(no_amount).await;
        assert_eq!(result.error, Some("VALIDATION_FAILED"));

        let mut stranger = op(OperationKind::Init, "order-1", Some(100));
        stranger.team = "ghost".to_string();
        assert_eq!(
            driver.execute(stranger).await.error,
            Some("AUTHENTICATION_FAILED")
        );
    }
}
