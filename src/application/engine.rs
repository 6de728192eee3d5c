use crate::application::requests::{
    AuthorizeRequest, CancelRequest, CheckRequest, ConfirmRequest, InitRequest, PaymentResponse,
};
use crate::application::retry::RetryPolicy;
use crate::config::EngineConfig;
use crate::domain::event::TransitionEvent;
use crate::domain::payment::{Amount, Currency, Payment, PaymentStatus};
use crate::domain::ports::{
    AuthorizationDecision, CardAuthorizerRef, ClockRef, EventSinkRef, KeyLockRef, LockGuard,
    LockKey, PaymentRepositoryRef, TeamRepositoryRef,
};
use crate::domain::state_machine::{self, PaymentEvent};
use crate::domain::team::Team;
use crate::domain::token::TokenCodec;
use crate::error::{PaymentError, Result};
use crate::infrastructure::cards::TestCardAuthorizer;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::lock::InMemoryKeyLock;
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

const MAX_ORDER_ID_LEN: usize = 64;

/// The only component allowed to change payment state.
///
/// Every mutating call authenticates, takes the exclusive lock of its payment
/// (or of `(team, order)` for init), re-reads the payment inside the lock,
/// asks the state machine for the next status, persists it with a version
/// check and publishes a [`TransitionEvent`]. Publishing is a non-blocking
/// hand-off, done before the lock is released so that a payment's events
/// leave in commit order.
///
/// Nothing is written before the persist step, so a caller that is dropped
/// while waiting for the lock or the repository leaves the payment untouched.
pub struct PaymentEngine {
    payments: PaymentRepositoryRef,
    teams: TeamRepositoryRef,
    events: EventSinkRef,
    locks: KeyLockRef,
    authorizer: CardAuthorizerRef,
    clock: ClockRef,
    config: EngineConfig,
    retry: RetryPolicy,
}

impl PaymentEngine {
    /// Creates an engine with the single-instance defaults: in-process lock
    /// table, test-card authorizer and system clock.
    ///
    /// The in-process lock table only serializes calls inside one process.
    /// Replicated deployments must plug a shared [`crate::domain::ports::KeyLock`]
    /// in with [`PaymentEngine::with_lock`]; the repository version check
    /// still rejects lost updates without it.
    ///
    /// # Arguments
    ///
    /// * `payments` - The store of payments and their order index.
    /// * `teams` - The store of merchant configurations.
    /// * `events` - Receives one event per committed transition.
    pub fn new(
        payments: PaymentRepositoryRef,
        teams: TeamRepositoryRef,
        events: EventSinkRef,
    ) -> Self {
        let config = EngineConfig::default();
        Self {
            payments,
            teams,
            events,
            locks: Arc::new(InMemoryKeyLock::new()),
            authorizer: Arc::new(TestCardAuthorizer),
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::new(config.repository_attempts, config.repository_backoff),
            config,
        }
    }

    /// Replaces the runtime settings, including the repository retry policy.
    ///
    /// # Arguments
    ///
    /// * `config` - Lock timeout, repository retries, payment lifetime and
    ///   payment form base URL.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.retry = RetryPolicy::new(config.repository_attempts, config.repository_backoff);
        self.config = config;
        self
    }

    /// Uses `locks` to serialize calls per payment and per order.
    pub fn with_lock(mut self, locks: KeyLockRef) -> Self {
        self.locks = locks;
        self
    }

    /// Uses `authorizer` to decide card authorizations.
    pub fn with_authorizer(mut self, authorizer: CardAuthorizerRef) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    /// Creates a payment, or returns the existing one for a repeated order id
    /// with identical terms.
    pub async fn init(&self, req: InitRequest) -> Result<PaymentResponse> {
        let team = self.load_team(&req.team_slug).await?;
        verify_token(&req.token, &req.expected_token(&team.password_hash))?;

        let amount = Amount::new(req.amount)?;
        let currency = Currency::new(&req.currency)?;
        validate_order_id(&req.order_id)?;
        team.limits.check_amount(amount, &currency)?;

        let now = self.clock.now();
        let expires_at = match req.redirect_due_date {
            Some(due) if due <= now => {
                return Err(PaymentError::ValidationFailed(
                    "RedirectDueDate must be in the future".to_string(),
                ));
            }
            Some(due) => due,
            None => now + self.config.payment_ttl,
        };

        let _guard = self
            .acquire(LockKey::order(&team.slug, &req.order_id))
            .await?;

        let existing = self
            .retry
            .run("find payment by order", || {
                self.payments.find_by_order(&team.slug, &req.order_id)
            })
            .await?;
        if let Some(existing) = existing {
            return self.replay_init(existing, amount, &currency).await;
        }

        self.check_volume(&team, amount, now).await?;

        let payment = Payment::new(
            Uuid::new_v4().to_string(),
            &team.slug,
            &req.order_id,
            amount,
            currency.clone(),
            req.description,
            req.data,
            now,
            expires_at,
        );
        let inserted = self
            .retry
            .run("insert payment", || self.payments.insert(payment.clone()))
            .await;
        match inserted {
            Ok(()) => {}
            // Another process created the order between lookup and insert.
            Err(PaymentError::Conflict(_)) => {
                let winner = self
                    .retry
                    .run("find payment by order", || {
                        self.payments.find_by_order(&team.slug, &req.order_id)
                    })
                    .await?
                    .ok_or_else(|| {
                        PaymentError::ServiceUnavailable("order index out of sync".to_string())
                    })?;
                return self.replay_init(winner, amount, &currency).await;
            }
            Err(err) => return Err(err),
        }

        tracing::info!(
            payment_id = %payment.payment_id,
            team = %payment.team_slug,
            order_id = %payment.order_id,
            amount = payment.amount.value(),
            "payment created"
        );
        let url = self.payment_url(&payment.payment_id);
        Ok(PaymentResponse::from_payment(&payment, Some(url)))
    }

    /// Moves a payment to FORM_SHOWED when its hosted form is rendered.
    /// Rendering the form again is a no-op.
    pub async fn show_form(&self, payment_id: &str) -> Result<PaymentResponse> {
        let _guard = self.acquire(LockKey::payment(payment_id)).await?;
        let payment = self.load_current(payment_id).await?;
        let payment = match state_machine::apply(payment.status, PaymentEvent::ShowForm) {
            Ok(_) => {
                self.transition(payment, &[PaymentEvent::ShowForm], "form_showed", |_| {})
                    .await?
            }
            Err(state_machine::TransitionError::AlreadyInState { .. }) => payment,
            Err(err) => return Err(err.into()),
        };
        Ok(PaymentResponse::from_payment(&payment, None))
    }

    /// Authorizes the card submitted through the payment form.
    ///
    /// The payment lock stays held while the [`crate::domain::ports::CardAuthorizer`]
    /// decides, so no other call can act on a payment whose issuer answer is
    /// pending. A slow issuer delays other callers of the same payment up to
    /// the lock timeout; other payments are unaffected.
    pub async fn authorize(&self, req: AuthorizeRequest) -> Result<PaymentResponse> {
        req.card.validate(self.clock.now())?;

        let _guard = self.acquire(LockKey::payment(&req.payment_id)).await?;
        let payment = self.load_current(&req.payment_id).await?;
        state_machine::apply(payment.status, PaymentEvent::Authorize)?;

        let mask = req.card.mask();
        let payment = self
            .transition(
                payment,
                &[PaymentEvent::Authorize],
                "authorization_started",
                |p| {
                    p.authorization_attempts += 1;
                    p.card_mask = Some(mask);
                },
            )
            .await?;

        // On error the payment stays AUTHORIZING until its deadline passes.
        let decision = self.authorizer.authorize(&payment, &req.card).await?;
        let payment = match decision {
            AuthorizationDecision::Approved { bank_order_id } => {
                self.transition(
                    payment,
                    &[PaymentEvent::AuthorizationApproved],
                    "authorized",
                    |p| p.bank_order_id = Some(bank_order_id),
                )
                .await?
            }
            AuthorizationDecision::Declined { reason } => {
                self.transition(
                    payment,
                    &[PaymentEvent::AuthorizationDeclined],
                    "authorization_declined",
                    |p| p.failure_reason = Some(reason),
                )
                .await?
            }
            AuthorizationDecision::Rejected { reason } => {
                self.transition(payment, &[PaymentEvent::Reject], "rejected", |p| {
                    p.failure_reason = Some(reason)
                })
                .await?
            }
        };
        Ok(PaymentResponse::from_payment(&payment, None))
    }

    /// Captures an authorized payment in full.
    pub async fn confirm(&self, req: ConfirmRequest) -> Result<PaymentResponse> {
        let team = self.load_team(&req.team_slug).await?;
        verify_token(&req.token, &req.expected_token(&team.password_hash))?;
        if let Some(amount) = req.amount {
            Amount::new(amount)?;
        }

        let _guard = self.acquire(LockKey::payment(&req.payment_id)).await?;
        let payment = self.load_owned(&team, &req.payment_id).await?;
        state_machine::apply(payment.status, PaymentEvent::Confirm)?;
        if let Some(amount) = req.amount
            && amount != payment.amount.value()
        {
            return Err(PaymentError::UnsupportedOperation(
                "partial confirmation is not supported".to_string(),
            ));
        }

        let payment = self
            .transition(
                payment,
                &[PaymentEvent::Confirm, PaymentEvent::ConfirmationCompleted],
                "confirmed",
                |_| {},
            )
            .await?;
        Ok(PaymentResponse::from_payment(&payment, None))
    }

    /// Cancels an unpaid or authorized payment, or refunds a confirmed one.
    pub async fn cancel(&self, req: CancelRequest) -> Result<PaymentResponse> {
        let team = self.load_team(&req.team_slug).await?;
        verify_token(&req.token, &req.expected_token(&team.password_hash))?;
        if let Some(amount) = req.amount {
            Amount::new(amount)?;
        }

        let _guard = self.acquire(LockKey::payment(&req.payment_id)).await?;
        let payment = self.load_owned(&team, &req.payment_id).await?;

        let (events, reason): (&[PaymentEvent], &str) = match payment.status {
            PaymentStatus::Confirmed => (&[PaymentEvent::Refund], "refunded"),
            _ => (
                &[PaymentEvent::Cancel, PaymentEvent::CancellationCompleted],
                "cancelled",
            ),
        };
        state_machine::apply_all(payment.status, events)?;
        if let Some(amount) = req.amount {
            if amount < payment.amount.value() {
                return Err(PaymentError::UnsupportedOperation(
                    "partial cancellation is not supported".to_string(),
                ));
            }
            if amount > payment.amount.value() {
                return Err(PaymentError::ValidationFailed(
                    "cancel amount exceeds the payment amount".to_string(),
                ));
            }
        }

        let payment = self.transition(payment, events, reason, |_| {}).await?;
        Ok(PaymentResponse::from_payment(&payment, None))
    }

    /// Current status of a payment, with the deadline applied.
    pub async fn check(&self, req: CheckRequest) -> Result<PaymentResponse> {
        let team = self.load_team(&req.team_slug).await?;
        verify_token(&req.token, &req.expected_token(&team.password_hash))?;

        let _guard = self.acquire(LockKey::payment(&req.payment_id)).await?;
        let payment = self.load_owned(&team, &req.payment_id).await?;
        Ok(PaymentResponse::from_payment(&payment, None))
    }

    /// Expires a payment whose deadline has passed; otherwise leaves it as is.
    pub async fn expire(&self, payment_id: &str) -> Result<PaymentResponse> {
        let _guard = self.acquire(LockKey::payment(payment_id)).await?;
        let payment = self.load_current(payment_id).await?;
        Ok(PaymentResponse::from_payment(&payment, None))
    }

    /// Expires up to `limit` overdue payments, returning how many changed.
    pub async fn expire_due(&self, limit: usize) -> Result<usize> {
        let now = self.clock.now();
        let ids = self
            .retry
            .run("list expirable payments", || {
                self.payments.list_expirable(now, limit)
            })
            .await?;
        let mut expired = 0;
        for id in ids {
            match self.expire(&id).await {
                Ok(response) if response.status == PaymentStatus::DeadlineExpired => expired += 1,
                Ok(_) => {}
                Err(err) => tracing::warn!(payment_id = %id, error = %err, "expiry failed"),
            }
        }
        Ok(expired)
    }

    async fn replay_init(
        &self,
        existing: Payment,
        amount: Amount,
        currency: &Currency,
    ) -> Result<PaymentResponse> {
        if !existing.matches_terms(amount, currency) {
            return Err(PaymentError::Conflict(format!(
                "order {} already exists with different terms",
                existing.order_id
            )));
        }
        let _guard = self.acquire(LockKey::payment(&existing.payment_id)).await?;
        let payment = self.load_current(&existing.payment_id).await?;
        let url = self.payment_url(&payment.payment_id);
        Ok(PaymentResponse::from_payment(&payment, Some(url)))
    }

    async fn load_team(&self, slug: &str) -> Result<Team> {
        let team = self
            .retry
            .run("load team", || self.teams.get(slug))
            .await?;
        match team {
            Some(team) if team.active => Ok(team),
            _ => Err(PaymentError::AuthenticationFailed),
        }
    }

    async fn acquire(&self, key: LockKey) -> Result<LockGuard> {
        self.locks.acquire(key, self.config.lock_timeout).await
    }

    /// Reads a payment inside its lock and applies a passed deadline before
    /// anything else sees it.
    async fn load_current(&self, payment_id: &str) -> Result<Payment> {
        let payment = self
            .retry
            .run("load payment", || self.payments.get(payment_id))
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment_id)))?;
        if payment.is_past_deadline(self.clock.now()) {
            return self
                .transition(payment, &[PaymentEvent::Expire], "deadline_expired", |_| {})
                .await;
        }
        Ok(payment)
    }

    /// Like `load_current`, but hides payments of other teams.
    async fn load_owned(&self, team: &Team, payment_id: &str) -> Result<Payment> {
        let payment = self.load_current(payment_id).await?;
        if payment.team_slug != team.slug {
            return Err(PaymentError::NotFound(format!("payment {}", payment_id)));
        }
        Ok(payment)
    }

    async fn check_volume(&self, team: &Team, amount: Amount, now: DateTime<Utc>) -> Result<()> {
        let limits = &team.limits;
        if limits.daily_amount_limit.is_some() || limits.daily_transaction_limit.is_some() {
            let day = self
                .retry
                .run("daily volume", || {
                    self.payments.team_volume(&team.slug, start_of_day(now), now)
                })
                .await?;
            if let Some(limit) = limits.daily_transaction_limit
                && day.count >= limit
            {
                return Err(PaymentError::LimitExceeded(
                    "daily transaction count reached".to_string(),
                ));
            }
            if let Some(limit) = limits.daily_amount_limit
                && day.total_amount.saturating_add(amount.value()) > limit
            {
                return Err(PaymentError::LimitExceeded(
                    "daily amount limit exceeded".to_string(),
                ));
            }
        }
        if let Some(limit) = limits.monthly_amount_limit {
            let month = self
                .retry
                .run("monthly volume", || {
                    self.payments.team_volume(&team.slug, start_of_month(now), now)
                })
                .await?;
            if month.total_amount.saturating_add(amount.value()) > limit {
                return Err(PaymentError::LimitExceeded(
                    "monthly amount limit exceeded".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Applies `events`, persists the result and publishes one event for the
    /// whole step. Must be called with the payment's lock held.
    async fn transition<F>(
        &self,
        mut payment: Payment,
        events: &[PaymentEvent],
        reason: &str,
        mutate: F,
    ) -> Result<Payment>
    where
        F: FnOnce(&mut Payment) + Send,
    {
        let from = payment.status;
        let now = self.clock.now();
        let mut status = from;
        for event in events {
            status = state_machine::apply(status, *event)?;
            payment.record_transition(status, now);
        }
        mutate(&mut payment);

        let expected_version = payment.version;
        payment.version += 1;
        self.retry
            .run("update payment", || {
                self.payments.update(payment.clone(), expected_version)
            })
            .await?;

        tracing::info!(
            payment_id = %payment.payment_id,
            team = %payment.team_slug,
            from = %from,
            to = %payment.status,
            reason,
            "payment transition committed"
        );
        self.events
            .publish(TransitionEvent::from_payment(&payment, from, reason));
        Ok(payment)
    }

    fn payment_url(&self, payment_id: &str) -> String {
        format!(
            "{}/{}",
            self.config.payment_form_url.trim_end_matches('/'),
            payment_id
        )
    }
}

fn verify_token(candidate: &str, expected: &str) -> Result<()> {
    if TokenCodec::verify(candidate, expected) {
        Ok(())
    } else {
        Err(PaymentError::AuthenticationFailed)
    }
}

fn validate_order_id(order_id: &str) -> Result<()> {
    if order_id.trim().is_empty() || order_id.len() > MAX_ORDER_ID_LEN {
        return Err(PaymentError::ValidationFailed(format!(
            "OrderId must be 1 to {} characters",
            MAX_ORDER_ID_LEN
        )));
    }
    Ok(())
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    today
        .with_day(1)
        .unwrap_or(today)
        .and_time(NaiveTime::MIN)
        .and_utc()
}
