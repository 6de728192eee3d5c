//! Pure payment lifecycle transitions.
//!
//! ```text
//! NEW -> FORM_SHOWED -> AUTHORIZING -> AUTHORIZED -> CONFIRMING -> CONFIRMED -> REFUNDED
//!                       AUTHORIZING -> AUTH_FAIL | REJECTED
//! NEW | AUTHORIZED -> CANCELLING -> CANCELLED
//! NEW | FORM_SHOWED | AUTHORIZING -> DEADLINE_EXPIRED
//! ```
//!
//! [`apply`] never mutates anything; callers persist the returned status.

use crate::domain::payment::PaymentStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEvent {
    ShowForm,
    Authorize,
    AuthorizationApproved,
    AuthorizationDeclined,
    Reject,
    Confirm,
    ConfirmationCompleted,
    Cancel,
    CancellationCompleted,
    Refund,
    Expire,
}

impl PaymentEvent {
    /// The status this event drives a payment into.
    pub fn target(&self) -> PaymentStatus {
        match self {
            PaymentEvent::ShowForm => PaymentStatus::FormShowed,
            PaymentEvent::Authorize => PaymentStatus::Authorizing,
            PaymentEvent::AuthorizationApproved => PaymentStatus::Authorized,
            PaymentEvent::AuthorizationDeclined => PaymentStatus::AuthFail,
            PaymentEvent::Reject => PaymentStatus::Rejected,
            PaymentEvent::Confirm => PaymentStatus::Confirming,
            PaymentEvent::ConfirmationCompleted => PaymentStatus::Confirmed,
            PaymentEvent::Cancel => PaymentStatus::Cancelling,
            PaymentEvent::CancellationCompleted => PaymentStatus::Cancelled,
            PaymentEvent::Refund => PaymentStatus::Refunded,
            PaymentEvent::Expire => PaymentStatus::DeadlineExpired,
        }
    }

    /// Statuses in which the event's intent is already satisfied.
    fn satisfied_by(&self, status: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match self {
            PaymentEvent::ShowForm => status == FormShowed,
            PaymentEvent::Authorize => matches!(status, Authorizing | Authorized),
            PaymentEvent::AuthorizationApproved => status == Authorized,
            PaymentEvent::AuthorizationDeclined => status == AuthFail,
            PaymentEvent::Reject => status == Rejected,
            PaymentEvent::Confirm => matches!(status, Confirming | Confirmed),
            PaymentEvent::ConfirmationCompleted => status == Confirmed,
            PaymentEvent::Cancel => matches!(status, Cancelling | Cancelled | Refunded),
            PaymentEvent::CancellationCompleted => status == Cancelled,
            PaymentEvent::Refund => status == Refunded,
            PaymentEvent::Expire => status == DeadlineExpired,
        }
    }
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentEvent::ShowForm => "show_form",
            PaymentEvent::Authorize => "authorize",
            PaymentEvent::AuthorizationApproved => "authorization_approved",
            PaymentEvent::AuthorizationDeclined => "authorization_declined",
            PaymentEvent::Reject => "reject",
            PaymentEvent::Confirm => "confirm",
            PaymentEvent::ConfirmationCompleted => "confirmation_completed",
            PaymentEvent::Cancel => "cancel",
            PaymentEvent::CancellationCompleted => "cancellation_completed",
            PaymentEvent::Refund => "refund",
            PaymentEvent::Expire => "expire",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("payment is already {status}")]
    AlreadyInState { status: PaymentStatus },
    #[error("cannot apply {event} to a payment in status {from}")]
    InvalidTransition {
        from: PaymentStatus,
        event: PaymentEvent,
    },
}

/// Decides the next status for `event` applied in `current`.
pub fn apply(current: PaymentStatus, event: PaymentEvent) -> Result<PaymentStatus, TransitionError> {
    use PaymentStatus::*;
    let allowed = match event {
        PaymentEvent::ShowForm => current == New,
        PaymentEvent::Authorize => matches!(current, New | FormShowed),
        PaymentEvent::AuthorizationApproved
        | PaymentEvent::AuthorizationDeclined => current == Authorizing,
        PaymentEvent::Reject => matches!(current, Authorizing | Confirming),
        PaymentEvent::Confirm => current == Authorized,
        PaymentEvent::ConfirmationCompleted => current == Confirming,
        PaymentEvent::Cancel => matches!(current, New | Authorized),
        PaymentEvent::CancellationCompleted => current == Cancelling,
        PaymentEvent::Refund => current == Confirmed,
        PaymentEvent::Expire => current.is_expirable(),
    };

    if allowed {
        Ok(event.target())
    } else if event.satisfied_by(current) {
        Err(TransitionError::AlreadyInState { status: current })
    } else {
        Err(TransitionError::InvalidTransition {
            from: current,
            event,
        })
    }
}

/// Applies a sequence of events, stopping at the first rejection.
pub fn apply_all(
    current: PaymentStatus,
    events: &[PaymentEvent],
) -> Result<PaymentStatus, TransitionError> {
    events
        .iter()
        .try_fold(current, |status, event| apply(status, *event))
}
