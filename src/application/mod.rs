//! Application layer: orchestration of payment operations.
//!
//! `PaymentEngine` is the only writer of payment state. The webhook
//! dispatcher and the expiry sweeper run beside it as background tasks and
//! reach payments only through the engine or its events.

pub mod dispatcher;
pub mod engine;
pub mod expiry;
pub mod requests;
pub mod retry;
