//! Domain types, lifecycle rules and the ports the application layer drives.

pub mod card;
pub mod event;
pub mod payment;
pub mod ports;
pub mod state_machine;
pub mod team;
pub mod token;
pub mod webhook;
