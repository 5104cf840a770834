//! Domain layer for the money-transfer saga.
//!
//! This crate provides:
//! - the `Aggregate` and `DomainEvent` traits used to rebuild state from history
//! - `PaymentDetails` and the value objects it is made of

pub mod aggregate;
pub mod error;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::DomainError;
pub use payment::{AccountId, Amount, PaymentDetails, ReferenceId};
