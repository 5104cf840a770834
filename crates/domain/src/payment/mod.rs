//! Payment request and its value objects.

mod details;
mod value_objects;

pub use details::PaymentDetails;
pub use value_objects::{AccountId, Amount, ReferenceId};
