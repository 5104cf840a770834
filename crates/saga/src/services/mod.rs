//! External banking system the steps talk to.

pub mod bank;

pub use bank::{BankOperation, BankingService, Fault, InMemoryBank};
