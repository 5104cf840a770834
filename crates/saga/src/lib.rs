//! Money-transfer saga.
//!
//! A transfer moves an amount between two accounts in three possible steps:
//! 1. Withdraw from the source account
//! 2. Deposit into the target account
//! 3. Refund the source account, only if the deposit failed
//!
//! Each step runs under a retry policy. Runs are event-sourced: the
//! orchestrator records every decision in a [`history::HistoryStore`] and
//! can resume an interrupted run from that history without repeating steps
//! that already produced a result.

pub mod aggregate;
pub mod engine;
pub mod error;
pub mod events;
pub mod failure;
pub mod money_transfer;
pub mod orchestrator;
pub mod outcome;
pub mod retry;
pub mod services;
pub mod state;
pub mod steps;
pub mod worker;

pub use aggregate::{NextAction, TransferSaga};
pub use engine::{RunHandle, TransferEngine};
pub use error::SagaError;
pub use events::TransferEvent;
pub use failure::{FailureKind, StepFailure, StepKind, StepResult, TransactionId};
pub use orchestrator::TransferOrchestrator;
pub use outcome::{RunFailure, RunOutcome, SagaOutcome, TransferError, transfer_result};
pub use retry::{ActivityOptions, RetryPolicy, Retrying, StepReport};
pub use services::{BankOperation, BankingService, Fault, InMemoryBank};
pub use state::{TransferState, Transition};
pub use steps::{DepositStep, RefundStep, TransferStep, WithdrawStep, banking_steps};
pub use worker::{TransferWorker, TransferWorkerBuilder};
