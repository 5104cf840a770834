//! How a transfer run ended, and how that is reported to the caller.

use domain::{AccountId, PaymentDetails};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failure::{StepFailure, TransactionId};

/// Result of a transfer that got past the withdraw step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SagaOutcome {
    Completed {
        withdraw_tx: TransactionId,
        deposit_tx: TransactionId,
    },
    /// Deposit failed, the refund put the money back.
    CompensatedFailure {
        deposit_error: StepFailure,
        refund_tx: TransactionId,
    },
    /// Deposit failed and so did the refund.
    DoubleFailure {
        deposit_error: StepFailure,
        refund_error: StepFailure,
    },
}

/// Ways a run can end without a [`SagaOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunFailure {
    /// Withdraw failed. Nothing was moved, nothing needs compensating.
    #[error("withdraw failed: {0}")]
    WithdrawFailed(StepFailure),

    #[error("run was cancelled")]
    Cancelled,
}

/// Final result of a run as stored in its history.
pub type RunOutcome = Result<SagaOutcome, RunFailure>;

/// Error reported to whoever submitted the transfer.
///
/// Each variant names the failed step and, for deposit failures, what the
/// refund did.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Withdraw: failed to withdraw money from {source_account}: {failure}")]
    WithdrawFailed {
        source_account: AccountId,
        #[source]
        failure: StepFailure,
    },

    #[error(
        "Deposit: failed to deposit money into {target_account}: Money returned to \
         {source_account} (refund transaction {refund_tx}): {failure}"
    )]
    DepositCompensated {
        source_account: AccountId,
        target_account: AccountId,
        refund_tx: TransactionId,
        #[source]
        failure: StepFailure,
    },

    #[error(
        "Deposit: failed to deposit money into {target_account}: {deposit_failure}. \
         Money could not be returned to {source_account}: {refund_failure}"
    )]
    DepositNotCompensated {
        source_account: AccountId,
        target_account: AccountId,
        #[source]
        deposit_failure: StepFailure,
        refund_failure: StepFailure,
    },

    #[error("Transfer was cancelled before it finished")]
    Cancelled,
}

impl TransferError {
    /// True when money left the source account and did not come back.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, TransferError::DepositNotCompensated { .. })
    }

    /// Stable status label for reporting.
    pub fn status(&self) -> &'static str {
        match self {
            TransferError::WithdrawFailed { .. } => "withdraw_failed",
            TransferError::DepositCompensated { .. } => "compensated_failure",
            TransferError::DepositNotCompensated { .. } => "double_failure",
            TransferError::Cancelled => "cancelled",
        }
    }
}

impl SagaOutcome {
    /// Human-readable description of the outcome.
    pub fn summary(&self, details: &PaymentDetails) -> String {
        match self.clone().into_result(details) {
            Ok(summary) => summary,
            Err(err) => err.to_string(),
        }
    }

    pub fn into_result(self, details: &PaymentDetails) -> Result<String, TransferError> {
        match self {
            SagaOutcome::Completed {
                withdraw_tx,
                deposit_tx,
            } => Ok(format!(
                "Transfer complete (transaction IDs: {withdraw_tx}, {deposit_tx})"
            )),
            SagaOutcome::CompensatedFailure {
                deposit_error,
                refund_tx,
            } => Err(TransferError::DepositCompensated {
                source_account: details.source_account().clone(),
                target_account: details.target_account().clone(),
                refund_tx,
                failure: deposit_error,
            }),
            SagaOutcome::DoubleFailure {
                deposit_error,
                refund_error,
            } => Err(TransferError::DepositNotCompensated {
                source_account: details.source_account().clone(),
                target_account: details.target_account().clone(),
                deposit_failure: deposit_error,
                refund_failure: refund_error,
            }),
        }
    }
}

/// Maps a run's outcome to the caller-facing result.
pub fn transfer_result(
    details: &PaymentDetails,
    outcome: RunOutcome,
) -> Result<String, TransferError> {
    match outcome {
        Ok(outcome) => outcome.into_result(details),
        Err(RunFailure::WithdrawFailed(failure)) => Err(TransferError::WithdrawFailed {
            source_account: details.source_account().clone(),
            failure,
        }),
        Err(RunFailure::Cancelled) => Err(TransferError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;
    use std::error::Error as _;

    fn details() -> PaymentDetails {
        PaymentDetails::new("85-150", "43-812", 250, "12345").unwrap()
    }

    fn deposit_failure() -> StepFailure {
        StepFailure::new(FailureKind::InvalidAccount, "account number 43-812 is invalid")
    }

    #[test]
    fn test_completed_lists_both_transactions() {
        let outcome = SagaOutcome::Completed {
            withdraw_tx: TransactionId::new("W-0001"),
            deposit_tx: TransactionId::new("D-0002"),
        };
        assert_eq!(
            outcome.into_result(&details()).unwrap(),
            "Transfer complete (transaction IDs: W-0001, D-0002)"
        );
    }

    #[test]
    fn test_compensated_names_both_accounts_and_refund() {
        let outcome = SagaOutcome::CompensatedFailure {
            deposit_error: deposit_failure(),
            refund_tx: TransactionId::new("D-0002"),
        };
        let err = outcome.into_result(&details()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Deposit: failed to deposit money into 43-812: Money returned to 85-150 \
             (refund transaction D-0002): invalid account: account number 43-812 is invalid"
        );
        assert!(!err.requires_manual_intervention());
        assert_eq!(err.source().unwrap().to_string(), deposit_failure().to_string());
    }

    #[test]
    fn test_double_failure_is_flagged_for_manual_intervention() {
        let outcome = SagaOutcome::DoubleFailure {
            deposit_error: deposit_failure(),
            refund_error: StepFailure::unavailable("bank offline"),
        };
        let summary = outcome.summary(&details());
        assert!(summary.contains("Money could not be returned to 85-150"));
        assert!(summary.ends_with("service unavailable: bank offline"));

        let err = outcome.into_result(&details()).unwrap_err();
        assert!(err.requires_manual_intervention());
        assert_eq!(err.status(), "double_failure");
    }

    #[test]
    fn test_withdraw_failure_names_source_account() {
        let failure = StepFailure::insufficient_funds("85-150", 100, 250);
        let err = transfer_result(&details(), Err(RunFailure::WithdrawFailed(failure)))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Withdraw: failed to withdraw money from 85-150: insufficient funds: \
             account 85-150 has balance 100, cannot withdraw 250"
        );
    }

    #[test]
    fn test_cancelled_run_maps_to_cancelled_error() {
        let err = transfer_result(&details(), Err(RunFailure::Cancelled)).unwrap_err();
        assert_eq!(err, TransferError::Cancelled);
        assert_eq!(err.status(), "cancelled");
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = SagaOutcome::Completed {
            withdraw_tx: TransactionId::new("W-0001"),
            deposit_tx: TransactionId::new("D-0002"),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["withdraw_tx"], "W-0001");
    }
}
