//! Step executors: withdraw, deposit and the compensating refund.

use std::sync::Arc;

use async_trait::async_trait;
use domain::PaymentDetails;

use crate::failure::{StepKind, StepResult};
use crate::money_transfer;
use crate::services::BankingService;

/// A unit of work the orchestrator can schedule.
///
/// Implementations must tolerate being invoked more than once for the same
/// transfer: after a crash the step is executed again.
#[async_trait]
pub trait TransferStep: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn execute(&self, details: &PaymentDetails) -> StepResult;
}

#[async_trait]
impl<T: TransferStep + ?Sized> TransferStep for Arc<T> {
    fn kind(&self) -> StepKind {
        (**self).kind()
    }

    async fn execute(&self, details: &PaymentDetails) -> StepResult {
        (**self).execute(details).await
    }
}

/// Takes the amount out of the source account.
#[derive(Debug, Clone)]
pub struct WithdrawStep<B> {
    bank: B,
}

impl<B: BankingService> WithdrawStep<B> {
    pub fn new(bank: B) -> Self {
        Self { bank }
    }
}

#[async_trait]
impl<B: BankingService> TransferStep for WithdrawStep<B> {
    fn kind(&self) -> StepKind {
        StepKind::Withdraw
    }

    async fn execute(&self, details: &PaymentDetails) -> StepResult {
        tracing::info!(
            account = %details.source_account(),
            amount = details.amount().value(),
            "withdrawing money"
        );
        let key = details
            .reference_id()
            .idempotency_key(money_transfer::WITHDRAWAL_SUFFIX);
        self.bank
            .withdraw(details.source_account(), details.amount(), &key)
            .await
    }
}

/// Puts the amount into the target account.
#[derive(Debug, Clone)]
pub struct DepositStep<B> {
    bank: B,
}

impl<B: BankingService> DepositStep<B> {
    pub fn new(bank: B) -> Self {
        Self { bank }
    }
}

#[async_trait]
impl<B: BankingService> TransferStep for DepositStep<B> {
    fn kind(&self) -> StepKind {
        StepKind::Deposit
    }

    async fn execute(&self, details: &PaymentDetails) -> StepResult {
        tracing::info!(
            account = %details.target_account(),
            amount = details.amount().value(),
            "depositing money"
        );
        let key = details
            .reference_id()
            .idempotency_key(money_transfer::DEPOSIT_SUFFIX);
        self.bank
            .deposit(details.target_account(), details.amount(), &key)
            .await
    }
}

/// Returns the withdrawn amount to the source account.
#[derive(Debug, Clone)]
pub struct RefundStep<B> {
    bank: B,
}

impl<B: BankingService> RefundStep<B> {
    pub fn new(bank: B) -> Self {
        Self { bank }
    }
}

#[async_trait]
impl<B: BankingService> TransferStep for RefundStep<B> {
    fn kind(&self) -> StepKind {
        StepKind::Refund
    }

    async fn execute(&self, details: &PaymentDetails) -> StepResult {
        tracing::info!(
            account = %details.source_account(),
            amount = details.amount().value(),
            "refunding money"
        );
        let key = details
            .reference_id()
            .idempotency_key(money_transfer::REFUND_SUFFIX);
        self.bank
            .deposit(details.source_account(), details.amount(), &key)
            .await
    }
}

/// Builds the three steps of a transfer against one bank.
pub fn banking_steps<B>(bank: B) -> [Arc<dyn TransferStep>; 3]
where
    B: BankingService + Clone + 'static,
{
    [
        Arc::new(WithdrawStep::new(bank.clone())),
        Arc::new(DepositStep::new(bank.clone())),
        Arc::new(RefundStep::new(bank)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;
    use crate::services::{BankOperation, Fault, InMemoryBank};

    fn details() -> PaymentDetails {
        PaymentDetails::new("85-150", "43-812", 250, "12345").unwrap()
    }

    #[tokio::test]
    async fn test_withdraw_then_deposit_moves_money() {
        let bank = InMemoryBank::with_sample_accounts();
        let [withdraw, deposit, _] = banking_steps(bank.clone());

        let w = withdraw.execute(&details()).await.unwrap();
        let d = deposit.execute(&details()).await.unwrap();

        assert_ne!(w, d);
        assert_eq!(bank.balance("85-150"), Some(1750));
        assert_eq!(bank.balance("43-812"), Some(250));
    }

    #[tokio::test]
    async fn test_refund_returns_money_to_source() {
        let bank = InMemoryBank::with_sample_accounts();
        let withdraw = WithdrawStep::new(bank.clone());
        let refund = RefundStep::new(bank.clone());

        withdraw.execute(&details()).await.unwrap();
        refund.execute(&details()).await.unwrap();

        assert_eq!(bank.balance("85-150"), Some(2000));
        assert_eq!(bank.calls(BankOperation::Deposit), 1);
    }

    #[tokio::test]
    async fn test_repeated_invocation_is_deduplicated() {
        let bank = InMemoryBank::with_sample_accounts();
        let withdraw = WithdrawStep::new(bank.clone());

        let first = withdraw.execute(&details()).await.unwrap();
        let second = withdraw.execute(&details()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(bank.balance("85-150"), Some(1750));
        assert_eq!(bank.calls(BankOperation::Withdraw), 2);
    }

    #[tokio::test]
    async fn test_deposit_to_unknown_account_is_invalid() {
        let bank = InMemoryBank::with_sample_accounts();
        let details = PaymentDetails::new("85-150", "00-000", 250, "12345").unwrap();

        let failure = DepositStep::new(bank).execute(&details).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidAccount);
    }

    #[tokio::test]
    async fn test_refund_fault_targets_source_account_only() {
        let bank = InMemoryBank::with_sample_accounts();
        bank.inject_failure(
            Fault::new(BankOperation::Deposit, FailureKind::Unavailable).for_account("85-150"),
        );

        assert!(DepositStep::new(bank.clone()).execute(&details()).await.is_ok());
        let failure = RefundStep::new(bank).execute(&details()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Unavailable);
    }

    #[test]
    fn test_banking_steps_cover_every_kind_once() {
        let kinds: Vec<_> = banking_steps(InMemoryBank::new())
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(kinds, StepKind::ALL);
    }
}
