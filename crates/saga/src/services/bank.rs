//! Banking service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use domain::{AccountId, Amount};

use crate::failure::{FailureKind, StepFailure, StepResult, TransactionId};

/// Operations offered by the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankOperation {
    Withdraw,
    Deposit,
}

impl BankOperation {
    fn transaction_prefix(&self) -> &'static str {
        match self {
            BankOperation::Withdraw => "W",
            BankOperation::Deposit => "D",
        }
    }
}

/// Remote banking API used by the transfer steps.
///
/// Calls carrying an idempotency key the bank has already processed return
/// the original transaction ID without moving money again. Reusing a key for
/// a different operation, account or amount fails with
/// [`FailureKind::Rejected`].
#[async_trait]
pub trait BankingService: Send + Sync {
    async fn withdraw(
        &self,
        account: &AccountId,
        amount: Amount,
        idempotency_key: &str,
    ) -> StepResult;

    async fn deposit(&self, account: &AccountId, amount: Amount, idempotency_key: &str)
    -> StepResult;
}

/// A scripted failure returned instead of processing a call.
#[derive(Debug, Clone)]
pub struct Fault {
    operation: BankOperation,
    kind: FailureKind,
    account: Option<String>,
    /// None fails forever.
    remaining: Option<u32>,
}

impl Fault {
    pub fn new(operation: BankOperation, kind: FailureKind) -> Self {
        Self {
            operation,
            kind,
            account: None,
            remaining: None,
        }
    }

    /// Only fail calls against this account.
    pub fn for_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Fail this many times, then let calls through.
    pub fn times(mut self, times: u32) -> Self {
        self.remaining = Some(times);
        self
    }

    fn matches(&self, operation: BankOperation, account: &AccountId) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && self
                .account
                .as_deref()
                .is_none_or(|a| a == account.as_str())
    }
}

/// A call the bank has applied, keyed by its idempotency key.
#[derive(Debug)]
struct Processed {
    operation: BankOperation,
    account: String,
    amount: u64,
    transaction_id: TransactionId,
}

impl Processed {
    fn same_request(&self, operation: BankOperation, account: &AccountId, amount: Amount) -> bool {
        self.operation == operation
            && self.account == account.as_str()
            && self.amount == amount.value()
    }
}

#[derive(Debug, Default)]
struct BankState {
    balances: HashMap<String, u64>,
    processed: HashMap<String, Processed>,
    faults: Vec<Fault>,
    calls: HashMap<BankOperation, u32>,
    next_transaction: u32,
    latency: Option<Duration>,
}

impl BankState {
    fn process(
        &mut self,
        operation: BankOperation,
        account: &AccountId,
        amount: Amount,
        idempotency_key: &str,
    ) -> StepResult {
        *self.calls.entry(operation).or_default() += 1;

        if let Some(existing) = self.processed.get(idempotency_key) {
            if existing.same_request(operation, account, amount) {
                return Ok(existing.transaction_id.clone());
            }
            return Err(StepFailure::rejected(format!(
                "idempotency key {idempotency_key} was already used for transaction {}",
                existing.transaction_id
            )));
        }

        if let Some(fault) = self
            .faults
            .iter_mut()
            .find(|f| f.matches(operation, account))
        {
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(StepFailure::new(
                fault.kind,
                format!("injected {} failure for account {account}", fault.kind),
            ));
        }

        let Some(balance) = self.balances.get_mut(account.as_str()) else {
            return Err(StepFailure::invalid_account(account));
        };

        match operation {
            BankOperation::Withdraw => {
                if *balance < amount.value() {
                    return Err(StepFailure::insufficient_funds(
                        account,
                        *balance,
                        amount.value(),
                    ));
                }
                *balance -= amount.value();
            }
            BankOperation::Deposit => {
                *balance = balance.checked_add(amount.value()).ok_or_else(|| {
                    StepFailure::rejected(format!(
                        "deposit of {} would overflow the balance of account {account}",
                        amount.value()
                    ))
                })?;
            }
        }

        self.next_transaction += 1;
        let transaction_id = TransactionId::new(format!(
            "{}-{:04}",
            operation.transaction_prefix(),
            self.next_transaction
        ));
        self.processed.insert(
            idempotency_key.to_string(),
            Processed {
                operation,
                account: account.as_str().to_string(),
                amount: amount.value(),
                transaction_id: transaction_id.clone(),
            },
        );
        Ok(transaction_id)
    }
}

/// In-memory bank for local runs and tests.
///
/// Clones share the same ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBank {
    state: Arc<Mutex<BankState>>,
}

impl InMemoryBank {
    /// Creates a bank with no accounts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bank holding the two demo accounts: `85-150` with 2000 and
    /// `43-812` with 0.
    pub fn with_sample_accounts() -> Self {
        let bank = Self::new();
        bank.open_account("85-150", 2000);
        bank.open_account("43-812", 0);
        bank
    }

    fn lock(&self) -> MutexGuard<'_, BankState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_account(&self, account: impl Into<String>, balance: u64) {
        self.lock().balances.insert(account.into(), balance);
    }

    pub fn balance(&self, account: &str) -> Option<u64> {
        self.lock().balances.get(account).copied()
    }

    /// Number of calls received for an operation, including failed and
    /// deduplicated ones.
    pub fn calls(&self, operation: BankOperation) -> u32 {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn inject_failure(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_failures(&self) {
        self.lock().faults.clear();
    }

    /// Delays every call by `latency` before it is processed.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    async fn call(
        &self,
        operation: BankOperation,
        account: &AccountId,
        amount: Amount,
        idempotency_key: &str,
    ) -> StepResult {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.lock()
            .process(operation, account, amount, idempotency_key)
    }
}

#[async_trait]
impl BankingService for InMemoryBank {
    async fn withdraw(
        &self,
        account: &AccountId,
        amount: Amount,
        idempotency_key: &str,
    ) -> StepResult {
        self.call(BankOperation::Withdraw, account, amount, idempotency_key)
            .await
    }

    async fn deposit(
        &self,
        account: &AccountId,
        amount: Amount,
        idempotency_key: &str,
    ) -> StepResult {
        self.call(BankOperation::Deposit, account, amount, idempotency_key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> AccountId {
        AccountId::new(id).unwrap()
    }

    fn amount(value: u64) -> Amount {
        Amount::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_sequential_transaction_ids_with_operation_prefix() {
        let bank = InMemoryBank::with_sample_accounts();

        let w = bank.withdraw(&account("85-150"), amount(100), "a").await.unwrap();
        let d = bank.deposit(&account("43-812"), amount(100), "b").await.unwrap();

        assert_eq!(w.as_str(), "W-0001");
        assert_eq!(d.as_str(), "D-0002");
    }

    #[tokio::test]
    async fn test_withdraw_more_than_balance_fails() {
        let bank = InMemoryBank::with_sample_accounts();

        let failure = bank
            .withdraw(&account("43-812"), amount(1), "k")
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::InsufficientFunds);
        assert_eq!(bank.balance("43-812"), Some(0));
    }

    #[tokio::test]
    async fn test_unknown_account_is_invalid() {
        let bank = InMemoryBank::with_sample_accounts();
        let failure = bank
            .withdraw(&account("99-999"), amount(1), "k")
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidAccount);
        assert_eq!(failure.message, "account number 99-999 is invalid");
    }

    #[tokio::test]
    async fn test_counted_fault_expires() {
        let bank = InMemoryBank::with_sample_accounts();
        bank.inject_failure(Fault::new(BankOperation::Withdraw, FailureKind::Unavailable).times(2));

        for _ in 0..2 {
            let failure = bank
                .withdraw(&account("85-150"), amount(10), "k")
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::Unavailable);
        }
        assert!(bank.withdraw(&account("85-150"), amount(10), "k").await.is_ok());
        assert_eq!(bank.calls(BankOperation::Withdraw), 3);
    }

    #[tokio::test]
    async fn test_failed_call_does_not_consume_idempotency_key() {
        let bank = InMemoryBank::with_sample_accounts();
        bank.inject_failure(Fault::new(BankOperation::Deposit, FailureKind::Timeout).times(1));

        assert!(bank.deposit(&account("43-812"), amount(5), "k").await.is_err());
        let tx = bank.deposit(&account("43-812"), amount(5), "k").await.unwrap();
        let again = bank.deposit(&account("43-812"), amount(5), "k").await.unwrap();

        assert_eq!(tx, again);
        assert_eq!(bank.balance("43-812"), Some(5));
    }

    #[tokio::test]
    async fn test_reused_key_for_different_request_is_rejected() {
        let bank = InMemoryBank::with_sample_accounts();
        bank.open_account("99-999", 0);
        let tx = bank
            .withdraw(&account("85-150"), amount(250), "12345-withdrawal")
            .await
            .unwrap();

        let other_amount = bank
            .withdraw(&account("85-150"), amount(1000), "12345-withdrawal")
            .await
            .unwrap_err();
        assert_eq!(other_amount.kind, FailureKind::Rejected);
        assert!(other_amount.message.contains(tx.as_str()));

        let other_account = bank
            .deposit(&account("99-999"), amount(250), "12345-withdrawal")
            .await
            .unwrap_err();
        assert_eq!(other_account.kind, FailureKind::Rejected);

        assert_eq!(bank.balance("85-150"), Some(1750));
        assert_eq!(bank.balance("99-999"), Some(0));
    }

    #[tokio::test]
    async fn test_deposit_overflow_is_rejected() {
        let bank = InMemoryBank::new();
        bank.open_account("85-150", u64::MAX - 1);

        let failure = bank
            .deposit(&account("85-150"), amount(2), "k")
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Rejected);
        assert_eq!(bank.balance("85-150"), Some(u64::MAX - 1));
        // Nothing was applied, so the key is still free.
        assert!(bank.deposit(&account("85-150"), amount(1), "k").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_failures_restores_service() {
        let bank = InMemoryBank::with_sample_accounts();
        bank.inject_failure(Fault::new(BankOperation::Deposit, FailureKind::Internal));
        assert!(bank.deposit(&account("43-812"), amount(5), "k").await.is_err());

        bank.clear_failures();
        assert!(bank.deposit(&account("43-812"), amount(5), "k").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_calls() {
        let bank = InMemoryBank::with_sample_accounts();
        bank.set_latency(Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        bank.deposit(&account("43-812"), amount(5), "k").await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }
}
