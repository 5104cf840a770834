use serde::{Deserialize, Serialize};

use super::value_objects::{AccountId, Amount, ReferenceId};
use crate::error::DomainError;

/// One transfer request.
///
/// Created once by the caller and handed unchanged to every step of the
/// saga. There are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    source_account: AccountId,
    target_account: AccountId,
    amount: Amount,
    reference_id: ReferenceId,
}

impl PaymentDetails {
    /// Validates and builds a transfer request.
    pub fn new(
        source_account: impl Into<String>,
        target_account: impl Into<String>,
        amount: u64,
        reference_id: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let source_account = AccountId::new(source_account)?;
        let target_account = AccountId::new(target_account)?;
        if source_account == target_account {
            return Err(DomainError::SameAccount(source_account.to_string()));
        }

        Ok(Self {
            source_account,
            target_account,
            amount: Amount::new(amount)?,
            reference_id: ReferenceId::new(reference_id)?,
        })
    }

    pub fn source_account(&self) -> &AccountId {
        &self.source_account
    }

    pub fn target_account(&self) -> &AccountId {
        &self.target_account
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn reference_id(&self) -> &ReferenceId {
        &self.reference_id
    }
}

impl std::fmt::Display for PaymentDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} to {} (ref {})",
            self.amount, self.source_account, self.target_account, self.reference_id
        )
    }
}
