//! Money transfer saga constants.

/// The saga type identifier recorded in history.
pub const SAGA_TYPE: &str = "MoneyTransfer";

/// Queue name the worker advertises when it starts.
pub const TASK_QUEUE: &str = "TRANSFER_MONEY_TASK_QUEUE";

/// Idempotency key suffix for the withdraw step.
pub const WITHDRAWAL_SUFFIX: &str = "withdrawal";

/// Idempotency key suffix for the deposit step.
pub const DEPOSIT_SUFFIX: &str = "deposit";

/// Idempotency key suffix for the compensating refund.
pub const REFUND_SUFFIX: &str = "refund";
