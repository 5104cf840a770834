//! Step registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::Namespace;
use domain::PaymentDetails;

use crate::error::{Result, SagaError};
use crate::failure::StepKind;
use crate::money_transfer;
use crate::retry::{ActivityOptions, Retrying, StepReport};
use crate::services::BankingService;
use crate::steps::{TransferStep, banking_steps};

/// The step executors available to transfers in one namespace.
///
/// Every step kind has exactly one executor. Each execution is wrapped in a
/// fresh [`Retrying`] so attempt counters never leak between runs.
pub struct TransferWorker {
    namespace: Namespace,
    steps: BTreeMap<StepKind, Arc<dyn TransferStep>>,
    options: ActivityOptions,
}

impl std::fmt::Debug for TransferWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferWorker")
            .field("namespace", &self.namespace)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

impl TransferWorker {
    pub fn builder(namespace: impl Into<Namespace>) -> TransferWorkerBuilder {
        TransferWorkerBuilder {
            namespace: namespace.into(),
            steps: Vec::new(),
            options: ActivityOptions::default(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn task_queue(&self) -> &'static str {
        money_transfer::TASK_QUEUE
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    /// Runs a registered step under the worker's activity options.
    pub async fn execute(&self, step: StepKind, details: &PaymentDetails) -> Result<StepReport> {
        let executor = self
            .steps
            .get(&step)
            .ok_or(SagaError::StepNotRegistered(step))?;
        let report = Retrying::new(Arc::clone(executor), self.options.clone())?
            .run(details)
            .await;
        Ok(report)
    }
}

/// Builder for [`TransferWorker`].
pub struct TransferWorkerBuilder {
    namespace: Namespace,
    steps: Vec<Arc<dyn TransferStep>>,
    options: ActivityOptions,
}

impl TransferWorkerBuilder {
    pub fn register_step(mut self, step: Arc<dyn TransferStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Registers withdraw, deposit and refund against one bank.
    pub fn register_banking_steps<B>(self, bank: B) -> Self
    where
        B: BankingService + Clone + 'static,
    {
        banking_steps(bank)
            .into_iter()
            .fold(self, |builder, step| builder.register_step(step))
    }

    pub fn activity_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }

    /// Fails unless every step kind has exactly one executor and the retry
    /// policy is valid.
    pub fn build(self) -> Result<TransferWorker> {
        self.options.retry_policy.validate()?;

        let mut steps = BTreeMap::new();
        for step in self.steps {
            let kind = step.kind();
            if steps.insert(kind, step).is_some() {
                return Err(SagaError::DuplicateStep(kind));
            }
        }
        if let Some(missing) = StepKind::ALL.into_iter().find(|k| !steps.contains_key(k)) {
            return Err(SagaError::StepNotRegistered(missing));
        }

        tracing::debug!(
            namespace = %self.namespace,
            task_queue = money_transfer::TASK_QUEUE,
            non_retryable = ?self
                .options
                .retry_policy
                .non_retryable_kinds()
                .collect::<Vec<_>>(),
            "transfer worker built"
        );
        Ok(TransferWorker {
            namespace: self.namespace,
            steps,
            options: self.options,
        })
    }
}
