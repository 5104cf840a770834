//! Submits a money transfer to a running worker and prints its result.

use std::process::ExitCode;

use clap::Parser;
use worker::client::TransferClient;
use worker::config::StarterArgs;
use worker::routes::transfers::StartTransferRequest;

#[tokio::main]
async fn main() -> ExitCode {
    let args = StarterArgs::parse();
    worker::telemetry::init_tracing(&args.client);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %err, "transfer could not be submitted");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the transfer completed.
async fn run(args: StarterArgs) -> Result<bool, worker::client::ClientError> {
    let client = TransferClient::connect(&args.client)?;

    tracing::info!(
        source = %args.source_account,
        target = %args.target_account,
        amount = args.amount,
        url = client.base_url(),
        "starting transfer"
    );

    let started = client
        .start(&StartTransferRequest {
            workflow_id: Some(args.workflow_id),
            source_account: args.source_account,
            target_account: args.target_account,
            amount: args.amount,
            reference_id: args.reference_id,
        })
        .await?;
    tracing::info!(
        workflow_id = %started.workflow_id,
        run_id = %started.run_id,
        "transfer submitted"
    );

    let result = client.result(&started.workflow_id).await?;
    match (&result.summary, &result.error) {
        (Some(summary), _) => {
            tracing::info!("{summary}");
            Ok(true)
        }
        (None, error) => {
            tracing::error!(
                status = %result.status,
                manual_intervention = result.manual_intervention,
                "{}",
                error.as_deref().unwrap_or("transfer failed")
            );
            Ok(false)
        }
    }
}
