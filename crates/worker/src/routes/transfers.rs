//! Transfer submission, status, result and cancellation endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::WorkflowId;
use domain::PaymentDetails;
use history::{HistoryEvent, HistoryStore};
use saga::{StepKind, TransferEngine, TransferSaga, transfer_result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: HistoryStore> {
    pub engine: TransferEngine<S>,
}

// -- Request types --

#[derive(Debug, Serialize, Deserialize)]
pub struct StartTransferRequest {
    /// Generated when omitted.
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub source_account: String,
    pub target_account: String,
    pub amount: u64,
    pub reference_id: String,
}

// -- Response types --

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferStartedResponse {
    pub workflow_id: String,
    pub run_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StepView {
    pub step: StepKind,
    pub transaction_id: Option<String>,
    pub error: Option<String>,
    pub attempts: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferStatusResponse {
    pub workflow_id: String,
    pub run_id: String,
    pub state: String,
    pub closed: bool,
    pub in_flight: Option<StepKind>,
    pub details: Option<PaymentDetails>,
    pub started_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepView>,
}

/// Body of `GET /transfers/{id}/result`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResultResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub manual_intervention: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub event_type: String,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl From<HistoryEvent> for HistoryEntry {
    fn from(event: HistoryEvent) -> Self {
        Self {
            sequence: event.sequence.as_u64(),
            event_type: event.event_type,
            recorded_at: event.recorded_at,
            payload: event.payload,
        }
    }
}

fn status_response(workflow_id: &WorkflowId, saga: &TransferSaga) -> TransferStatusResponse {
    let steps = StepKind::ALL
        .into_iter()
        .filter(|step| saga.attempts(*step).is_some() || saga.in_flight() == Some(*step))
        .map(|step| StepView {
            step,
            transaction_id: saga.transaction_id(step).map(ToString::to_string),
            error: saga.failure(step).map(ToString::to_string),
            attempts: saga.attempts(step),
        })
        .collect();

    TransferStatusResponse {
        workflow_id: workflow_id.to_string(),
        run_id: saga.run_id().map(|id| id.to_string()).unwrap_or_default(),
        state: saga.state().to_string(),
        closed: saga.is_closed(),
        in_flight: saga.in_flight(),
        details: saga.details().cloned(),
        started_at: saga.started_at(),
        steps,
    }
}

// -- Handlers --

/// POST /transfers: submit a transfer.
#[tracing::instrument(skip(state, req))]
pub async fn start<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<StartTransferRequest>,
) -> Result<(StatusCode, Json<TransferStartedResponse>), ApiError> {
    let details = PaymentDetails::new(
        req.source_account,
        req.target_account,
        req.amount,
        req.reference_id,
    )?;
    let workflow_id = match req.workflow_id {
        Some(id) if id.trim().is_empty() => {
            return Err(ApiError::BadRequest("workflow_id must not be blank".to_string()));
        }
        Some(id) => WorkflowId::new(id),
        None => WorkflowId::new(format!("transfer-{}", uuid::Uuid::new_v4())),
    };

    let handle = state.engine.start(workflow_id, details).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TransferStartedResponse {
            workflow_id: handle.workflow_id().to_string(),
            run_id: handle.run_id().to_string(),
        }),
    ))
}

/// GET /transfers/{workflow_id}: current state rebuilt from history.
pub async fn get<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<TransferStatusResponse>, ApiError> {
    let workflow_id = WorkflowId::new(workflow_id);
    let saga = state.engine.describe(&workflow_id).await?;
    Ok(Json(status_response(&workflow_id, &saga)))
}

/// GET /transfers/{workflow_id}/result: waits for the run to finish.
#[tracing::instrument(skip(state))]
pub async fn result<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(workflow_id): Path<String>,
) -> Result<(StatusCode, Json<TransferResultResponse>), ApiError> {
    let workflow_id = WorkflowId::new(workflow_id);
    let outcome = state.engine.result(&workflow_id).await?;
    let saga = state.engine.describe(&workflow_id).await?;
    let details = saga
        .details()
        .ok_or_else(|| ApiError::BadRequest(format!("run {workflow_id} has no details")))?;

    let response = match transfer_result(details, outcome) {
        Ok(summary) => (
            StatusCode::OK,
            TransferResultResponse {
                status: "completed".to_string(),
                summary: Some(summary),
                error: None,
                manual_intervention: false,
            },
        ),
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            TransferResultResponse {
                status: err.status().to_string(),
                summary: None,
                error: Some(err.to_string()),
                manual_intervention: err.requires_manual_intervention(),
            },
        ),
    };
    Ok((response.0, Json(response.1)))
}

/// GET /transfers/{workflow_id}/history: the run's recorded events.
pub async fn history<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let events = state.engine.history(&WorkflowId::new(workflow_id)).await?;
    Ok(Json(events.into_iter().map(HistoryEntry::from).collect()))
}

/// POST /transfers/{workflow_id}/cancel: stop a live run without refunding.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<TransferStatusResponse>, ApiError> {
    let workflow_id = WorkflowId::new(workflow_id);
    state.engine.cancel(&workflow_id).await?;
    let saga = state.engine.describe(&workflow_id).await?;
    Ok(Json(status_response(&workflow_id, &saga)))
}
