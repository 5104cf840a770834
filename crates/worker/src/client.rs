//! HTTP client for the submission API.

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::{ClientOptions, ConfigError};
use crate::routes::transfers::{
    StartTransferRequest, TransferResultResponse, TransferStartedResponse,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an unexpected status.
    #[error("service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Talks to a running `transfer-worker`.
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: reqwest::Client,
    base_url: String,
}

impl TransferClient {
    /// Builds the client, presenting the TLS identity when one is configured.
    pub fn connect(options: &ClientOptions) -> Result<Self, ClientError> {
        let identity = options.tls_identity()?;
        let mut builder = reqwest::Client::builder().use_rustls_tls();
        if let Some(identity) = &identity {
            builder = builder.identity(identity.to_reqwest()?);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: options.base_url(identity.is_some()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn start(
        &self,
        request: &StartTransferRequest,
    ) -> Result<TransferStartedResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/transfers", self.base_url))
            .json(request)
            .send()
            .await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(unexpected(response).await);
        }
        Ok(response.json().await?)
    }

    /// Waits for the transfer's result. Failed transfers are returned as a
    /// response, not an error.
    pub async fn result(&self, workflow_id: &str) -> Result<TransferResultResponse, ClientError> {
        let response = self
            .http
            .get(format!("{}/transfers/{workflow_id}/result", self.base_url))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::UNPROCESSABLE_ENTITY => Ok(response.json().await?),
            _ => Err(unexpected(response).await),
        }
    }
}

async fn unexpected(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ClientError::Status { status, body }
}
