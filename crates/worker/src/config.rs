//! Command-line and environment configuration.
//!
//! Every flag can also be set through an environment variable:
//! - `TRANSFER_ADDRESS`: host:port of the worker API (default: `127.0.0.1:7233`)
//! - `TRANSFER_NAMESPACE`: namespace runs are recorded in (default: `default`)
//! - `TRANSFER_CLIENT_TLS_CERT` / `TRANSFER_CLIENT_TLS_KEY`: client identity, PEM
//! - `RUST_LOG`: tracing filter directive (default: `info`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use common::Namespace;
use saga::{ActivityOptions, RetryPolicy};
use thiserror::Error;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7233";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TLS requires both a certificate and a key; only the {given} was provided")]
    IncompleteTls { given: &'static str },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} does not contain a PEM {expected}", .path.display())]
    NotPem {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("invalid TLS identity: {0}")]
    Identity(String),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Connection options shared by the worker and the starter.
#[derive(Debug, Clone, Args)]
pub struct ClientOptions {
    /// Host and port of the transfer service
    #[arg(long, env = "TRANSFER_ADDRESS", default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Namespace transfers are recorded in
    #[arg(long, env = "TRANSFER_NAMESPACE", default_value = Namespace::DEFAULT)]
    pub namespace: String,

    /// Path to the client certificate (PEM)
    #[arg(long, env = "TRANSFER_CLIENT_TLS_CERT")]
    pub tls_cert_path: Option<PathBuf>,

    /// Path to the client private key (PEM)
    #[arg(long, env = "TRANSFER_CLIENT_TLS_KEY")]
    pub tls_key_path: Option<PathBuf>,

    /// Tracing filter directive
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ClientOptions {
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.namespace.clone())
    }

    /// Loads the TLS identity, if one is configured.
    pub fn tls_identity(&self) -> Result<Option<TlsIdentity>, ConfigError> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::IncompleteTls {
                given: "certificate",
            }),
            (None, Some(_)) => Err(ConfigError::IncompleteTls { given: "key" }),
            (Some(cert), Some(key)) => TlsIdentity::load(cert, key).map(Some),
        }
    }

    /// Base URL of the service; https when a TLS identity is configured.
    pub fn base_url(&self, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{}", self.address)
    }
}

/// A client certificate and its private key, both PEM encoded.
#[derive(Clone)]
pub struct TlsIdentity {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("cert_bytes", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

impl TlsIdentity {
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            cert_pem: read_pem(cert_path, "CERTIFICATE")?,
            key_pem: read_pem(key_path, "PRIVATE KEY")?,
        })
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// Builds the identity presented by the HTTP client.
    pub fn to_reqwest(&self) -> Result<reqwest::Identity, ConfigError> {
        let mut pem = self.key_pem.clone();
        pem.push(b'\n');
        pem.extend_from_slice(&self.cert_pem);
        reqwest::Identity::from_pem(&pem).map_err(|e| ConfigError::Identity(e.to_string()))
    }
}

fn read_pem(path: &Path, label: &'static str) -> Result<Vec<u8>, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let text = String::from_utf8_lossy(&bytes);
    let has_block = text
        .lines()
        .any(|line| line.starts_with("-----BEGIN ") && line.contains(label));
    if !has_block {
        return Err(ConfigError::NotPem {
            path: path.to_path_buf(),
            expected: label,
        });
    }
    Ok(bytes)
}

/// Arguments of the `transfer-worker` binary.
#[derive(Debug, Parser)]
#[command(name = "transfer-worker", about = "Hosts money transfers and serves the submission API")]
#[command(version)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub client: ClientOptions,

    /// Start-to-close timeout of a single step attempt, in seconds
    #[arg(long, env = "TRANSFER_STEP_TIMEOUT_SECS", default_value_t = 60)]
    pub step_timeout_secs: u64,

    /// Attempt budget per step; 0 retries forever
    #[arg(long, env = "TRANSFER_MAX_ATTEMPTS", default_value_t = 0)]
    pub max_attempts: u32,
}

impl WorkerArgs {
    /// The worker listens on plain HTTP, so a client identity has nothing to
    /// secure here. Only `start-transfer` presents one.
    pub fn reject_tls(&self) -> Result<(), ConfigError> {
        if self.client.tls_cert_path.is_some() || self.client.tls_key_path.is_some() {
            return Err(ConfigError::Invalid(
                "transfer-worker serves plain HTTP; --tls-cert-path and --tls-key-path \
                 only apply to start-transfer"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn activity_options(&self) -> Result<ActivityOptions, ConfigError> {
        if self.step_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "--step-timeout-secs must be greater than zero".to_string(),
            ));
        }
        Ok(ActivityOptions {
            start_to_close_timeout: Duration::from_secs(self.step_timeout_secs),
            retry_policy: RetryPolicy::default().maximum_attempts(self.max_attempts),
        })
    }
}

/// Arguments of the `start-transfer` binary. Defaults submit the sample
/// invoice payment.
#[derive(Debug, Parser)]
#[command(name = "start-transfer", about = "Submits a money transfer and waits for its result")]
#[command(version)]
pub struct StarterArgs {
    #[command(flatten)]
    pub client: ClientOptions,

    #[arg(long, default_value = "pay-invoice-701")]
    pub workflow_id: String,

    #[arg(long, default_value = "85-150")]
    pub source_account: String,

    #[arg(long, default_value = "43-812")]
    pub target_account: String,

    #[arg(long, default_value_t = 250)]
    pub amount: u64,

    #[arg(long, default_value = "12345")]
    pub reference_id: String,
}
