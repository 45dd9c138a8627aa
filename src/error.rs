//! Error handling module
//!
//! Provides the unified error type for reconciliation and its retry
//! classification. Startup failures are handled separately in `main` with
//! `anyhow` and terminate the process; nothing here ever aborts the controller
//! loop.

use std::time::Duration;
use thiserror::Error;

/// Reconciliation error type
///
/// Every failure mode a single reconcile invocation can hit. The variants are
/// deliberately distinct per failure source so operators can tell a pool
/// exhaustion from a rejected statement in `status.lastError`, even though
/// most of them share the same retry behaviour.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Statement rejected by database: {0}")]
    Statement(#[from] tokio_postgres::Error),

    #[error("Statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid table spec: {0}")]
    InvalidSpec(String),

    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),
}

/// How the error policy schedules the next attempt for a failed identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Connectivity or statement failures that can succeed on retry without
    /// any human intervention. Exponential backoff with a cap.
    Transient,
    /// The spec itself cannot be translated into a table definition. Retrying
    /// quickly cannot help until the object is edited, so these get a long
    /// fixed requeue interval instead of tight backoff.
    InvalidSpec,
}

impl Error {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::Kube(_) | Error::Pool(_) | Error::Statement(_) | Error::Timeout(_) => {
                RetryClass::Transient
            }
            Error::InvalidSpec(_) | Error::MissingObjectKey(_) => RetryClass::InvalidSpec,
        }
    }
}

/// Result type alias for reconciliation paths
pub type Result<T, E = Error> = std::result::Result<T, E>;
