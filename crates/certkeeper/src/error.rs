//! Certificate lifecycle error types.

use thiserror::Error;

/// Errors from the on-disk certificate store.
///
/// Absence of an artifact is not an error; `CertificateStore::load` returns
/// `Option` for that case. Everything here propagates to the caller.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the ACME exchange and certificate material handling
#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    #[error("challenge failed: {0}")]
    Challenge(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the HTTP-01 challenge responder
#[derive(Error, Debug)]
pub enum ResponderError {
    #[error("failed to bind challenge listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// Top-level error for certificate lifecycle operations
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("acme error: {0}")]
    Acme(#[from] AcmeError),

    #[error("challenge responder error: {0}")]
    Responder(#[from] ResponderError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
