//! Notifications for persisted certificate changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broadcast every time new certificate material is persisted.
///
/// Consumers (typically a TLS-terminating listener) hot-swap their in-use
/// certificate on receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRenewal {
    /// PEM-encoded certificate chain, as written to disk
    pub chain: Vec<u8>,
    /// Expiry of the new certificate
    pub not_after: DateTime<Utc>,
}
