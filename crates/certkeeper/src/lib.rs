//! Certkeeper
//!
//! Automatic TLS certificate acquisition and renewal for a single
//! long-running server process, using ACME HTTP-01 domain validation.
//!
//! The manager obtains a certificate, persists it (account key, certificate
//! key, and chain under one storage directory), and re-acquires it before
//! expiry without operator intervention:
//!
//! - **Storage**: [`CertificateStore`] keeps the three artifacts on disk;
//!   writes are atomic from a reader's perspective, and scheduling state is
//!   never persisted, so restarts re-derive everything from the certificate's
//!   actual expiry.
//! - **Challenges**: [`ChallengeResponder`] serves
//!   `/.well-known/acme-challenge/<token>` for exactly the duration of one
//!   acquisition, fed by a [`ChallengeMap`] the exchange mutates through
//!   [`ChallengeHooks`].
//! - **Acquisition**: [`CertificateIssuer`] runs one CSR→challenge→issuance
//!   sequence against an [`AcmeClient`].
//! - **Renewal**: a background chain re-derives the deadline
//!   (`notAfter − safety margin`), waits in bounded steps, renews with
//!   backoff, and broadcasts [`CertificateRenewal`] whenever new material is
//!   persisted.
//!
//! # Example
//!
//! ```ignore
//! use certkeeper::{CertKeeper, CertificateRequest, KeeperConfig};
//!
//! let keeper = CertKeeper::new(KeeperConfig::from_env())?;
//! let identity = keeper
//!     .initialize_certificates(CertificateRequest {
//!         common_name: "example.com".into(),
//!         alt_names: vec!["www.example.com".into()],
//!         terms_of_service_agreed: true,
//!     })
//!     .await?;
//!
//! let mut renewals = keeper.subscribe();
//! // serve TLS with `identity`, hot-swap on each renewal event
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod challenge;
pub mod config;
pub mod error;
pub mod events;
pub mod issuer;
pub mod keeper;
pub mod responder;
pub mod scheduler;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Manager
pub use keeper::{CertKeeper, TlsIdentity};

// Configuration
pub use config::{CertificateRequest, KeeperConfig, RetryConfig};

// ACME collaborator seam
pub use acme::{
    AcmeClient, CertificateInfo, CertificateMaterial, DirectoryClient, LETS_ENCRYPT_PRODUCTION,
    LETS_ENCRYPT_STAGING,
};

// Challenge handling
pub use challenge::{ChallengeHooks, ChallengeMap, CHALLENGE_PATH_PREFIX};
pub use responder::{ChallengeResponder, ResponderHandle};

// Acquisition
pub use issuer::CertificateIssuer;

// Renewal observability
pub use scheduler::{RenewalState, SchedulerStats};

// Events
pub use events::CertificateRenewal;

// Storage
pub use storage::{Artifact, CertificateStore};

// Errors
pub use error::{AcmeError, KeeperError, ResponderError, StorageError};
