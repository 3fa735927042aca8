//! Configuration for the certificate lifecycle manager.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::acme::LETS_ENCRYPT_PRODUCTION;
use crate::error::KeeperError;

/// Environment variable overriding the storage directory
pub const STORAGE_DIR_ENV: &str = "CERTKEEPER_DIR";

/// Environment variable supplying the ACME contact email
pub const CONTACT_EMAIL_ENV: &str = "CERTKEEPER_EMAIL";

/// Default storage directory, relative to the working directory
pub const DEFAULT_STORAGE_DIR: &str = ".certkeeper";

/// Default buffer before expiry at which renewal triggers (one day)
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 24 * 60 * 60;

/// Longest single timer the scheduler arms.
///
/// Waits past this are broken into steps, each re-checking the deadline
/// against the wall clock before sleeping again.
pub const DEFAULT_MAX_TIMER_STEP: Duration = Duration::from_millis(1 << 31);

/// Retry behavior for failed scheduled renewals
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per due renewal before the chain gives up
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

/// Settings for a certificate manager instance
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// Directory holding the account key, certificate key, and chain
    pub storage_dir: PathBuf,
    /// Contact email registered with the ACME account
    pub contact_email: Option<String>,
    /// ACME directory URL
    pub directory_url: String,
    /// Bind address for the HTTP-01 challenge responder
    pub challenge_addr: SocketAddr,
    /// Buffer before `notAfter` at which renewal triggers
    pub safety_margin: chrono::Duration,
    /// Longest single sleep the renewal scheduler arms
    pub max_timer_step: Duration,
    /// Retry behavior for failed scheduled renewals
    pub retry: RetryConfig,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            contact_email: None,
            directory_url: LETS_ENCRYPT_PRODUCTION.to_string(),
            challenge_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            safety_margin: chrono::Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            max_timer_step: DEFAULT_MAX_TIMER_STEP,
            retry: RetryConfig::default(),
        }
    }
}

impl KeeperConfig {
    /// Build a configuration from defaults plus environment overrides
    /// (`CERTKEEPER_DIR`, `CERTKEEPER_EMAIL`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Ok(email) = std::env::var(CONTACT_EMAIL_ENV) {
            if !email.is_empty() {
                config.contact_email = Some(email);
            }
        }
        config
    }
}

/// Names and consent for one certificate
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    /// Subject common name
    pub common_name: String,
    /// Subject alternative names, in addition to the common name
    pub alt_names: Vec<String>,
    /// Explicit agreement to the CA's terms of service
    pub terms_of_service_agreed: bool,
}

impl CertificateRequest {
    /// All DNS names the certificate must cover, common name first
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![self.common_name.clone()];
        for alt in &self.alt_names {
            if !names.contains(alt) {
                names.push(alt.clone());
            }
        }
        names
    }

    pub(crate) fn validate(&self) -> Result<(), KeeperError> {
        if self.common_name.is_empty() {
            return Err(KeeperError::Config("common name must not be empty".into()));
        }
        if !self.terms_of_service_agreed {
            return Err(KeeperError::Config(
                "the CA's terms of service must be explicitly agreed to before issuance".into(),
            ));
        }
        Ok(())
    }
}
