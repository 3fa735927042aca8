//! ACME collaborator seam and certificate material types.
//!
//! The exchange with the validation authority sits behind [`AcmeClient`] so
//! the lifecycle logic can be driven against a fake in tests. The production
//! implementation is [`DirectoryClient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::challenge::ChallengeHooks;
use crate::config::CertificateRequest;
use crate::error::AcmeError;

mod directory;

pub use directory::DirectoryClient;

/// Let's Encrypt production directory
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Metadata parsed out of a certificate chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Expiry of the leaf certificate
    pub not_after: DateTime<Utc>,
}

/// A certificate chain together with its derived expiry.
///
/// Produced by an acquisition, persisted by the store, superseded (never
/// mutated) on each renewal.
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    /// PEM-encoded certificate chain
    pub chain: Vec<u8>,
    /// Expiry of the leaf certificate
    pub not_after: DateTime<Utc>,
}

/// Client for the domain-validation protocol.
///
/// `create_csr` and `read_certificate_info` have local default
/// implementations; only account registration and the order exchange talk to
/// the network.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Register the account with the validation authority and return opaque
    /// credential bytes, suitable for persistence and later [`order`] calls.
    ///
    /// [`order`]: AcmeClient::order
    async fn create_account_key(&self) -> Result<Vec<u8>, AcmeError>;

    /// Build a DER certificate signing request for the requested names,
    /// signed by the given PEM private key
    fn create_csr(
        &self,
        request: &CertificateRequest,
        key_pem: &[u8],
    ) -> Result<Vec<u8>, AcmeError> {
        generate_csr(request, key_pem)
    }

    /// Parse expiry metadata from a PEM certificate chain
    fn read_certificate_info(&self, chain: &[u8]) -> Result<CertificateInfo, AcmeError> {
        certificate_info(chain)
    }

    /// Run one full order exchange and return the issued PEM chain.
    ///
    /// `hooks` publish and withdraw HTTP-01 proofs as the authority offers
    /// and retires challenges. Failures propagate verbatim; retry policy
    /// lives with the caller.
    async fn order(
        &self,
        account_key: &[u8],
        csr: &[u8],
        request: &CertificateRequest,
        hooks: &dyn ChallengeHooks,
    ) -> Result<Vec<u8>, AcmeError>;
}

/// Generate a fresh private key, returned as PEM bytes
pub fn generate_private_key() -> Result<Vec<u8>, AcmeError> {
    let key = rcgen::KeyPair::generate()
        .map_err(|e| AcmeError::Certificate(format!("key generation failed: {e}")))?;
    Ok(key.serialize_pem().into_bytes())
}

/// Build a DER certificate signing request for the requested names
pub fn generate_csr(request: &CertificateRequest, key_pem: &[u8]) -> Result<Vec<u8>, AcmeError> {
    let pem = std::str::from_utf8(key_pem)
        .map_err(|e| AcmeError::Certificate(format!("private key is not valid PEM: {e}")))?;
    let key = rcgen::KeyPair::from_pem(pem)
        .map_err(|e| AcmeError::Certificate(format!("invalid private key: {e}")))?;

    let mut params = rcgen::CertificateParams::new(request.names())
        .map_err(|e| AcmeError::Certificate(format!("invalid certificate names: {e}")))?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, request.common_name.clone());

    let csr = params
        .serialize_request(&key)
        .map_err(|e| AcmeError::Certificate(format!("csr generation failed: {e}")))?;
    Ok(csr.der().to_vec())
}

/// Parse the leaf certificate of a PEM chain and extract its expiry
pub fn certificate_info(chain: &[u8]) -> Result<CertificateInfo, AcmeError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(chain)
        .map_err(|e| AcmeError::Certificate(format!("invalid PEM chain: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| AcmeError::Certificate(format!("invalid certificate: {e}")))?;

    let timestamp = cert.validity().not_after.timestamp();
    let not_after = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| AcmeError::Certificate("certificate expiry out of range".to_string()))?;

    Ok(CertificateInfo { not_after })
}
