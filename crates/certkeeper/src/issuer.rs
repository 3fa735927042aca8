//! One end-to-end certificate acquisition.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::acme::{AcmeClient, CertificateMaterial};
use crate::challenge::ChallengeMap;
use crate::config::CertificateRequest;
use crate::error::KeeperError;
use crate::responder::ChallengeResponder;

/// Drives a single acquisition: CSR, challenge responder up, protocol
/// exchange, responder down.
///
/// No retry happens here; a failed exchange propagates verbatim and retry
/// policy stays with the renewal scheduler. The responder is always stopped
/// (and its teardown awaited) before control returns, success or failure.
pub struct CertificateIssuer {
    client: Arc<dyn AcmeClient>,
    challenge_addr: SocketAddr,
}

impl CertificateIssuer {
    /// Create an issuer serving challenges on `challenge_addr`
    pub fn new(client: Arc<dyn AcmeClient>, challenge_addr: SocketAddr) -> Self {
        Self {
            client,
            challenge_addr,
        }
    }

    /// Acquire a certificate for the requested names
    pub async fn acquire(
        &self,
        account_key: &[u8],
        certificate_key: &[u8],
        request: &CertificateRequest,
    ) -> Result<CertificateMaterial, KeeperError> {
        warn!(
            common_name = %request.common_name,
            "terms of service agreement is set: the operator affirms they have read the CA's terms and agree with them entirely"
        );
        info!(
            common_name = %request.common_name,
            alt_names = ?request.alt_names,
            "acquiring certificate"
        );

        let csr = self.client.create_csr(request, certificate_key)?;

        let map = ChallengeMap::new();
        let responder = ChallengeResponder::start(self.challenge_addr, map.clone()).await?;

        let exchange = self
            .client
            .order(account_key, &csr, request, &map)
            .await;

        // Port released before anything else happens, success or failure
        responder.stop().await;
        map.clear();

        let chain = exchange?;
        let info = self.client.read_certificate_info(&chain)?;

        info!(
            common_name = %request.common_name,
            not_after = %info.not_after,
            "certificate acquired"
        );

        Ok(CertificateMaterial {
            chain,
            not_after: info.not_after,
        })
    }
}
