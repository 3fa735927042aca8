//! Production ACME client backed by `instant-acme`.

use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use tracing::{debug, info, warn};

use super::AcmeClient;
use crate::challenge::ChallengeHooks;
use crate::config::CertificateRequest;
use crate::error::AcmeError;

/// Delay between order/authorization status polls
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls before a pending order or authorization is declared stuck
const MAX_POLL_ATTEMPTS: u32 = 30;

/// ACME client for a real directory endpoint (Let's Encrypt or compatible).
///
/// Account credentials are treated as opaque bytes by callers; they are the
/// serialized `instant-acme` credential JSON.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    directory_url: String,
    contact_email: Option<String>,
}

impl DirectoryClient {
    /// Create a client for the given directory URL
    pub fn new(directory_url: impl Into<String>, contact_email: Option<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            contact_email,
        }
    }

    async fn account_from_key(&self, account_key: &[u8]) -> Result<Account, AcmeError> {
        let credentials: AccountCredentials = serde_json::from_slice(account_key)
            .map_err(|e| AcmeError::Certificate(format!("invalid account credentials: {e}")))?;
        Account::from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Protocol(e.to_string()))
    }

    /// Offer the HTTP-01 challenge of every pending authorization, returning
    /// `(token, challenge_url)` pairs for readiness notification and cleanup.
    fn offer_challenges(
        order: &Order,
        authorizations: &[instant_acme::Authorization],
        hooks: &dyn ChallengeHooks,
    ) -> Result<Vec<(String, String)>, AcmeError> {
        let mut offered = Vec::new();

        for authz in authorizations {
            match authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(AcmeError::Challenge(format!(
                        "authorization for {:?} in unexpected state {status:?}",
                        authz.identifier
                    )));
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| {
                    AcmeError::Challenge(format!(
                        "no http-01 challenge offered for {:?}",
                        authz.identifier
                    ))
                })?;

            let proof = order.key_authorization(challenge);
            hooks.offer(&challenge.token, proof.as_str());
            offered.push((challenge.token.clone(), challenge.url.clone()));
        }

        Ok(offered)
    }

    async fn wait_for_authorizations(&self, order: &mut Order) -> Result<(), AcmeError> {
        let mut attempts = 0;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let authorizations = order
                .authorizations()
                .await
                .map_err(|e| AcmeError::Protocol(e.to_string()))?;

            if authorizations
                .iter()
                .all(|a| matches!(a.status, AuthorizationStatus::Valid))
            {
                debug!("all authorizations validated");
                return Ok(());
            }

            if let Some(failed) = authorizations
                .iter()
                .find(|a| matches!(a.status, AuthorizationStatus::Invalid))
            {
                return Err(AcmeError::Challenge(format!(
                    "authorization failed for {:?}",
                    failed.identifier
                )));
            }

            attempts += 1;
            if attempts > MAX_POLL_ATTEMPTS {
                return Err(AcmeError::Challenge(
                    "timed out waiting for authorization validation".to_string(),
                ));
            }
        }
    }

    async fn finalize(&self, order: &mut Order, csr: &[u8]) -> Result<Vec<u8>, AcmeError> {
        order
            .finalize(csr)
            .await
            .map_err(|e| AcmeError::Protocol(e.to_string()))?;

        let mut attempts = 0;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            order
                .refresh()
                .await
                .map_err(|e| AcmeError::Protocol(e.to_string()))?;

            match order.state().status {
                OrderStatus::Valid => {
                    let chain = order
                        .certificate()
                        .await
                        .map_err(|e| AcmeError::Protocol(e.to_string()))?
                        .ok_or_else(|| {
                            AcmeError::Protocol("order valid but no certificate issued".to_string())
                        })?;
                    return Ok(chain.into_bytes());
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::Protocol("order failed validation".to_string()));
                }
                _ => {
                    attempts += 1;
                    if attempts > MAX_POLL_ATTEMPTS {
                        return Err(AcmeError::Protocol(
                            "timed out waiting for order finalization".to_string(),
                        ));
                    }
                }
            }
        }
    }

    async fn drive_order(
        &self,
        order: &mut Order,
        offered: &[(String, String)],
        csr: &[u8],
    ) -> Result<Vec<u8>, AcmeError> {
        for (_, url) in offered {
            order
                .set_challenge_ready(url)
                .await
                .map_err(|e| AcmeError::Protocol(e.to_string()))?;
        }

        self.wait_for_authorizations(order).await?;
        self.finalize(order, csr).await
    }
}

#[async_trait]
impl AcmeClient for DirectoryClient {
    async fn create_account_key(&self) -> Result<Vec<u8>, AcmeError> {
        warn!(
            directory = %self.directory_url,
            "registering account: by proceeding the operator affirms they have read and agreed to the CA's terms of service"
        );

        let contact: Vec<String> = self
            .contact_email
            .iter()
            .map(|email| format!("mailto:{email}"))
            .collect();
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (_, credentials) = Account::create(&new_account, &self.directory_url, None)
            .await
            .map_err(|e| AcmeError::Protocol(e.to_string()))?;

        let bytes = serde_json::to_vec(&credentials)
            .map_err(|e| AcmeError::Certificate(format!("credential serialization failed: {e}")))?;

        info!(directory = %self.directory_url, "registered account");
        Ok(bytes)
    }

    async fn order(
        &self,
        account_key: &[u8],
        csr: &[u8],
        request: &CertificateRequest,
        hooks: &dyn ChallengeHooks,
    ) -> Result<Vec<u8>, AcmeError> {
        let account = self.account_from_key(account_key).await?;

        let identifiers: Vec<Identifier> =
            request.names().into_iter().map(Identifier::Dns).collect();

        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::Protocol(e.to_string()))?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Protocol(e.to_string()))?;

        let offered = Self::offer_challenges(&order, &authorizations, hooks)?;
        info!(
            common_name = %request.common_name,
            challenges = offered.len(),
            "offered http-01 challenges"
        );

        let result = self.drive_order(&mut order, &offered, csr).await;

        // Retire proofs whether or not the exchange succeeded
        for (token, _) in &offered {
            hooks.withdraw(token);
        }

        result
    }
}
