//! Shared fixtures: a scriptable ACME client and certificate minting.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use certkeeper::{
    AcmeClient, AcmeError, CertificateRequest, ChallengeHooks, KeeperConfig, RetryConfig,
};

/// Install a test tracing subscriber; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Self-signed PEM chain expiring at `not_after`
pub fn mint_chain(names: &[String], not_after: DateTime<Utc>) -> Vec<u8> {
    let key = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(names.to_vec()).unwrap();
    params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.timestamp()).unwrap();
    params.self_signed(&key).unwrap().pem().into_bytes()
}

/// ACME client double: mints self-signed chains with a fixed validity and
/// records how it was driven.
pub struct FakeAcmeClient {
    validity: chrono::Duration,
    accounts: AtomicU64,
    orders: AtomicU64,
    offered: AtomicU64,
    withdrawn: AtomicU64,
    fail_remaining: AtomicU64,
}

impl FakeAcmeClient {
    pub fn new(validity: chrono::Duration) -> Self {
        Self {
            validity,
            accounts: AtomicU64::new(0),
            orders: AtomicU64::new(0),
            offered: AtomicU64::new(0),
            withdrawn: AtomicU64::new(0),
            fail_remaining: AtomicU64::new(0),
        }
    }

    /// Fail the next `count` order exchanges
    pub fn fail_next_orders(&self, count: u64) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub fn accounts_created(&self) -> u64 {
        self.accounts.load(Ordering::SeqCst)
    }

    pub fn orders_completed(&self) -> u64 {
        self.orders.load(Ordering::SeqCst)
    }

    pub fn challenges_offered(&self) -> u64 {
        self.offered.load(Ordering::SeqCst)
    }

    pub fn challenges_withdrawn(&self) -> u64 {
        self.withdrawn.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcmeClient for FakeAcmeClient {
    async fn create_account_key(&self) -> Result<Vec<u8>, AcmeError> {
        let n = self.accounts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("fake-credentials-{n}").into_bytes())
    }

    async fn order(
        &self,
        _account_key: &[u8],
        _csr: &[u8],
        request: &CertificateRequest,
        hooks: &dyn ChallengeHooks,
    ) -> Result<Vec<u8>, AcmeError> {
        let n = self.orders.load(Ordering::SeqCst);

        hooks.offer(&format!("tok-{n}"), &format!("proof-{n}"));
        self.offered.fetch_add(1, Ordering::SeqCst);

        hooks.withdraw(&format!("tok-{n}"));
        self.withdrawn.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
        {
            return Err(AcmeError::Protocol("validation rejected".to_string()));
        }

        self.orders.fetch_add(1, Ordering::SeqCst);
        Ok(mint_chain(&request.names(), Utc::now() + self.validity))
    }
}

/// Config pointed at a temp directory, ephemeral challenge port, fast retries
pub fn test_config(dir: &Path) -> KeeperConfig {
    KeeperConfig {
        storage_dir: dir.to_path_buf(),
        challenge_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        retry: RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        },
        ..KeeperConfig::default()
    }
}

/// A request for `example.com` with terms agreed
pub fn request() -> CertificateRequest {
    CertificateRequest {
        common_name: "example.com".to_string(),
        alt_names: Vec::new(),
        terms_of_service_agreed: true,
    }
}
