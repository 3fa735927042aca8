//! Certificate manager context object.
//!
//! [`CertKeeper`] threads the store, ACME client, and event channel through
//! every operation, so multiple independently configured managers can coexist
//! in one process and tests can inject a fake client.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::acme::{self, AcmeClient, CertificateMaterial, DirectoryClient};
use crate::config::{CertificateRequest, KeeperConfig};
use crate::error::KeeperError;
use crate::events::CertificateRenewal;
use crate::issuer::CertificateIssuer;
use crate::scheduler::{next_step, NextStep, RenewalScheduler, SchedulerStats};
use crate::storage::{Artifact, CertificateStore};

/// Broadcast buffer for renewal events
const EVENT_CAPACITY: usize = 16;

/// Certificate chain and private key returned to the consuming server
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    /// PEM-encoded certificate chain
    pub certificate: Vec<u8>,
    /// PEM-encoded private key
    pub private_key: Vec<u8>,
}

/// Shared state threaded through acquisitions and the renewal chain
pub(crate) struct Core {
    pub(crate) config: KeeperConfig,
    pub(crate) store: CertificateStore,
    pub(crate) client: Arc<dyn AcmeClient>,
    pub(crate) events: broadcast::Sender<CertificateRenewal>,
    /// Serializes acquisitions so only one challenge responder can ever be
    /// bound to the validation port
    acquire_gate: Mutex<()>,
}

impl Core {
    /// Account credentials: stored bytes, or register-and-persist on absence
    pub(crate) async fn account_key(&self) -> Result<Vec<u8>, KeeperError> {
        if let Some(bytes) = self.store.load(Artifact::AccountKey)? {
            return Ok(bytes);
        }
        info!("no account key on disk, registering a new account");
        let bytes = self.client.create_account_key().await?;
        self.store.save(Artifact::AccountKey, &bytes)?;
        Ok(bytes)
    }

    /// Certificate private key: stored bytes, or generate-and-persist on
    /// absence
    pub(crate) fn certificate_key(&self) -> Result<Vec<u8>, KeeperError> {
        if let Some(bytes) = self.store.load(Artifact::CertificateKey)? {
            return Ok(bytes);
        }
        info!("no certificate key on disk, generating one");
        let bytes = acme::generate_private_key()?;
        self.store.save(Artifact::CertificateKey, &bytes)?;
        Ok(bytes)
    }

    /// Run one serialized acquisition
    pub(crate) async fn acquire(
        &self,
        request: &CertificateRequest,
    ) -> Result<CertificateMaterial, KeeperError> {
        let _gate = self.acquire_gate.lock().await;

        let account_key = self.account_key().await?;
        let certificate_key = self.certificate_key()?;

        let issuer = CertificateIssuer::new(Arc::clone(&self.client), self.config.challenge_addr);
        issuer.acquire(&account_key, &certificate_key, request).await
    }

    /// Persist acquired material and notify subscribers.
    ///
    /// The only persist path for acquired certificates, so every change to
    /// on-disk material produces exactly one event.
    pub(crate) fn persist_and_emit(&self, material: &CertificateMaterial) -> Result<(), KeeperError> {
        self.store.persist_certificate(material)?;
        let receivers = self.events.send(CertificateRenewal {
            chain: material.chain.clone(),
            not_after: material.not_after,
        });
        if let Ok(count) = receivers {
            debug!(subscribers = count, "notified certificate subscribers");
        }
        Ok(())
    }
}

/// Automatic certificate lifecycle manager.
///
/// Obtains a certificate over ACME HTTP-01, persists it, and re-acquires it
/// before expiry. One instance manages one certificate; state is re-derived
/// from disk on restart, so nothing about scheduling is persisted.
pub struct CertKeeper {
    core: Arc<Core>,
    stats: Arc<SchedulerStats>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl CertKeeper {
    /// Create a manager talking to the configured ACME directory
    pub fn new(config: KeeperConfig) -> Result<Self, KeeperError> {
        let client = Arc::new(DirectoryClient::new(
            config.directory_url.clone(),
            config.contact_email.clone(),
        ));
        Self::with_client(config, client)
    }

    /// Create a manager with a custom ACME client (tests, alternate CAs)
    pub fn with_client(
        config: KeeperConfig,
        client: Arc<dyn AcmeClient>,
    ) -> Result<Self, KeeperError> {
        let store = CertificateStore::open(&config.storage_dir)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            core: Arc::new(Core {
                config,
                store,
                client,
                events,
                acquire_gate: Mutex::new(()),
            }),
            stats: Arc::new(SchedulerStats::new()),
            renewal: Mutex::new(None),
        })
    }

    /// Prepare account state: storage root plus account credentials,
    /// registering with the authority only when none are stored.
    pub async fn initialize(&self) -> Result<(), KeeperError> {
        self.core.account_key().await.map(|_| ())
    }

    /// Ensure valid certificate material exists and arm renewal.
    ///
    /// Generates missing keys, acquires a certificate when none is stored,
    /// renews in-sequence while the stored one is already inside the safety
    /// margin, then arms the renewal chain and returns the current identity.
    ///
    /// Idempotent with valid, non-expiring material: a repeat call performs
    /// no acquisition and re-arms the (single) renewal chain.
    pub async fn initialize_certificates(
        &self,
        request: CertificateRequest,
    ) -> Result<TlsIdentity, KeeperError> {
        request.validate()?;

        self.core.account_key().await?;
        let private_key = self.core.certificate_key()?;

        let mut material = match self.core.store.load_certificate()? {
            Some(chain) => {
                let info = self.core.client.read_certificate_info(&chain)?;
                debug!(not_after = %info.not_after, "loaded stored certificate");
                CertificateMaterial {
                    chain,
                    not_after: info.not_after,
                }
            }
            None => {
                info!("no certificate on disk, acquiring one");
                let material = self.core.acquire(&request).await?;
                self.core.persist_and_emit(&material)?;
                material
            }
        };

        // Renew in-sequence while the stored material is already due
        while matches!(
            next_step(
                material.not_after,
                self.core.config.safety_margin,
                self.core.config.max_timer_step,
                chrono::Utc::now(),
            ),
            NextStep::RenewNow
        ) {
            info!(not_after = %material.not_after, "stored certificate due for renewal");
            material = self.core.acquire(&request).await?;
            self.core.persist_and_emit(&material)?;
        }

        self.arm_renewal(material.clone(), request).await;

        Ok(TlsIdentity {
            certificate: material.chain,
            private_key,
        })
    }

    /// Perform one acquisition without touching the renewal schedule.
    ///
    /// Nothing is persisted; the issued chain is returned to the caller.
    pub async fn acquire_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<Vec<u8>, KeeperError> {
        request.validate()?;
        Ok(self.core.acquire(request).await?.chain)
    }

    /// Subscribe to notifications for every persisted certificate change
    pub fn subscribe(&self) -> broadcast::Receiver<CertificateRenewal> {
        self.core.events.subscribe()
    }

    /// Observable state and counters of the renewal chain
    pub fn renewal_stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// The on-disk store backing this manager
    pub fn store(&self) -> &CertificateStore {
        &self.core.store
    }

    /// Replace the renewal chain, keeping at most one outstanding
    async fn arm_renewal(&self, material: CertificateMaterial, request: CertificateRequest) {
        let mut slot = self.renewal.lock().await;

        if let Some(previous) = slot.take() {
            debug!("replacing existing renewal chain");
            previous.abort();
        }

        let scheduler = RenewalScheduler::new(Arc::clone(&self.core), Arc::clone(&self.stats));
        *slot = Some(tokio::spawn(scheduler.run(material, request)));
    }
}
