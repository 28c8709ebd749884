//! Allocation - the orchestrator of file operations on one blobber set
//!
//! An [`Allocation`] is deserialized from allocation metadata and becomes
//! usable after [`Allocation::init_allocation`]. Uploads and downloads go
//! through two bounded queues drained by a dispatcher task that runs every
//! request in its own task; everything else runs on the caller's task.

mod objects;
mod transfer;

pub use transfer::UploadOptions;

use crate::blobber::{AllocationStats, Blobber, BlobberAllocation, PriceRange};
use crate::consensus::{Consensus, MAX_BLOBBERS};
use crate::erasure::{ErasureCoder, ErasureConfig, ReedSolomonCoder};
use crate::identity::ClientIdentity;
use crate::progress::{Completion, ProgressRegistry};
use crate::request::download::DownloadRequest;
use crate::request::upload::UploadRequest;
use crate::request::{DigestSubmitter, MetaTxnSubmitter, RequestBase};
use crate::ticket::AuthTicket;
use crate::transport::BlobberTransport;
use crate::{Result, SdkConfig, SdkError};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collaborators an allocation works with
#[derive(Clone)]
pub struct AllocationEnv {
    pub transport: Arc<dyn BlobberTransport>,
    pub coder: Arc<dyn ErasureCoder>,
    pub identity: Arc<ClientIdentity>,
    pub meta_submitter: Arc<dyn MetaTxnSubmitter>,
    pub config: SdkConfig,
}

impl AllocationEnv {
    /// Reed-Solomon coding, digest meta transactions and default config
    pub fn new(transport: Arc<dyn BlobberTransport>, identity: Arc<ClientIdentity>) -> Self {
        Self {
            transport,
            coder: Arc::new(ReedSolomonCoder),
            identity,
            meta_submitter: Arc::new(DigestSubmitter),
            config: SdkConfig::default(),
        }
    }

    pub fn with_coder(mut self, coder: Arc<dyn ErasureCoder>) -> Self {
        self.coder = coder;
        self
    }

    pub fn with_meta_submitter(mut self, submitter: Arc<dyn MetaTxnSubmitter>) -> Self {
        self.meta_submitter = submitter;
        self
    }

    pub fn with_config(mut self, config: SdkConfig) -> Self {
        self.config = config;
        self
    }
}

/// Where an allocation is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Finalized,
    Canceled,
}

#[derive(Debug)]
struct AllocationState {
    lifecycle: Lifecycle,
    under_repair: bool,
}

impl Default for AllocationState {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Active,
            under_repair: false,
        }
    }
}

/// A queued request with its cancellation token and completion
pub(crate) struct Job<R> {
    request: R,
    token: CancellationToken,
    completion: Completion,
}

/// Everything that exists only once the allocation is initialized
struct AllocationRuntime {
    env: AllocationEnv,
    base: RequestBase,
    erasure: ErasureConfig,
    token: CancellationToken,
    limiter: Arc<Semaphore>,
    uploads: Arc<ProgressRegistry>,
    downloads: Arc<ProgressRegistry>,
    meta_commits: Arc<ProgressRegistry>,
    upload_tx: mpsc::Sender<Job<UploadRequest>>,
    download_tx: mpsc::Sender<Job<DownloadRequest>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// A storage allocation spread across a fixed set of blobbers
#[derive(Serialize, Deserialize, Default)]
pub struct Allocation {
    pub id: String,
    pub tx: String,
    pub data_shards: usize,
    pub parity_shards: usize,
    pub size: i64,
    pub expiration_date: i64,
    pub owner_id: String,
    pub owner_public_key: String,
    #[serde(default)]
    pub payer_id: String,
    pub blobbers: Vec<Blobber>,
    #[serde(default)]
    pub stats: AllocationStats,
    #[serde(default)]
    pub blobber_details: Vec<BlobberAllocation>,
    #[serde(default)]
    pub read_price_range: PriceRange,
    #[serde(default)]
    pub write_price_range: PriceRange,
    /// Nanoseconds
    #[serde(default)]
    pub challenge_completion_time: i64,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub finalized: bool,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub moved_to_challenge: i64,
    #[serde(default)]
    pub moved_back: i64,
    #[serde(default)]
    pub moved_to_validators: i64,

    #[serde(skip)]
    runtime: OnceCell<AllocationRuntime>,
    #[serde(skip)]
    state: Mutex<AllocationState>,
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.id)
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .field("blobbers", &self.blobbers.len())
            .field("initialized", &self.is_initialized())
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Allocation {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SdkError::Serialization(e.to_string()))
    }

    /// Check the allocation invariants, then start the dispatcher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init_allocation(&self, env: AllocationEnv) -> Result<()> {
        if self.is_initialized() {
            return Err(SdkError::InvalidAllocation("already initialized".into()));
        }
        env.config.validate()?;

        if self.data_shards == 0 {
            return Err(SdkError::InvalidAllocation("data shards must be positive".into()));
        }
        if self.blobbers.len() != self.data_shards + self.parity_shards {
            return Err(SdkError::InvalidAllocation(format!(
                "{} blobbers for {} data + {} parity shards",
                self.blobbers.len(),
                self.data_shards,
                self.parity_shards
            )));
        }
        if self.blobbers.len() > MAX_BLOBBERS {
            return Err(SdkError::InvalidAllocation(format!(
                "at most {MAX_BLOBBERS} blobbers are supported"
            )));
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SdkError::InvalidAllocation(format!("no async runtime: {e}")))?;

        let token = CancellationToken::new();
        let (upload_tx, upload_rx) = mpsc::channel(env.config.upload_queue_capacity);
        let (download_tx, download_rx) = mpsc::channel(env.config.download_queue_capacity);
        let limiter = Arc::new(Semaphore::new(env.config.max_concurrent_requests));

        let base = RequestBase {
            allocation_id: self.id.clone(),
            allocation_tx: self.tx.clone(),
            blobbers: self.blobbers.clone().into(),
            consensus: Consensus::new(self.data_shards, self.parity_shards),
            transport: Arc::clone(&env.transport),
        };

        let runtime = AllocationRuntime {
            env,
            base,
            erasure: ErasureConfig::new(self.data_shards, self.parity_shards),
            token: token.clone(),
            limiter: Arc::clone(&limiter),
            uploads: Arc::new(ProgressRegistry::new()),
            downloads: Arc::new(ProgressRegistry::new()),
            meta_commits: Arc::new(ProgressRegistry::new()),
            upload_tx,
            download_tx,
            dispatcher: Mutex::new(None),
        };

        self.runtime
            .set(runtime)
            .map_err(|_| SdkError::InvalidAllocation("already initialized".into()))?;

        {
            let mut state = self.state.lock();
            state.lifecycle = if self.finalized {
                Lifecycle::Finalized
            } else if self.canceled {
                Lifecycle::Canceled
            } else {
                Lifecycle::Active
            };
        }

        let dispatcher = handle.spawn(dispatch(upload_rx, download_rx, token, limiter));
        if let Some(runtime) = self.runtime.get() {
            *runtime.dispatcher.lock() = Some(dispatcher);
        }

        info!(
            allocation = %self.id,
            data_shards = self.data_shards,
            parity_shards = self.parity_shards,
            "allocation initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.get().is_some()
    }

    /// Stop the dispatcher and cancel every in-flight request
    ///
    /// Queued requests that never started resolve as `Cancelled`.
    pub fn close(&self) {
        if let Some(runtime) = self.runtime.get() {
            runtime.token.cancel();
            runtime.uploads.cancel_all();
            runtime.downloads.cancel_all();
            runtime.meta_commits.cancel_all();
            runtime.limiter.close();
            info!(allocation = %self.id, "allocation closed");
        }
    }

    /// Wait for the dispatcher task to exit after [`Allocation::close`]
    pub async fn shutdown(&self) {
        self.close();
        let dispatcher = self.runtime.get().and_then(|r| r.dispatcher.lock().take());
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                warn!(allocation = %self.id, error = %e, "dispatcher ended abnormally");
            }
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Mark the allocation finalized and tear it down
    pub fn mark_finalized(&self) {
        self.state.lock().lifecycle = Lifecycle::Finalized;
        self.close();
    }

    /// Mark the allocation canceled and tear it down
    pub fn mark_canceled(&self) {
        self.state.lock().lifecycle = Lifecycle::Canceled;
        self.close();
    }

    pub fn under_repair(&self) -> bool {
        self.state.lock().under_repair
    }

    /// Set or clear the repair flag; mutating operations are rejected while it is set
    pub fn update_repair_status(&self, value: bool) {
        self.state.lock().under_repair = value;
        debug!(allocation = %self.id, under_repair = value, "repair status updated");
    }

    pub fn stats(&self) -> AllocationStats {
        self.stats.clone()
    }

    pub fn consensus(&self) -> Consensus {
        Consensus::new(self.data_shards, self.parity_shards)
    }

    fn runtime(&self) -> Result<&AllocationRuntime> {
        self.runtime.get().ok_or(SdkError::NotInitialized)
    }

    /// Runtime for a transfer that must not overlap a repair
    fn repair_free_runtime(&self) -> Result<&AllocationRuntime> {
        let runtime = self.runtime()?;
        if self.state.lock().under_repair {
            return Err(SdkError::UnderRepair);
        }
        Ok(runtime)
    }

    /// Runtime for an operation that changes stored objects
    fn mutable_runtime(&self) -> Result<&AllocationRuntime> {
        let runtime = self.repair_free_runtime()?;
        let state = self.state.lock();
        if state.lifecycle != Lifecycle::Active {
            return Err(SdkError::InvalidAllocation(format!(
                "allocation is {:?}",
                state.lifecycle
            )));
        }
        Ok(runtime)
    }

    /// Decode a ticket issued for this allocation that is still valid
    fn decode_ticket(&self, encoded: &str) -> Result<AuthTicket> {
        let ticket = AuthTicket::decode(encoded)?;
        if ticket.allocation_id != self.id {
            return Err(SdkError::TicketDecode(format!(
                "ticket is for allocation {}",
                ticket.allocation_id
            )));
        }
        if ticket.is_expired(chrono::Utc::now().timestamp()) {
            return Err(SdkError::TicketDecode("ticket expired".into()));
        }
        Ok(ticket)
    }

    /// Listing and downloading need redundancy to compare answers
    fn require_redundancy(&self) -> Result<()> {
        if self.blobbers.len() > 1 {
            Ok(())
        } else {
            Err(SdkError::NoBlobbers)
        }
    }
}

/// Run one request under the concurrency limit and report its outcome
fn spawn_job<R, F, Fut>(job: Job<R>, limiter: Arc<Semaphore>, run: F)
where
    R: Send + 'static,
    F: FnOnce(R, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let Job {
            request,
            token,
            completion,
        } = job;

        let Ok(_permit) = limiter.acquire_owned().await else {
            return;
        };

        let outcome = if token.is_cancelled() {
            Err(SdkError::Cancelled)
        } else {
            run(request, token).await
        };
        completion.finish(outcome);
    });
}

/// Hand queued requests to their own tasks until the allocation closes
async fn dispatch(
    mut uploads: mpsc::Receiver<Job<UploadRequest>>,
    mut downloads: mpsc::Receiver<Job<DownloadRequest>>,
    token: CancellationToken,
    limiter: Arc<Semaphore>,
) {
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            Some(job) = uploads.recv() => {
                spawn_job(job, Arc::clone(&limiter), |request, token| request.process(token));
            }

            Some(job) = downloads.recv() => {
                spawn_job(job, Arc::clone(&limiter), |request, token| request.process(token));
            }

            else => break,
        }
    }

    debug!("dispatcher stopped");
}
