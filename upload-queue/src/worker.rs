//! Background draining of the upload queue
//!
//! One worker owns the queue. Each pass walks the queued sessions in order:
//!
//! 1. submit the session manifest if the strategy needs one,
//! 2. upload eligible assets (at most `max_concurrent_uploads` at a time),
//! 3. finalize the session if the strategy needs it,
//! 4. drop the session from the store once nothing is left to do.
//!
//! Every state transition is written back through [`QueueStore`], so
//! concurrent uploads of one session never overwrite each other's progress.
//! Failures leave the asset or step in `failed`; whether the next pass picks
//! it up again is decided by [`FailedAssetPolicy`].
//!
//! Passes never overlap and await every upload they start, so an asset still
//! marked `uploading` when a pass begins was orphaned (crash, panicked task,
//! failed bookkeeping write) and goes back to `pending`.

use crate::error::QueueResult;
use crate::models::{AssetState, StepState, UploadAsset, UploadSession, UploadStrategy};
use crate::store::QueueStore;
use booth_client::{
    ApiError, ApiResult, CompleteRequest, CompletedAsset, CreateSessionRequest, HttpTransport,
    PiApi, PresignRequest, WorkerApi,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// When assets (and session steps) in `failed` are picked up again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedAssetPolicy {
    /// On every processing pass
    EveryPass,
    /// Only on the first pass after the worker is created
    NextLaunch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Strategy for newly enqueued sessions; queued ones keep their own
    pub strategy: UploadStrategy,
    pub failed_policy: FailedAssetPolicy,
    /// Pause between passes when nothing wakes the worker
    pub poll_interval: Duration,
    pub max_concurrent_uploads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            strategy: UploadStrategy::Direct,
            failed_policy: FailedAssetPolicy::EveryPass,
            poll_interval: Duration::from_secs(15),
            max_concurrent_uploads: 3,
        }
    }
}

/// Notification for observers (UI progress, error banners)
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    AssetUploaded {
        session_id: String,
        asset_id: String,
    },
    SessionCompleted {
        session_id: String,
        public_url: Option<String>,
    },
    /// `session_id` is `None` for worker-level failures
    Failed {
        session_id: Option<String>,
        asset_id: Option<String>,
        error: ApiError,
    },
}

impl WorkerEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            WorkerEvent::AssetUploaded { session_id, .. }
            | WorkerEvent::SessionCompleted { session_id, .. } => Some(session_id),
            WorkerEvent::Failed { session_id, .. } => session_id.as_deref(),
        }
    }
}

/// Outcome counters of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub uploaded: usize,
    pub failed: usize,
    pub completed_sessions: usize,
}

impl PassStats {
    fn absorb(&mut self, other: PassStats) {
        self.uploaded += other.uploaded;
        self.failed += other.failed;
        self.completed_sessions += other.completed_sessions;
    }
}

const EVENT_CAPACITY: usize = 256;

pub struct UploadWorker<T> {
    store: Arc<QueueStore>,
    pi: Arc<PiApi<T>>,
    relay: Option<Arc<WorkerApi<T>>>,
    config: WorkerConfig,
    events: broadcast::Sender<WorkerEvent>,
    wake: Notify,
    cancel: CancellationToken,
    /// Set once the first pass of this process has recovered the queue
    launched: AtomicBool,
    /// Held for the duration of a pass
    pass: Mutex<()>,
}

impl<T: HttpTransport + 'static> UploadWorker<T> {
    pub fn new(
        store: Arc<QueueStore>,
        pi: Arc<PiApi<T>>,
        relay: Option<Arc<WorkerApi<T>>>,
        config: WorkerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            pi,
            relay,
            config,
            events,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            launched: AtomicBool::new(false),
            pass: Mutex::new(()),
        }
    }

    /// Share a shutdown token with the API clients so retries stop together
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Register an observer
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Stop the run loop and any retry loop sharing the token
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Persist a freshly captured session and wake the worker
    pub async fn enqueue(&self, mut session: UploadSession) -> QueueResult<()> {
        for asset in &mut session.assets {
            asset.state = AssetState::Pending;
            asset.attempts = 0;
            asset.last_error = None;
        }
        session.strategy = self.config.strategy;
        let (manifest, complete) = match session.strategy {
            UploadStrategy::Direct => (StepState::Pending, StepState::NotRequired),
            UploadStrategy::Presigned => (StepState::NotRequired, StepState::Pending),
        };
        session.manifest_state = manifest;
        session.complete_state = complete;

        self.store.add_session(session).await?;
        self.wake.notify_one();
        Ok(())
    }

    /// Move every failed asset and session step back to pending
    pub async fn retry_failed(&self) -> QueueResult<usize> {
        let count = self
            .store
            .update_all(|session| {
                let mut changed = 0;
                for asset in &mut session.assets {
                    if asset.state == AssetState::Failed {
                        asset.state = AssetState::Pending;
                        changed += 1;
                    }
                }
                for step in [&mut session.manifest_state, &mut session.complete_state] {
                    if *step == StepState::Failed {
                        *step = StepState::Pending;
                        changed += 1;
                    }
                }
                changed
            })
            .await?;
        log::info!("Re-queued {} failed uploads", count);
        self.wake.notify_one();
        Ok(count)
    }

    /// Run passes until shut down
    pub async fn run(self: Arc<Self>) {
        log::info!(
            "Upload worker started ({:?}, polling every {:?})",
            self.config.strategy,
            self.config.poll_interval
        );

        while !self.cancel.is_cancelled() {
            match self.process_pending().await {
                Ok(stats) if stats != PassStats::default() => {
                    log::info!("Upload pass completed: {:?}", stats);
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("Upload pass failed: {}", e);
                    self.emit(WorkerEvent::Failed {
                        session_id: None,
                        asset_id: None,
                        error: e.to_api_error(),
                    });
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        log::info!("Upload worker stopped");
    }

    /// One pass over every queued session
    pub async fn process_pending(self: &Arc<Self>) -> QueueResult<PassStats> {
        let _pass = self.pass.lock().await;
        let first_pass = !self.launched.load(Ordering::SeqCst);

        self.recover_orphaned_uploads().await?;
        self.launched.store(true, Ordering::SeqCst);

        let mut stats = PassStats::default();
        for session in self.store.list_sessions().await? {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.process_session(&session.id, first_pass).await {
                Ok(session_stats) => stats.absorb(session_stats),
                Err(e) => {
                    log::error!("Session {}: {}", session.id, e);
                    self.emit(WorkerEvent::Failed {
                        session_id: Some(session.id.clone()),
                        asset_id: None,
                        error: e.to_api_error(),
                    });
                }
            }
        }
        Ok(stats)
    }

    /// `uploading` -> `pending` for every asset no task is working on
    async fn recover_orphaned_uploads(&self) -> QueueResult<()> {
        let orphaned = self
            .store
            .list_sessions()
            .await?
            .iter()
            .any(|s| s.count_in_state(AssetState::Uploading) > 0);
        if !orphaned {
            return Ok(());
        }

        let recovered = self
            .store
            .update_all(|session| {
                let mut reset = 0;
                for asset in &mut session.assets {
                    if asset.state == AssetState::Uploading {
                        asset.state = AssetState::Pending;
                        reset += 1;
                    }
                }
                reset
            })
            .await?;
        if recovered > 0 {
            log::warn!("Reset {} interrupted uploads to pending", recovered);
        }
        Ok(())
    }

    fn retry_eligible(&self, first_pass: bool) -> bool {
        first_pass || self.config.failed_policy == FailedAssetPolicy::EveryPass
    }

    fn asset_eligible(&self, state: AssetState, first_pass: bool) -> bool {
        match state {
            AssetState::Pending => true,
            AssetState::Failed => self.retry_eligible(first_pass),
            AssetState::Uploading | AssetState::Uploaded => false,
        }
    }

    fn step_eligible(&self, state: StepState, first_pass: bool) -> bool {
        match state {
            StepState::Pending => true,
            StepState::Failed => self.retry_eligible(first_pass),
            StepState::Done | StepState::NotRequired => false,
        }
    }

    async fn process_session(
        self: &Arc<Self>,
        session_id: &str,
        first_pass: bool,
    ) -> QueueResult<PassStats> {
        let mut stats = PassStats::default();
        let Some(mut session) = self.store.get_session(session_id).await? else {
            return Ok(stats);
        };

        if !session.manifest_state.is_settled() {
            if !self.step_eligible(session.manifest_state, first_pass) {
                return Ok(stats);
            }
            session = self.submit_manifest(session).await?;
            if !session.manifest_state.is_settled() {
                return Ok(stats);
            }
        }

        let eligible: Vec<String> = session
            .assets
            .iter()
            .filter(|a| self.asset_eligible(a.state, first_pass))
            .map(|a| a.id.clone())
            .collect();

        let limit = self.config.max_concurrent_uploads.max(1);
        let mut join_set = JoinSet::new();
        for asset_id in eligible {
            while join_set.len() >= limit {
                if let Some(result) = join_set.join_next().await {
                    self.tally(session_id, result, &mut stats);
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }
            let worker = Arc::clone(self);
            let session_id = session_id.to_string();
            join_set.spawn(async move { worker.upload_asset(&session_id, &asset_id).await });
        }
        while let Some(result) = join_set.join_next().await {
            self.tally(session_id, result, &mut stats);
        }

        let Some(mut session) = self.store.get_session(session_id).await? else {
            return Ok(stats);
        };

        if session.all_uploaded()
            && !session.complete_state.is_settled()
            && self.step_eligible(session.complete_state, first_pass)
        {
            session = self.submit_complete(session).await?;
        }

        if session.is_finished() {
            self.store.remove_session(session_id).await?;
            log::info!(
                "Session {} finished, gallery: {}",
                session_id,
                session.public_url.as_deref().unwrap_or("-")
            );
            stats.completed_sessions += 1;
            self.emit(WorkerEvent::SessionCompleted {
                session_id: session_id.to_string(),
                public_url: session.public_url,
            });
        }

        Ok(stats)
    }

    fn tally(
        &self,
        session_id: &str,
        result: Result<QueueResult<bool>, tokio::task::JoinError>,
        stats: &mut PassStats,
    ) {
        match result {
            Ok(Ok(true)) => stats.uploaded += 1,
            Ok(Ok(false)) => stats.failed += 1,
            Ok(Err(e)) => {
                stats.failed += 1;
                log::error!("Session {}: could not record upload: {}", session_id, e);
                self.emit(WorkerEvent::Failed {
                    session_id: Some(session_id.to_string()),
                    asset_id: None,
                    error: e.to_api_error(),
                });
            }
            Err(e) => {
                stats.failed += 1;
                log::error!("Session {}: upload task aborted: {}", session_id, e);
            }
        }
    }

    /// Upload one asset and record the outcome; `Ok(true)` once uploaded
    async fn upload_asset(&self, session_id: &str, asset_id: &str) -> QueueResult<bool> {
        let session = self
            .store
            .update_session(session_id, |s| {
                if let Some(asset) = s.asset_mut(asset_id) {
                    asset.state = AssetState::Uploading;
                    asset.attempts += 1;
                }
            })
            .await?;
        let Some(asset) = session.asset(asset_id).cloned() else {
            return Ok(false);
        };

        log::info!(
            "Uploading {} {} of session {} (pass {})",
            asset.kind.as_str(),
            asset.file_name,
            session_id,
            asset.attempts
        );

        match self.transfer_asset(&session, &asset).await {
            Ok(remote_key) => {
                self.store
                    .update_session(session_id, |s| {
                        if let Some(a) = s.asset_mut(asset_id) {
                            a.state = AssetState::Uploaded;
                            a.last_error = None;
                            if let Some(key) = remote_key {
                                a.remote_path = key;
                            }
                        }
                    })
                    .await?;
                log::info!("Uploaded {} of session {}", asset.file_name, session_id);
                self.emit(WorkerEvent::AssetUploaded {
                    session_id: session_id.to_string(),
                    asset_id: asset_id.to_string(),
                });
                Ok(true)
            }
            Err(ApiError::Cancelled) => {
                self.store
                    .update_session(session_id, |s| {
                        if let Some(a) = s.asset_mut(asset_id) {
                            a.state = AssetState::Pending;
                        }
                    })
                    .await?;
                Ok(false)
            }
            Err(e) => {
                log::warn!(
                    "Upload of {} in session {} failed: {}",
                    asset.file_name,
                    session_id,
                    e
                );
                let message = e.to_string();
                self.store
                    .update_session(session_id, |s| {
                        if let Some(a) = s.asset_mut(asset_id) {
                            a.state = AssetState::Failed;
                            a.last_error = Some(message);
                        }
                    })
                    .await?;
                self.emit(WorkerEvent::Failed {
                    session_id: Some(session_id.to_string()),
                    asset_id: Some(asset_id.to_string()),
                    error: e,
                });
                Ok(false)
            }
        }
    }

    /// Moves the bytes; returns the remote key when the backend chose one
    async fn transfer_asset(
        &self,
        session: &UploadSession,
        asset: &UploadAsset,
    ) -> ApiResult<Option<String>> {
        let bytes = tokio::fs::read(&asset.local_path).await.map_err(|e| {
            ApiError::UploadFailed(format!(
                "cannot read {}: {}",
                asset.local_path.display(),
                e
            ))
        })?;
        let bytes = Bytes::from(bytes);

        match session.strategy {
            UploadStrategy::Direct => {
                let metadata = direct_metadata(session, asset);
                self.pi
                    .upload_asset(
                        &session.id,
                        bytes,
                        &asset.file_name,
                        &asset.mime_type,
                        &metadata,
                    )
                    .await?;
                Ok(None)
            }
            UploadStrategy::Presigned => {
                let relay = self.relay()?;
                let destination = relay
                    .presign(&PresignRequest {
                        session_id: session.id.clone(),
                        event_id: session.event_id.clone(),
                        asset_id: asset.id.clone(),
                        file_name: asset.file_name.clone(),
                        mime_type: asset.mime_type.clone(),
                        size_bytes: asset.size_bytes,
                        key: asset.remote_path.clone(),
                    })
                    .await?;
                relay
                    .transfer(&destination, bytes, &asset.mime_type)
                    .await?;
                Ok(Some(destination.key))
            }
        }
    }

    fn relay(&self) -> ApiResult<&WorkerApi<T>> {
        self.relay.as_deref().ok_or_else(|| {
            ApiError::InvalidConfiguration("presigned uploads need a relay address".to_string())
        })
    }

    /// Register the session with the Pi API (direct strategy)
    async fn submit_manifest(&self, session: UploadSession) -> QueueResult<UploadSession> {
        let request = CreateSessionRequest {
            session_id: session.id.clone(),
            event_id: session.event_id.clone(),
            created_at: session.created_at.to_rfc3339(),
            asset_count: session.assets.len(),
        };

        match self.pi.create_session(&request).await {
            Ok(descriptor) => {
                log::info!("Registered session {}", session.id);
                self.store
                    .update_session(&session.id, |s| {
                        s.manifest_state = StepState::Done;
                        if descriptor.public_url.is_some() {
                            s.public_url = descriptor.public_url;
                        }
                    })
                    .await
            }
            Err(ApiError::Cancelled) => Ok(session),
            Err(e) => {
                log::warn!("Registering session {} failed: {}", session.id, e);
                self.emit(WorkerEvent::Failed {
                    session_id: Some(session.id.clone()),
                    asset_id: None,
                    error: e,
                });
                self.store
                    .update_session(&session.id, |s| s.manifest_state = StepState::Failed)
                    .await
            }
        }
    }

    /// Report the transferred objects to the relay (presigned strategy)
    async fn submit_complete(&self, session: UploadSession) -> QueueResult<UploadSession> {
        let outcome = match self.relay() {
            Ok(relay) => relay.complete(&complete_request(&session)).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => {
                log::info!("Finalized session {}", session.id);
                self.store
                    .update_session(&session.id, |s| {
                        s.complete_state = StepState::Done;
                        if response.public_url.is_some() {
                            s.public_url = response.public_url;
                        }
                    })
                    .await
            }
            Err(ApiError::Cancelled) => Ok(session),
            Err(e) => {
                log::warn!("Finalizing session {} failed: {}", session.id, e);
                self.emit(WorkerEvent::Failed {
                    session_id: Some(session.id.clone()),
                    asset_id: None,
                    error: e,
                });
                self.store
                    .update_session(&session.id, |s| s.complete_state = StepState::Failed)
                    .await
            }
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Form fields sent alongside the file in a direct upload
fn direct_metadata(session: &UploadSession, asset: &UploadAsset) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::from([
        ("assetId".to_string(), asset.id.clone()),
        ("eventId".to_string(), session.event_id.clone()),
        ("kind".to_string(), asset.kind.as_str().to_string()),
        ("stripIndex".to_string(), asset.strip_index.to_string()),
        ("sequenceIndex".to_string(), asset.sequence_index.to_string()),
        ("remotePath".to_string(), asset.remote_path.clone()),
        ("sizeBytes".to_string(), asset.size_bytes.to_string()),
    ]);
    if let Some(duration) = asset.duration_seconds {
        metadata.insert("durationSeconds".to_string(), duration.to_string());
    }
    if let Some(poster) = &asset.poster_path {
        metadata.insert("posterPath".to_string(), poster.clone());
    }
    metadata
}

fn complete_request(session: &UploadSession) -> CompleteRequest {
    CompleteRequest {
        session_id: session.id.clone(),
        event_id: session.event_id.clone(),
        assets: session
            .assets
            .iter()
            .map(|a| CompletedAsset {
                asset_id: a.id.clone(),
                key: a.remote_path.clone(),
                kind: a.kind.as_str().to_string(),
                mime_type: a.mime_type.clone(),
                size_bytes: a.size_bytes,
                strip_index: a.strip_index,
                sequence_index: a.sequence_index,
                duration_seconds: a.duration_seconds,
                poster_key: a.poster_path.clone(),
            })
            .collect(),
    }
}
