//! # Upload Queue
//!
//! Reliable delivery of photobooth captures.
//!
//! This crate provides:
//! - The persisted queue model (sessions, assets, step states)
//! - [`QueueStore`], a single JSON file rewritten atomically on every mutation
//! - [`UploadWorker`], which drains the queue through `booth-client`
//! - Helpers to turn captured files into queue sessions
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use upload_queue::{QueueStore, UploadWorker, WorkerConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(QueueStore::in_dir(&data_dir));
//! let worker = Arc::new(UploadWorker::new(store, pi, None, WorkerConfig::default()));
//! worker.enqueue(session).await?;
//! tokio::spawn(worker.clone().run());
//! ```

pub mod error;
pub mod intake;
pub mod models;
pub mod store;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use intake::{classify, session_from_capture, CapturedFile};
pub use models::{
    AssetKind, AssetState, QueueSnapshot, StepState, UploadAsset, UploadSession, UploadStrategy,
};
pub use store::{QueueStore, QUEUE_FILE_NAME};
pub use worker::{FailedAssetPolicy, PassStats, UploadWorker, WorkerConfig, WorkerEvent};
