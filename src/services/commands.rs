use crate::error::AppError;
use crate::filesystem;
use crate::services::pipeline::Pipeline;
use booth_client::EmailRequest;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use upload_queue::{
    session_from_capture, AssetState, CapturedFile, QueueStore, UploadSession, WorkerEvent,
};

/// Drain the queue until Ctrl-C
pub async fn run_worker(pipeline: Pipeline) -> Result<(), AppError> {
    let pending = pipeline.store.count_pending_assets().await?;
    log::info!("{} assets waiting for upload", pending);

    let reporter = tokio::spawn(report_events(pipeline.worker.subscribe()));

    let handle = tokio::spawn(pipeline.worker.clone().run());
    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down upload worker");
    pipeline.worker.shutdown();

    if let Err(e) = handle.await {
        log::error!("Upload worker task failed: {}", e);
    }
    reporter.abort();
    Ok(())
}

async fn report_events(mut events: broadcast::Receiver<WorkerEvent>) -> usize {
    let mut reported = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                log_event(&event);
                reported += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Event log fell behind, {} worker events skipped", skipped);
            }
            Err(RecvError::Closed) => return reported,
        }
    }
}

fn log_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::AssetUploaded {
            session_id,
            asset_id,
        } => log::debug!("Uploaded asset {} of session {}", asset_id, session_id),
        WorkerEvent::SessionCompleted {
            session_id,
            public_url,
        } => log::info!(
            "Session {} delivered {}",
            session_id,
            public_url.as_deref().unwrap_or("")
        ),
        WorkerEvent::Failed {
            session_id, error, ..
        } => log::warn!(
            "Upload problem ({}): {}",
            session_id.as_deref().unwrap_or("worker"),
            error.user_message()
        ),
    }
}

/// Queue the media files of one capture; a directory stands for its contents
pub async fn enqueue_capture(
    pipeline: &Pipeline,
    event_id: &str,
    paths: &[PathBuf],
    strip_index: u32,
) -> Result<String, AppError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(filesystem::capture_files_in(path)?);
        } else {
            files.push(path.clone());
        }
    }
    if files.is_empty() {
        return Err(AppError::Validation("no media files to upload".to_string()));
    }

    let captured: Vec<CapturedFile> = files
        .into_iter()
        .map(|path| CapturedFile {
            strip_index,
            ..CapturedFile::new(path)
        })
        .collect();
    let session = session_from_capture(event_id, &captured).await?;
    let session_id = session.id.clone();
    pipeline.worker.enqueue(session).await?;

    log::info!(
        "Queued session {} with {} files",
        session_id,
        captured.len()
    );
    Ok(session_id)
}

/// One line per queued session
pub fn describe_session(session: &UploadSession) -> String {
    format!(
        "{}  event={}  uploaded={}/{}  failed={}  manifest={:?}  complete={:?}",
        session.id,
        session.event_id,
        session.count_in_state(AssetState::Uploaded),
        session.assets.len(),
        session.count_in_state(AssetState::Failed),
        session.manifest_state,
        session.complete_state
    )
}

/// Reads the queue file directly, so it also works while `run` owns the queue
pub async fn print_status(pipeline: &Pipeline) -> Result<(), AppError> {
    let sessions = QueueStore::read_unlocked(pipeline.store.path())
        .await?
        .sessions;
    if sessions.is_empty() {
        println!("Upload queue is empty");
        return Ok(());
    }
    for session in &sessions {
        println!("{}", describe_session(session));
        for asset in session.assets.iter().filter(|a| a.state == AssetState::Failed) {
            println!(
                "    {} failed after {} tries: {}",
                asset.file_name,
                asset.attempts,
                asset.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

pub async fn retry_failed(pipeline: &Pipeline) -> Result<usize, AppError> {
    Ok(pipeline.worker.retry_failed().await?)
}

/// Drop one session, or every session when `session_id` is `None`
pub async fn purge(pipeline: &Pipeline, session_id: Option<&str>) -> Result<usize, AppError> {
    match session_id {
        Some(id) => {
            if pipeline.store.remove_session(id).await? {
                Ok(1)
            } else {
                Err(AppError::NotFound(format!("Session {}", id)))
            }
        }
        None => {
            let mut removed = 0;
            for session in pipeline.store.list_sessions().await? {
                if pipeline.store.remove_session(&session.id).await? {
                    removed += 1;
                }
            }
            Ok(removed)
        }
    }
}

pub async fn print_events(pipeline: &Pipeline) -> Result<(), AppError> {
    for event in pipeline.pi.list_events().await? {
        println!(
            "{}{}  {}  {}",
            if event.is_active { "* " } else { "  " },
            event.id,
            event.name,
            event.date.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn save_session_qr(
    pipeline: &Pipeline,
    session_id: &str,
    output: &Path,
) -> Result<(), AppError> {
    let image = pipeline.pi.session_qr(session_id).await?;
    tokio::fs::write(output, &image).await?;
    log::info!("Saved QR code for {} to {}", session_id, output.display());
    Ok(())
}

pub async fn email_session(
    pipeline: &Pipeline,
    session_id: &str,
    email: &str,
    message: Option<String>,
) -> Result<(), AppError> {
    if !email.contains('@') {
        return Err(AppError::Validation(format!("invalid e-mail address: {}", email)));
    }
    let request = EmailRequest {
        email: email.to_string(),
        message,
    };
    pipeline.pi.send_email(session_id, &request).await?;
    Ok(())
}
