//! Turning finished captures into queue sessions

use crate::error::{QueueError, QueueResult};
use crate::models::{AssetKind, AssetState, UploadAsset, UploadSession};
use std::path::{Path, PathBuf};

/// A file produced by the camera for one capture session
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFile {
    pub path: PathBuf,
    /// Print strip the file belongs to
    pub strip_index: u32,
    pub duration_seconds: Option<f64>,
    pub poster_path: Option<String>,
}

impl CapturedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strip_index: 0,
            duration_seconds: None,
            poster_path: None,
        }
    }
}

/// Media kind and MIME type from the file extension
pub fn classify(path: &Path) -> Option<(AssetKind, &'static str)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some((AssetKind::Photo, "image/jpeg")),
        "png" => Some((AssetKind::Photo, "image/png")),
        "heic" => Some((AssetKind::Photo, "image/heic")),
        "gif" => Some((AssetKind::Photo, "image/gif")),
        "mp4" | "m4v" => Some((AssetKind::Video, "video/mp4")),
        "mov" => Some((AssetKind::Video, "video/quicktime")),
        _ => None,
    }
}

/// Remote destination of a file inside a session
pub fn remote_path(event_id: &str, session_id: &str, file_name: &str) -> String {
    format!("events/{}/{}/{}", event_id, session_id, file_name)
}

/// Build a pending session from captured files, in capture order
///
/// Sizes are read from the file system, so every file must exist.
pub async fn session_from_capture(
    event_id: &str,
    files: &[CapturedFile],
) -> QueueResult<UploadSession> {
    let mut session = UploadSession::new(event_id, Vec::with_capacity(files.len()));

    for (index, file) in files.iter().enumerate() {
        let (kind, mime_type) = classify(&file.path)
            .ok_or_else(|| QueueError::UnsupportedFile(file.path.display().to_string()))?;
        let file_name = file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| QueueError::UnsupportedFile(file.path.display().to_string()))?
            .to_string();
        let metadata = tokio::fs::metadata(&file.path).await?;

        session.assets.push(UploadAsset {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            strip_index: file.strip_index,
            sequence_index: index as u32,
            remote_path: remote_path(event_id, &session.id, &file_name),
            file_name,
            mime_type: mime_type.to_string(),
            local_path: file.path.clone(),
            size_bytes: metadata.len(),
            duration_seconds: file.duration_seconds,
            poster_path: file.poster_path.clone(),
            state: AssetState::Pending,
            attempts: 0,
            last_error: None,
        });
    }

    log::debug!(
        "Built session {} for event {} from {} files",
        session.id,
        event_id,
        session.assets.len()
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(Path::new("/c/IMG_1.JPG")),
            Some((AssetKind::Photo, "image/jpeg"))
        );
        assert_eq!(
            classify(Path::new("boomerang.mov")),
            Some((AssetKind::Video, "video/quicktime"))
        );
        assert_eq!(classify(Path::new("notes.txt")), None);
        assert_eq!(classify(Path::new("no_extension")), None);
    }

    #[tokio::test]
    async fn test_session_from_capture() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("shot1.jpg");
        let video = dir.path().join("clip.mp4");
        std::fs::write(&photo, b"jpegdata").unwrap();
        std::fs::write(&video, b"mp4").unwrap();

        let mut clip = CapturedFile::new(&video);
        clip.strip_index = 1;
        clip.duration_seconds = Some(3.5);
        let session = session_from_capture("e1", &[CapturedFile::new(&photo), clip])
            .await
            .unwrap();

        assert_eq!(session.event_id, "e1");
        assert_eq!(session.assets.len(), 2);
        assert_eq!(session.assets[0].size_bytes, 8);
        assert_eq!(session.assets[0].sequence_index, 0);
        assert_eq!(
            session.assets[0].remote_path,
            format!("events/e1/{}/shot1.jpg", session.id)
        );
        assert_eq!(session.assets[1].kind, AssetKind::Video);
        assert_eq!(session.assets[1].strip_index, 1);
        assert_eq!(session.assets[1].sequence_index, 1);
        assert!(session.assets.iter().all(|a| a.state == AssetState::Pending));
        assert_eq!(session.duplicate_asset_id(), None);
    }

    #[tokio::test]
    async fn test_unsupported_file_is_rejected() {
        let result = session_from_capture("e1", &[CapturedFile::new("/tmp/readme.txt")]).await;
        assert!(matches!(result, Err(QueueError::UnsupportedFile(_))));
    }
}
