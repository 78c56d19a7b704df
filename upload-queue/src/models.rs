use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Kind of captured media
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Photo,
    Video,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Photo => "photo",
            AssetKind::Video => "video",
        }
    }
}

/// Upload state of a single asset
///
/// `pending -> uploading -> uploaded | failed`, and `failed -> uploading` on
/// a later pass. Only `uploaded` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl AssetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssetState::Uploaded)
    }
}

/// State of a session-level step (manifest submission, finalize call)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StepState {
    Pending,
    Done,
    Failed,
    /// The configured upload strategy has no such step
    NotRequired,
}

impl StepState {
    /// Nothing left to do for this step
    pub fn is_settled(&self) -> bool {
        matches!(self, StepState::Done | StepState::NotRequired)
    }
}

/// How asset bytes reach the backend; fixed per session when it is queued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// Multipart `POST /sessions/{id}/assets` to the Pi API
    #[default]
    Direct,
    /// `presign`, transfer to the presigned URL, then `complete` per session
    Presigned,
}

/// One physical file to upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadAsset {
    pub id: String,
    pub kind: AssetKind,
    pub strip_index: u32,
    pub sequence_index: u32,
    pub file_name: String,
    pub mime_type: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Remote path of the video's poster image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    pub state: AssetState,
    /// Upload passes started for this asset
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One capture session's worth of assets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: String,
    pub event_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub public_url: Option<String>,
    pub assets: Vec<UploadAsset>,
    #[serde(default)]
    pub strategy: UploadStrategy,
    pub manifest_state: StepState,
    pub complete_state: StepState,
}

impl UploadSession {
    /// New session with a fresh id and every step pending
    pub fn new(event_id: impl Into<String>, assets: Vec<UploadAsset>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            created_at: Utc::now(),
            public_url: None,
            assets,
            strategy: UploadStrategy::Direct,
            manifest_state: StepState::Pending,
            complete_state: StepState::Pending,
        }
    }

    pub fn asset(&self, asset_id: &str) -> Option<&UploadAsset> {
        self.assets.iter().find(|a| a.id == asset_id)
    }

    pub fn asset_mut(&mut self, asset_id: &str) -> Option<&mut UploadAsset> {
        self.assets.iter_mut().find(|a| a.id == asset_id)
    }

    pub fn all_uploaded(&self) -> bool {
        self.assets.iter().all(|a| a.state.is_terminal())
    }

    /// Every asset uploaded and every session step settled
    pub fn is_finished(&self) -> bool {
        self.all_uploaded() && self.manifest_state.is_settled() && self.complete_state.is_settled()
    }

    pub fn count_in_state(&self, state: AssetState) -> usize {
        self.assets.iter().filter(|a| a.state == state).count()
    }

    /// First asset id that appears more than once
    pub fn duplicate_asset_id(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.assets
            .iter()
            .map(|a| a.id.as_str())
            .find(|id| !seen.insert(*id))
    }
}

/// Full persisted state of the queue
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    #[serde(default)]
    pub sessions: Vec<UploadSession>,
}

impl QueueSnapshot {
    pub fn session(&self, session_id: &str) -> Option<&UploadSession> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn position(&self, session_id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == session_id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn asset(id: &str, sequence_index: u32) -> UploadAsset {
        UploadAsset {
            id: id.to_string(),
            kind: AssetKind::Photo,
            strip_index: 0,
            sequence_index,
            file_name: format!("{}.jpg", id),
            mime_type: "image/jpeg".to_string(),
            local_path: PathBuf::from(format!("/tmp/{}.jpg", id)),
            remote_path: format!("events/e1/s1/{}.jpg", id),
            size_bytes: 4,
            duration_seconds: None,
            poster_path: None,
            state: AssetState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn session(id: &str, asset_ids: &[&str]) -> UploadSession {
        let mut session = UploadSession::new(
            "e1",
            asset_ids
                .iter()
                .enumerate()
                .map(|(i, a)| asset(a, i as u32))
                .collect(),
        );
        session.id = id.to_string();
        session
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_state_wire_names() {
        assert_eq!(serde_json::to_string(&AssetState::Uploading).unwrap(), "\"uploading\"");
        assert_eq!(serde_json::to_string(&StepState::NotRequired).unwrap(), "\"notRequired\"");
        assert_eq!(serde_json::to_string(&AssetKind::Video).unwrap(), "\"video\"");
        assert_eq!(
            serde_json::to_string(&UploadStrategy::Presigned).unwrap(),
            "\"presigned\""
        );
    }

    #[test]
    fn test_only_uploaded_is_terminal() {
        assert!(AssetState::Uploaded.is_terminal());
        assert!(!AssetState::Failed.is_terminal());
        assert!(!AssetState::Pending.is_terminal());
    }

    #[test]
    fn test_duplicate_asset_id() {
        let session = session("s1", &["a", "b", "a"]);
        assert_eq!(session.duplicate_asset_id(), Some("a"));
        assert_eq!(fixtures::session("s2", &["a", "b"]).duplicate_asset_id(), None);
    }

    #[test]
    fn test_is_finished_needs_settled_steps() {
        let mut session = session("s1", &["a"]);
        session.assets[0].state = AssetState::Uploaded;
        session.manifest_state = StepState::Done;
        assert!(!session.is_finished());
        session.complete_state = StepState::NotRequired;
        assert!(session.is_finished());
    }

    #[test]
    fn test_old_snapshot_without_bookkeeping_fields() {
        let json = r#"{"sessions":[{"id":"s1","eventId":"e1","createdAt":"2026-05-01T12:00:00Z",
            "assets":[{"id":"a","kind":"photo","stripIndex":0,"sequenceIndex":0,"fileName":"a.jpg",
            "mimeType":"image/jpeg","localPath":"/tmp/a.jpg","remotePath":"events/e1/s1/a.jpg",
            "sizeBytes":4,"state":"failed"}],"manifestState":"done","completeState":"pending"}]}"#;
        let snapshot: QueueSnapshot = serde_json::from_str(json).unwrap();
        let asset = &snapshot.sessions[0].assets[0];
        assert_eq!(asset.attempts, 0);
        assert_eq!(asset.last_error, None);
        assert_eq!(snapshot.sessions[0].public_url, None);
        assert_eq!(snapshot.sessions[0].strategy, UploadStrategy::Direct);
    }
}
