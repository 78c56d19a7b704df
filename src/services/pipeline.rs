use crate::error::AppError;
use crate::settings::UploaderSettings;
use booth_client::{ApiClient, PiApi, ReqwestTransport, WorkerApi};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use upload_queue::{QueueStore, UploadStrategy, UploadWorker};

/// Everything a command needs, wired from the settings
pub struct Pipeline {
    pub store: Arc<QueueStore>,
    pub pi: Arc<PiApi<ReqwestTransport>>,
    pub worker: Arc<UploadWorker<ReqwestTransport>>,
}

impl Pipeline {
    pub fn build(settings: &UploaderSettings, data_dir: &Path) -> Result<Self, AppError> {
        let cancel = CancellationToken::new();
        let transport = Arc::new(ReqwestTransport::new(&settings.user_agent)?);

        let pi_client = ApiClient::new(transport.clone(), settings.pi_client_config())
            .with_cancellation(cancel.clone());
        let pi = Arc::new(PiApi::new(pi_client));

        let relay = match settings.relay_client_config() {
            Some(config) => {
                let client = ApiClient::new(transport, config).with_cancellation(cancel.clone());
                Some(Arc::new(WorkerApi::new(client, settings.worker_key.clone())))
            }
            None if settings.strategy == UploadStrategy::Presigned => {
                return Err(AppError::Config(
                    "the presigned strategy needs relay_base_url".to_string(),
                ));
            }
            None => None,
        };
        if settings.strategy == UploadStrategy::Presigned && settings.worker_key.is_none() {
            log::warn!("No worker key configured, presigned uploads will fail");
        }

        let store = Arc::new(QueueStore::in_dir(data_dir));
        let worker = Arc::new(
            UploadWorker::new(store.clone(), pi.clone(), relay, settings.worker_config())
                .with_cancellation(cancel),
        );

        Ok(Self { store, pi, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presigned_without_relay_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = UploaderSettings {
            strategy: UploadStrategy::Presigned,
            ..UploaderSettings::default()
        };
        assert!(matches!(
            Pipeline::build(&settings, dir.path()),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_queue_lives_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::build(&UploaderSettings::default(), dir.path()).unwrap();
        assert_eq!(
            pipeline.store.path(),
            dir.path().join(upload_queue::QUEUE_FILE_NAME)
        );
    }
}
