use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app_state::{DownloadOutcome, DownloadRequest, ProgressEvent, events::AppEvent};

/// Something that can carry out a download request off the UI loop
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Name of the engine (for logging)
    fn name(&self) -> &'static str;

    /// Run a request to completion.
    ///
    /// Progress goes through `progress`. `cancel` must be observed at every
    /// await point; once it fires the engine stops its work and returns
    /// `DownloadOutcome::Cancelled`.
    async fn run(
        &self,
        request: DownloadRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> DownloadOutcome;
}

/// Forwards worker events for one session to the main loop
#[derive(Debug, Clone)]
pub struct ProgressSink {
    id: Uuid,
    app_tx: mpsc::UnboundedSender<AppEvent>,
}

impl ProgressSink {
    pub fn new(id: Uuid, app_tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { id, app_tx }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns false once the main loop has gone away
    pub fn emit(&self, progress: ProgressEvent) -> bool {
        self.app_tx
            .send(AppEvent::Progress {
                id: self.id,
                progress,
            })
            .is_ok()
    }

    pub fn status(&self, message: impl Into<String>) {
        let _ = self.app_tx.send(AppEvent::Status {
            id: self.id,
            message: message.into(),
        });
    }
}
