pub mod engine;
pub mod progress;
pub mod yt_dlp;

pub use engine::{DownloadEngine, ProgressSink};
pub use yt_dlp::*;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app_state::{
    DownloadOutcome, DownloadRequest, ProgressEvent, Session, events::AppEvent,
};
use crate::error::{DownloadFailure, SubmitError};

/// How long a finished download stays on screen before the form resets
pub const RESET_DELAY: Duration = Duration::from_secs(3);

/// How long `shutdown` waits for a cancelled worker
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct ActiveDownload {
    id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single download slot.
///
/// Lives on the main loop; the worker only reports back through `AppEvent`s.
pub struct DownloadController {
    engine: Arc<dyn DownloadEngine>,
    /// Channel to send app events
    app_tx: mpsc::UnboundedSender<AppEvent>,
    session: Session,
    active: Option<ActiveDownload>,
}

impl DownloadController {
    pub fn new(engine: Arc<dyn DownloadEngine>, app_tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            engine,
            app_tx,
            session: Session::default(),
            active: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Validate a request and hand it to a fresh worker.
    ///
    /// Rejected with `Busy` while another download is running.
    pub fn submit(&mut self, request: DownloadRequest) -> Result<Uuid, SubmitError> {
        if self.is_running() {
            warn!("download rejected: another download is running");
            return Err(SubmitError::Busy);
        }
        request.validate()?;

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        info!(
            session = %id,
            engine = self.engine.name(),
            url = %request.url,
            resolution = %request.resolution,
            destination = %request.destination.display(),
            "starting download"
        );

        let handle = spawn_worker(
            self.engine.clone(),
            id,
            request.clone(),
            cancel.clone(),
            self.app_tx.clone(),
        );
        self.session = Session::running(id, request);
        self.active = Some(ActiveDownload { id, cancel, handle });
        Ok(id)
    }

    /// Ask the running worker to stop. Returns false when there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        match &self.active {
            Some(active) if self.session.is_running() && !self.session.cancel_requested => {
                info!(session = %active.id, "cancelling download");
                active.cancel.cancel();
                self.session.cancel_requested = true;
                true
            }
            _ => false,
        }
    }

    pub fn on_progress(&mut self, id: Uuid, progress: ProgressEvent) {
        if !self.is_current(id) {
            debug!(session = %id, "dropping progress for inactive session");
            return;
        }
        let percent = progress.percent.max(self.session.progress.percent);
        self.session.progress = ProgressEvent { percent, ..progress };
    }

    pub fn on_status(&mut self, id: Uuid, message: String) {
        if self.is_current(id) {
            self.session.status = Some(message);
        }
    }

    pub fn on_outcome(&mut self, id: Uuid, outcome: DownloadOutcome) {
        if !self.is_current(id) {
            debug!(session = %id, "dropping outcome for inactive session");
            return;
        }

        match &outcome {
            DownloadOutcome::Success(path) => {
                info!(session = %id, file = %path.display(), "download complete")
            }
            DownloadOutcome::Failed(failure) => {
                warn!(session = %id, kind = ?failure.kind(), error = %failure, "download failed")
            }
            DownloadOutcome::Cancelled => info!(session = %id, "download cancelled"),
        }

        self.active = None;
        self.session.finish(outcome, Instant::now());
    }

    /// Return to Idle once a finished session has been shown long enough
    pub fn tick(&mut self, now: Instant) {
        let expired = self
            .session
            .finished_at
            .is_some_and(|at| now.saturating_duration_since(at) >= RESET_DELAY);
        if self.session.phase.is_terminal() && expired {
            self.session = Session::default();
        }
    }

    /// Cancel any running worker and give it a moment to clean up
    pub async fn shutdown(&mut self) {
        let Some(active) = self.active.take() else { return };
        active.cancel.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, active.handle).await {
            Ok(_) => info!(session = %active.id, "worker stopped"),
            Err(_) => warn!(session = %active.id, "worker did not stop in time"),
        }
    }

    fn is_current(&self, id: Uuid) -> bool {
        self.active.as_ref().map(|a| a.id) == Some(id)
    }
}

/// Run the engine on its own task and always report exactly one outcome
fn spawn_worker(
    engine: Arc<dyn DownloadEngine>,
    id: Uuid,
    request: DownloadRequest,
    cancel: CancellationToken,
    app_tx: mpsc::UnboundedSender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let progress = ProgressSink::new(id, app_tx.clone());
        let run = tokio::spawn(async move { engine.run(request, progress, cancel).await });

        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session = %id, error = %e, "download worker crashed");
                DownloadOutcome::Failed(DownloadFailure::Engine(format!(
                    "download worker stopped unexpectedly: {}",
                    e
                )))
            }
        };
        let _ = app_tx.send(AppEvent::Finished { id, outcome });
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the fake engine does once started
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Emit the given percents, then succeed with `file`
        Succeed { percents: Vec<f64>, file: PathBuf },
        /// Emit one tick, then wait until cancelled
        WaitForCancel,
        Fail(DownloadFailure),
        Panic,
    }

    pub struct FakeEngine {
        script: Script,
        runs: AtomicUsize,
    }

    impl FakeEngine {
        pub fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                runs: AtomicUsize::new(0),
            })
        }

        pub fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DownloadEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn run(
            &self,
            _request: DownloadRequest,
            progress: ProgressSink,
            cancel: CancellationToken,
        ) -> DownloadOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Succeed { percents, file } => {
                    for percent in percents {
                        progress.emit(ProgressEvent {
                            percent: *percent,
                            ..ProgressEvent::default()
                        });
                    }
                    DownloadOutcome::Success(file.clone())
                }
                Script::WaitForCancel => {
                    progress.emit(ProgressEvent {
                        percent: 12.5,
                        ..ProgressEvent::default()
                    });
                    cancel.cancelled().await;
                    DownloadOutcome::Cancelled
                }
                Script::Fail(failure) => DownloadOutcome::Failed(failure.clone()),
                Script::Panic => panic!("engine blew up"),
            }
        }
    }
}
