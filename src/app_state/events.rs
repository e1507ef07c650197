use crate::app_state::{DownloadOutcome, DownloadRequest, ProgressEvent};
use uuid::Uuid;

/// Events the download worker sends back to the main loop
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Update download progress
    Progress { id: Uuid, progress: ProgressEvent },
    /// Human-readable status from the engine
    Status { id: Uuid, message: String },
    /// The worker reached a terminal outcome
    Finished { id: Uuid, outcome: DownloadOutcome },
}

/// Input events from the terminal
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// Key was pressed
    Key(crossterm::event::KeyEvent),
    /// Mouse event
    Mouse(crossterm::event::MouseEvent),
    /// Terminal was resized
    Resize(u16, u16),
}

/// Actions the interface asks the download controller to perform
#[derive(Debug, Clone)]
pub enum DownloadAction {
    /// Validate and dispatch a new request
    Start(DownloadRequest),
    /// Cancel the running download, if any
    Cancel,
}
