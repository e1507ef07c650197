use thiserror::Error;

/// Reasons a request is rejected before any worker starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("Please enter a video URL")]
    EmptyUrl,
    #[error("Not a valid http(s) URL: {0}")]
    MalformedUrl(String),
    #[error("Please choose a destination folder")]
    EmptyDestination,
    #[error("Destination folder does not exist: {0}")]
    DestinationMissing(String),
    #[error("Destination is not a folder: {0}")]
    DestinationNotDirectory(String),
    #[error("Destination folder is not writable: {0}")]
    DestinationNotWritable(String),
}

/// Errors returned by `DownloadController::submit`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error("A download is already running. Cancel it or wait for it to finish.")]
    Busy,
}

/// Coarse classification of a failed download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, extraction or unsupported-video errors from the engine
    EngineFailure,
    /// The media-processing tool could not be found or run
    ToolMissing,
}

/// Why a dispatched download ended in failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadFailure {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),
    #[error("Content unavailable: {0}")]
    Unavailable(String),
    #[error("Age-restricted content: {0}")]
    AgeRestricted(String),
    #[error("Format not available: {0}")]
    FormatUnavailable(String),
    #[error("Cannot write output: {0}")]
    PermissionDenied(String),
    #[error("Download engine not found: {0}")]
    EngineMissing(String),
    #[error("ffmpeg is required but was not found: {0}")]
    ToolMissing(String),
    #[error("Download engine error: {0}")]
    Engine(String),
}

impl DownloadFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadFailure::ToolMissing(_) => FailureKind::ToolMissing,
            _ => FailureKind::EngineFailure,
        }
    }
}

/// Bad startup configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value `{value}`: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("Could not determine a location for the log file")]
    NoLogLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind() {
        assert_eq!(
            DownloadFailure::ToolMissing("ffmpeg".into()).kind(),
            FailureKind::ToolMissing
        );
        assert_eq!(
            DownloadFailure::Network("timed out".into()).kind(),
            FailureKind::EngineFailure
        );
        assert_eq!(
            DownloadFailure::EngineMissing("yt-dlp".into()).kind(),
            FailureKind::EngineFailure
        );
    }

    #[test]
    fn test_invalid_input_converts_into_submit_error() {
        let err: SubmitError = InvalidInput::EmptyUrl.into();
        assert_eq!(err, SubmitError::InvalidInput(InvalidInput::EmptyUrl));
    }
}
