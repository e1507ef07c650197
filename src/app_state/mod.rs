use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use crate::commands::{DownloadController, is_valid_url};
use crate::error::{DownloadFailure, InvalidInput};

pub mod events;

/// The main application state
pub struct AppState {
    /// Fields the user fills in before starting a download
    pub form: DownloadForm,
    /// Owns the single download session
    pub controller: DownloadController,
    /// Error messages to display
    pub error_message: Option<String>,
    /// Application should exit
    pub should_quit: bool,
}

impl AppState {
    pub fn new(form: DownloadForm, controller: DownloadController) -> Self {
        Self {
            form,
            controller,
            error_message: None,
            should_quit: false,
        }
    }
}

/// Resolution presets offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Best,
    P1080,
    P720,
    P480,
    P360,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Best,
        Resolution::P1080,
        Resolution::P720,
        Resolution::P480,
        Resolution::P360,
    ];

    /// Height ceiling in pixels, `None` for no ceiling
    pub fn max_height(self) -> Option<u32> {
        match self {
            Resolution::Best => None,
            Resolution::P1080 => Some(1080),
            Resolution::P720 => Some(720),
            Resolution::P480 => Some(480),
            Resolution::P360 => Some(360),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max_height() {
            Some(height) => write!(f, "{}p", height),
            None => write!(f, "Best"),
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        if value == "best" {
            return Ok(Resolution::Best);
        }
        let height = value.strip_suffix('p').unwrap_or(&value);
        Resolution::ALL
            .into_iter()
            .find(|r| r.max_height().map(|h| h.to_string()).as_deref() == Some(height))
            .ok_or_else(|| format!("expected one of Best, 1080p, 720p, 480p, 360p; got `{}`", s))
    }
}

/// Whether the user wants the video or only its audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Video,
    Audio,
}

impl MediaType {
    pub const ALL: [MediaType; 2] = [MediaType::Video, MediaType::Audio];
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Video => write!(f, "Video"),
            MediaType::Audio => write!(f, "Audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Aac,
    Wav,
    M4a,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 4] = [
        AudioFormat::Mp3,
        AudioFormat::Aac,
        AudioFormat::Wav,
        AudioFormat::M4a,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Wav => "wav",
            AudioFormat::M4a => "m4a",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioQuality {
    #[default]
    K128,
    K192,
    K256,
    K320,
}

impl AudioQuality {
    pub const ALL: [AudioQuality; 4] = [
        AudioQuality::K128,
        AudioQuality::K192,
        AudioQuality::K256,
        AudioQuality::K320,
    ];

    /// Bitrate in the form yt-dlp's `--audio-quality` expects
    pub fn bitrate(self) -> &'static str {
        match self {
            AudioQuality::K128 => "128K",
            AudioQuality::K192 => "192K",
            AudioQuality::K256 => "256K",
            AudioQuality::K320 => "320K",
        }
    }
}

impl std::fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bitrate().to_ascii_lowercase())
    }
}

/// What the engine should produce for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaKind {
    /// Video remuxed to mp4, limited by the request's resolution
    #[default]
    Video,
    /// Audio track only, converted by ffmpeg
    Audio {
        format: AudioFormat,
        quality: AudioQuality,
    },
}

/// A single download, built from the form when the user presses start
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    pub resolution: Resolution,
    pub destination: PathBuf,
    pub media: MediaKind,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        resolution: Resolution,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            resolution,
            destination: destination.into(),
            media: MediaKind::Video,
        }
    }

    pub fn with_media(mut self, media: MediaKind) -> Self {
        self.media = media;
        self
    }

    /// Check the URL shape and that the destination is an existing, writable folder
    pub fn validate(&self) -> Result<(), InvalidInput> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(InvalidInput::EmptyUrl);
        }
        if !is_valid_url(url) {
            return Err(InvalidInput::MalformedUrl(url.to_string()));
        }

        if self.destination.as_os_str().is_empty() {
            return Err(InvalidInput::EmptyDestination);
        }
        validate_destination(&self.destination)
    }
}

fn validate_destination(dir: &Path) -> Result<(), InvalidInput> {
    let shown = dir.display().to_string();
    let metadata = match fs::metadata(dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(InvalidInput::DestinationMissing(shown));
        }
        Err(_) => return Err(InvalidInput::DestinationNotWritable(shown)),
    };
    if !metadata.is_dir() {
        return Err(InvalidInput::DestinationNotDirectory(shown));
    }

    // Permission bits lie for root and ACLs, so write a probe file instead
    let probe = dir.join(format!(".tubegrab-probe-{}", Uuid::new_v4().simple()));
    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(file) => {
            drop(file);
            if let Err(e) = fs::remove_file(&probe) {
                warn!(path = %probe.display(), error = %e, "could not remove write probe");
            }
            Ok(())
        }
        Err(_) => Err(InvalidInput::DestinationNotWritable(shown)),
    }
}

/// One progress tick reported by the worker
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressEvent {
    /// Overall percentage across every stream of the request, 0-100
    pub percent: f64,
    /// Bytes per second
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
}

impl ProgressEvent {
    pub fn speed_display(&self) -> String {
        match self.speed {
            Some(speed) if speed.is_finite() && speed >= 0.0 => {
                format!("{}/s", format_bytes(speed as u64))
            }
            _ => "N/A".to_string(),
        }
    }

    pub fn eta_display(&self) -> String {
        self.eta
            .map(format_eta)
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Terminal result of a dispatched request
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Success(PathBuf),
    Failed(DownloadFailure),
    Cancelled,
}

/// Lifecycle of the single download slot
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Running,
    Succeeded(PathBuf),
    Failed(DownloadFailure),
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Succeeded(_) | SessionPhase::Failed(_) | SessionPhase::Cancelled
        )
    }
}

impl From<DownloadOutcome> for SessionPhase {
    fn from(outcome: DownloadOutcome) -> Self {
        match outcome {
            DownloadOutcome::Success(path) => SessionPhase::Succeeded(path),
            DownloadOutcome::Failed(failure) => SessionPhase::Failed(failure),
            DownloadOutcome::Cancelled => SessionPhase::Cancelled,
        }
    }
}

/// State of the current (or last) download as shown to the user
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: Option<Uuid>,
    pub phase: SessionPhase,
    pub request: Option<DownloadRequest>,
    pub progress: ProgressEvent,
    /// Engine-provided status text, e.g. the title being downloaded
    pub status: Option<String>,
    pub cancel_requested: bool,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<Instant>,
}

impl Session {
    pub fn running(id: Uuid, request: DownloadRequest) -> Self {
        Self {
            id: Some(id),
            phase: SessionPhase::Running,
            request: Some(request),
            started_at: Some(Local::now()),
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == SessionPhase::Running
    }

    pub fn finish(&mut self, outcome: DownloadOutcome, at: Instant) {
        if matches!(outcome, DownloadOutcome::Success(_)) {
            self.progress.percent = 100.0;
        }
        self.phase = outcome.into();
        self.cancel_requested = false;
        self.finished_at = Some(at);
    }

    /// One-line summary for the status area
    pub fn status_line(&self) -> String {
        match &self.phase {
            SessionPhase::Idle => "Ready".to_string(),
            SessionPhase::Running if self.cancel_requested => "Cancelling...".to_string(),
            SessionPhase::Running => {
                let tick = format!(
                    "{:.1}% | Speed: {} | ETA: {}",
                    self.progress.percent,
                    self.progress.speed_display(),
                    self.progress.eta_display()
                );
                match &self.status {
                    Some(status) => format!("{} | {}", status, tick),
                    None => tick,
                }
            }
            SessionPhase::Succeeded(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                format!("Download complete: {}", name)
            }
            SessionPhase::Failed(failure) => format!("Download failed: {}", failure),
            SessionPhase::Cancelled => "Download cancelled".to_string(),
        }
    }
}

/// Focusable fields of the download form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Url,
    Media,
    Resolution,
    AudioFormat,
    AudioQuality,
    Destination,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::Url => "URL",
            Field::Media => "Media",
            Field::Resolution => "Resolution",
            Field::AudioFormat => "Format",
            Field::AudioQuality => "Bitrate",
            Field::Destination => "Save to",
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, Field::Url | Field::Destination)
    }
}

/// Contents of the input form
#[derive(Debug, Clone)]
pub struct DownloadForm {
    pub url: String,
    pub media: MediaType,
    pub resolution: Resolution,
    pub audio_format: AudioFormat,
    pub audio_quality: AudioQuality,
    pub destination: String,
    pub focus: Field,
}

impl DownloadForm {
    pub fn new(destination: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            url: String::new(),
            media: MediaType::Video,
            resolution,
            audio_format: AudioFormat::default(),
            audio_quality: AudioQuality::default(),
            destination: destination.into(),
            focus: Field::Url,
        }
    }

    /// Fields shown for the current media type, in focus order
    pub fn visible_fields(&self) -> Vec<Field> {
        match self.media {
            MediaType::Video => vec![Field::Url, Field::Media, Field::Resolution, Field::Destination],
            MediaType::Audio => vec![
                Field::Url,
                Field::Media,
                Field::AudioFormat,
                Field::AudioQuality,
                Field::Destination,
            ],
        }
    }

    pub fn focus_next(&mut self) {
        self.move_focus(true);
    }

    pub fn focus_prev(&mut self) {
        self.move_focus(false);
    }

    fn move_focus(&mut self, forward: bool) {
        let fields = self.visible_fields();
        let current = fields.iter().position(|f| *f == self.focus).unwrap_or(0);
        let next = if forward {
            (current + 1) % fields.len()
        } else {
            (current + fields.len() - 1) % fields.len()
        };
        self.focus = fields[next];
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        match self.focus {
            Field::Url => Some(&mut self.url),
            Field::Destination => Some(&mut self.destination),
            _ => None,
        }
    }

    pub fn input_char(&mut self, c: char) {
        if let Some(text) = self.text_mut() {
            text.push(c);
        }
    }

    pub fn backspace(&mut self) {
        if let Some(text) = self.text_mut() {
            text.pop();
        }
    }

    pub fn clear_field(&mut self) {
        if let Some(text) = self.text_mut() {
            text.clear();
        }
    }

    /// Step the focused selector forward or back; no-op on text fields
    pub fn cycle_selector(&mut self, forward: bool) {
        match self.focus {
            Field::Media => self.media = cycle(&MediaType::ALL, self.media, forward),
            Field::Resolution => {
                self.resolution = cycle(&Resolution::ALL, self.resolution, forward)
            }
            Field::AudioFormat => {
                self.audio_format = cycle(&AudioFormat::ALL, self.audio_format, forward)
            }
            Field::AudioQuality => {
                self.audio_quality = cycle(&AudioQuality::ALL, self.audio_quality, forward)
            }
            Field::Url | Field::Destination => {}
        }
    }

    /// Current value of a field as displayed
    pub fn value(&self, field: Field) -> String {
        match field {
            Field::Url => self.url.clone(),
            Field::Media => self.media.to_string(),
            Field::Resolution => self.resolution.to_string(),
            Field::AudioFormat => self.audio_format.as_str().to_string(),
            Field::AudioQuality => self.audio_quality.to_string(),
            Field::Destination => self.destination.clone(),
        }
    }

    pub fn to_request(&self) -> DownloadRequest {
        let media = match self.media {
            MediaType::Video => MediaKind::Video,
            MediaType::Audio => MediaKind::Audio {
                format: self.audio_format,
                quality: self.audio_quality,
            },
        };
        DownloadRequest::new(self.url.trim(), self.resolution, self.destination.trim())
            .with_media(media)
    }
}

fn cycle<T: Copy + PartialEq>(all: &[T], current: T, forward: bool) -> T {
    let index = all.iter().position(|v| *v == current).unwrap_or(0);
    let next = if forward {
        (index + 1) % all.len()
    } else {
        (index + all.len() - 1) % all.len()
    };
    all[next]
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1}{}", size, UNITS[unit_index])
}

/// Format a duration as MM:SS, or H:MM:SS past the hour
pub fn format_eta(eta: Duration) -> String {
    let total_seconds = eta.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("Best".parse::<Resolution>(), Ok(Resolution::Best));
        assert_eq!("720p".parse::<Resolution>(), Ok(Resolution::P720));
        assert_eq!("1080".parse::<Resolution>(), Ok(Resolution::P1080));
        assert!("4k".parse::<Resolution>().is_err());
        assert_eq!(Resolution::P360.to_string(), "360p");
        assert_eq!(Resolution::Best.max_height(), None);
    }

    #[test]
    fn test_validate_accepts_writable_folder() {
        let dir = tempfile::tempdir().unwrap();
        let request = DownloadRequest::new(
            "https://youtube.com/watch?v=VALID",
            Resolution::P720,
            dir.path(),
        );
        assert_eq!(request.validate(), Ok(()));
        // The probe file must not be left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();

        let empty = DownloadRequest::new("   ", Resolution::Best, dir.path());
        assert_eq!(empty.validate(), Err(InvalidInput::EmptyUrl));

        let not_url = DownloadRequest::new("not-a-url", Resolution::Best, dir.path());
        assert!(matches!(not_url.validate(), Err(InvalidInput::MalformedUrl(_))));

        let no_dest = DownloadRequest::new("https://youtu.be/abc", Resolution::Best, "");
        assert_eq!(no_dest.validate(), Err(InvalidInput::EmptyDestination));

        let missing = DownloadRequest::new(
            "https://youtu.be/abc",
            Resolution::Best,
            dir.path().join("nope"),
        );
        assert!(matches!(missing.validate(), Err(InvalidInput::DestinationMissing(_))));

        let file = dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        let not_dir = DownloadRequest::new("https://youtu.be/abc", Resolution::Best, &file);
        assert!(matches!(not_dir.validate(), Err(InvalidInput::DestinationNotDirectory(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_read_only_folder() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users ignore mode bits
        if fs::write(locked.join("check"), b"x").is_ok() {
            return;
        }

        let request = DownloadRequest::new("https://youtu.be/abc", Resolution::Best, &locked);
        let result = request.validate();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(InvalidInput::DestinationNotWritable(_))));
    }

    #[test]
    fn test_form_focus_skips_hidden_fields() {
        let mut form = DownloadForm::new("/tmp", Resolution::Best);
        form.focus_next();
        assert_eq!(form.focus, Field::Media);
        form.focus_next();
        assert_eq!(form.focus, Field::Resolution);
        form.focus_next();
        assert_eq!(form.focus, Field::Destination);
        form.focus_next();
        assert_eq!(form.focus, Field::Url);

        form.media = MediaType::Audio;
        form.focus_prev();
        assert_eq!(form.focus, Field::Destination);
        form.focus_prev();
        assert_eq!(form.focus, Field::AudioQuality);
    }

    #[test]
    fn test_form_editing_and_request() {
        let mut form = DownloadForm::new("/tmp/out", Resolution::Best);
        for c in " https://youtu.be/abc ".chars() {
            form.input_char(c);
        }
        form.backspace();
        form.focus = Field::Resolution;
        form.input_char('x');
        form.cycle_selector(true);
        form.cycle_selector(true);
        form.focus = Field::Media;
        form.cycle_selector(false);

        let request = form.to_request();
        assert_eq!(request.url, "https://youtu.be/abc");
        assert_eq!(request.resolution, Resolution::P720);
        assert_eq!(request.destination, PathBuf::from("/tmp/out"));
        assert_eq!(
            request.media,
            MediaKind::Audio {
                format: AudioFormat::Mp3,
                quality: AudioQuality::K128
            }
        );
    }

    #[test]
    fn test_status_lines() {
        let mut session = Session::running(
            Uuid::new_v4(),
            DownloadRequest::new("https://youtu.be/abc", Resolution::Best, "/tmp"),
        );
        session.progress = ProgressEvent {
            percent: 42.0,
            speed: Some(2048.0),
            eta: Some(Duration::from_secs(83)),
            ..ProgressEvent::default()
        };
        assert_eq!(session.status_line(), "42.0% | Speed: 2.0KB/s | ETA: 01:23");

        session.cancel_requested = true;
        assert_eq!(session.status_line(), "Cancelling...");

        session.finish(
            DownloadOutcome::Success(PathBuf::from("/tmp/Clip.mp4")),
            Instant::now(),
        );
        assert_eq!(session.status_line(), "Download complete: Clip.mp4");
        assert_eq!(session.progress.percent, 100.0);
        assert!(session.phase.is_terminal());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(512), "512.0B");
        assert_eq!(format_bytes(1536 * 1024), "1.5MB");
        assert_eq!(format_eta(Duration::from_secs(59)), "00:59");
        assert_eq!(format_eta(Duration::from_secs(3723)), "1:02:03");
    }
}
