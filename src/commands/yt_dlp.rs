use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::engine::{DownloadEngine, ProgressSink};
use super::progress::{
    EngineLine, FILE_MARKER, PARTS_MARKER, ProgressTracker, RawProgress, parse_line,
    progress_template, strip_ansi,
};
use crate::app_state::{DownloadOutcome, DownloadRequest, MediaKind, Resolution};
use crate::config::Settings;
use crate::error::DownloadFailure;

/// stderr lines kept around for classifying a failure
const DIAGNOSTIC_LINES: usize = 64;

/// How long a killed engine's output readers get to reach end of file
const READER_GRACE: Duration = Duration::from_secs(1);

static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9.\-]+(:\d+)?([/?#]\S*)?$").expect("valid URL regex")
});

/// Validate if a URL is potentially supported by yt-dlp
pub fn is_valid_url(url: &str) -> bool {
    URL_REGEX.is_match(url.trim())
}

/// yt-dlp format selector for a resolution preset.
///
/// A height preset takes the best stream at or below the ceiling and falls
/// back to the best available when nothing fits.
pub fn format_selector(resolution: Resolution) -> String {
    match resolution.max_height() {
        None => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best".to_string(),
        Some(h) => format!(
            "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<={h}]+bestaudio/best[height<={h}]/best"
        ),
    }
}

/// `--format` for a request; the metadata lookup uses it too so both agree on the streams
fn format_flags(request: &DownloadRequest) -> [String; 2] {
    let selector = match request.media {
        MediaKind::Video => format_selector(request.resolution),
        MediaKind::Audio { .. } => "bestaudio/best".to_string(),
    };
    ["--format".to_string(), selector]
}

/// Full argument list for the download invocation, URL last
pub fn build_download_args(request: &DownloadRequest, ffmpeg_location: Option<&Path>) -> Vec<String> {
    let mut args: Vec<String> = format_flags(request).to_vec();

    match request.media {
        MediaKind::Video => {
            args.extend(["--merge-output-format".to_string(), "mp4".to_string()]);
        }
        MediaKind::Audio { format, quality } => {
            args.extend([
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                format.as_str().to_string(),
                "--audio-quality".to_string(),
                quality.bitrate().to_string(),
            ]);
        }
    }

    let output = request.destination.join("%(title)s.%(ext)s");
    args.extend([
        "--output".to_string(),
        output.to_string_lossy().to_string(),
        "--no-playlist".to_string(),
        "--newline".to_string(),
        "--progress".to_string(),
        "--no-simulate".to_string(),
        "--progress-template".to_string(),
        progress_template(),
        "--print".to_string(),
        format!("before_dl:{} %(format_id)s", PARTS_MARKER),
        "--print".to_string(),
        format!("after_move:{} %(filepath)s", FILE_MARKER),
    ]);

    if let Some(location) = ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(location.to_string_lossy().to_string());
    }

    args.push("--".to_string());
    args.push(request.url.trim().to_string());
    args
}

/// Turn the engine's stderr into a failure, based on its last error message
pub fn classify_failure<'a>(stderr: impl IntoIterator<Item = &'a str>) -> DownloadFailure {
    let lines: Vec<String> = stderr
        .into_iter()
        .map(|line| strip_ansi(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    let message = lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
        .or_else(|| lines.last().cloned())
        .unwrap_or_else(|| "the download engine exited without an error message".to_string());
    let lower = message.to_lowercase();

    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if lower.contains("ffmpeg") && has(&["not installed", "not found"]) {
        DownloadFailure::ToolMissing(message)
    } else if has(&["unsupported url", "is not a valid url"]) {
        DownloadFailure::UnsupportedUrl(message)
    } else if has(&["age restricted", "age-restricted", "confirm your age"]) {
        DownloadFailure::AgeRestricted(message)
    } else if has(&["requested format"]) {
        DownloadFailure::FormatUnavailable(message)
    } else if has(&["unavailable", "private video", "has been removed"]) {
        DownloadFailure::Unavailable(message)
    } else if has(&["permission denied", "read-only file system"]) {
        DownloadFailure::PermissionDenied(message)
    } else if has(&[
        "unable to download webpage",
        "urlopen error",
        "timed out",
        "connection",
        "network is unreachable",
        "name or service not known",
        "temporary failure in name resolution",
        "getaddrinfo failed",
    ]) {
        DownloadFailure::Network(message)
    } else {
        DownloadFailure::Engine(message)
    }
}

/// Why `execute` stopped before producing a file
enum Interrupt {
    Cancelled,
    Failed(DownloadFailure),
}

impl From<DownloadFailure> for Interrupt {
    fn from(failure: DownloadFailure) -> Self {
        Interrupt::Failed(failure)
    }
}

/// The parts of `--dump-single-json` output the engine cares about
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    /// Present when separate streams get merged
    #[serde(default)]
    requested_formats: Option<Vec<serde_json::Value>>,
}

impl VideoInfo {
    fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }

    /// Number of streams the download will fetch
    fn parts(&self) -> usize {
        self.requested_formats
            .as_ref()
            .map_or(1, |formats| formats.len().max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs downloads through the `yt-dlp` command-line program
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
    ffmpeg: Option<PathBuf>,
    fetch_metadata: bool,
}

impl YtDlpEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ffmpeg: None,
            fetch_metadata: true,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.yt_dlp).with_ffmpeg(settings.ffmpeg.clone())
    }

    /// Use a specific ffmpeg binary or directory instead of searching PATH
    pub fn with_ffmpeg(mut self, ffmpeg: Option<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg;
        self
    }

    /// Skip the title lookup that runs before each download
    pub fn without_metadata(mut self) -> Self {
        self.fetch_metadata = false;
        self
    }

    fn ffmpeg_program(&self) -> PathBuf {
        let binary = if cfg!(target_os = "windows") { "ffmpeg.exe" } else { "ffmpeg" };
        match &self.ffmpeg {
            Some(path) if path.is_dir() => path.join(binary),
            Some(path) => path.clone(),
            None => PathBuf::from(binary),
        }
    }

    fn spawn_error(&self, error: io::Error) -> DownloadFailure {
        if error.kind() == io::ErrorKind::NotFound {
            DownloadFailure::EngineMissing(format!("{} ({})", self.program.display(), error))
        } else {
            DownloadFailure::Engine(format!(
                "could not start {}: {}",
                self.program.display(),
                error
            ))
        }
    }

    async fn execute(
        &self,
        request: &DownloadRequest,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, Interrupt> {
        if cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }

        let version = self.probe_media_tool(cancel).await?;
        debug!(session = %progress.id(), %version, "media tool found");

        let mut parts = None;
        if self.fetch_metadata {
            let info = self.fetch_info(request, cancel).await?;
            info!(session = %progress.id(), title = info.title(), parts = info.parts(), "metadata fetched");
            progress.status(format!("Downloading: {}", info.title()));
            parts = Some(info.parts());
        }

        self.download(request, progress, cancel, parts).await
    }

    /// Run `ffmpeg -version` and return its banner line
    async fn probe_media_tool(&self, cancel: &CancellationToken) -> Result<String, Interrupt> {
        let program = self.ffmpeg_program();
        let mut cmd = Command::new(&program);
        cmd.arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            output = cmd.output() => output,
        };

        let output = output.map_err(|e| {
            DownloadFailure::ToolMissing(format!("{}: {}", program.display(), e))
        })?;
        if !output.status.success() {
            return Err(DownloadFailure::ToolMissing(format!(
                "{} -version exited with {}",
                program.display(),
                output.status
            ))
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .filter(|line| line.contains("ffmpeg version"))
            .map(|line| line.trim().to_string())
            .ok_or_else(|| {
                DownloadFailure::ToolMissing(format!(
                    "{} did not identify itself as ffmpeg",
                    program.display()
                ))
                .into()
            })
    }

    /// Look up the title and stream layout before downloading
    async fn fetch_info(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<VideoInfo, Interrupt> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--dump-single-json", "--no-playlist", "--no-warnings"])
            .args(format_flags(request))
            .args(["--", request.url.trim()])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            output = cmd.output() => output,
        };
        let output = output.map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.lines()).into());
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            DownloadFailure::Engine(format!("could not read video metadata: {}", e)).into()
        })
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &ProgressSink,
        cancel: &CancellationToken,
        parts: Option<usize>,
    ) -> Result<PathBuf, Interrupt> {
        let args = build_download_args(request, self.ffmpeg.as_deref());
        debug!(session = %progress.id(), ?args, "spawning {}", self.program.display());

        let mut leftovers = Leftovers::snapshot(&request.destination).await;

        let mut std_cmd = std::process::Command::new(&self.program);
        std_cmd.args(&args);
        // Own process group, so a cancel also reaches the ffmpeg it spawns
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut child = Command::from(std_cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadFailure::Engine("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadFailure::Engine("Failed to capture stderr".to_string()))?;

        // With --print the engine goes quiet and progress moves to stderr, so read both
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let mut readers = [
            forward_lines(stdout, Stream::Stdout, line_tx.clone()),
            forward_lines(stderr, Stream::Stderr, line_tx),
        ];

        let mut tracker = ProgressTracker::new();
        if let Some(parts) = parts {
            tracker.set_parts(parts);
        }
        let mut diagnostics: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_LINES);
        let mut output_file: Option<PathBuf> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(session = %progress.id(), "cancelling engine process");
                    kill_process_tree(&mut child).await;
                    for reader in &mut readers {
                        if tokio::time::timeout(READER_GRACE, &mut *reader).await.is_err() {
                            reader.abort();
                        }
                    }
                    // Lines still queued may name files that need cleaning up
                    while let Ok((_, line)) = line_rx.try_recv() {
                        if let EngineLine::Progress(raw) = parse_line(&line) {
                            leftovers.note(&raw);
                        }
                    }
                    leftovers.remove().await;
                    return Err(Interrupt::Cancelled);
                }
                line = line_rx.recv() => {
                    let Some((stream, line)) = line else { break };
                    match parse_line(&line) {
                        EngineLine::Progress(raw) => {
                            leftovers.note(&raw);
                            progress.emit(tracker.update(&raw));
                        }
                        EngineLine::Parts(parts) => tracker.set_parts(parts),
                        EngineLine::File(path) => output_file = Some(path),
                        EngineLine::Other(text) => {
                            trace!(?stream, "{}", text);
                            if stream == Stream::Stderr && !text.is_empty() {
                                if diagnostics.len() == DIAGNOSTIC_LINES {
                                    diagnostics.pop_front();
                                }
                                diagnostics.push_back(text);
                            }
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadFailure::Engine(format!("failed waiting for engine: {}", e)))?;

        if !status.success() {
            warn!(session = %progress.id(), %status, "engine exited with failure");
            return Err(classify_failure(diagnostics.iter().map(String::as_str)).into());
        }

        output_file.ok_or_else(|| {
            DownloadFailure::Engine("engine finished without reporting an output file".to_string())
                .into()
        })
    }
}

#[async_trait]
impl DownloadEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn run(
        &self,
        request: DownloadRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> DownloadOutcome {
        match self.execute(&request, &progress, &cancel).await {
            Ok(path) => DownloadOutcome::Success(path),
            Err(Interrupt::Cancelled) => DownloadOutcome::Cancelled,
            Err(Interrupt::Failed(failure)) => DownloadOutcome::Failed(failure),
        }
    }
}

fn forward_lines<R>(
    reader: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    })
}

#[cfg(windows)]
fn tree_kill_command(pid: u32) -> Command {
    let mut cmd = Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/T", "/F"]);
    cmd
}

#[cfg(not(windows))]
fn tree_kill_command(pid: u32) -> Command {
    let mut cmd = Command::new("kill");
    cmd.args(["-KILL", "--", &format!("-{}", pid)]);
    cmd
}

/// Kill the engine along with any ffmpeg it started, then reap it
async fn kill_process_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        let status = tree_kill_command(pid)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => debug!(pid, "engine process tree killed"),
            Ok(status) => debug!(pid, %status, "process tree kill did not succeed"),
            Err(e) => warn!(pid, error = %e, "could not run process tree kill"),
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "engine process already gone");
    }
}

/// Files a cancelled download may leave behind.
///
/// Besides the `.part` files named in progress lines, yt-dlp renames finished
/// streams to `<title>.f<id>.<ext>` and ffmpeg writes `<title>.temp.<ext>`
/// while merging. Anything new in the destination that shares a stream's
/// title stem is removed; files that were there before the download started
/// are never touched.
struct Leftovers {
    dir: PathBuf,
    existing: HashSet<OsString>,
    tmp_files: HashSet<PathBuf>,
    stems: HashSet<String>,
}

impl Leftovers {
    async fn snapshot(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            existing: list_dir(dir).await.into_iter().collect(),
            tmp_files: HashSet::new(),
            stems: HashSet::new(),
        }
    }

    fn note(&mut self, raw: &RawProgress) {
        let Some(tmp) = &raw.tmp_file else { return };
        if let Some(stem) = output_stem(tmp, raw.format_id.as_deref()) {
            self.stems.insert(stem);
        }
        self.tmp_files.insert(tmp.clone());
    }

    async fn remove(&self) {
        let mut targets: HashSet<PathBuf> = HashSet::new();
        for tmp in &self.tmp_files {
            targets.insert(tmp.clone());
            if let Some(base) = tmp.to_str().and_then(|name| name.strip_suffix(".part")) {
                targets.insert(PathBuf::from(format!("{}.ytdl", base)));
            }
        }

        if !self.stems.is_empty() {
            for name in list_dir(&self.dir).await {
                if self.existing.contains(&name) {
                    continue;
                }
                let shown = name.to_string_lossy();
                if self.stems.iter().any(|stem| {
                    shown
                        .strip_prefix(stem.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
                }) {
                    targets.insert(self.dir.join(&name));
                }
            }
        }

        for path in targets {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed partial file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial file"),
            }
        }
    }
}

async fn list_dir(dir: &Path) -> Vec<OsString> {
    let mut names = Vec::new();
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                names.push(entry.file_name());
            }
        }
        Err(e) => debug!(dir = %dir.display(), error = %e, "could not list destination"),
    }
    names
}

/// `<title>` from `<title>.f137.mp4.part` or `<title>.webm.part`
fn output_stem(tmp: &Path, format_id: Option<&str>) -> Option<String> {
    let name = tmp.file_name()?.to_str()?;
    let name = name.strip_suffix(".part").unwrap_or(name);
    let (stem, _ext) = name.rsplit_once('.')?;
    let stem = format_id
        .and_then(|id| stem.strip_suffix(format!(".f{}", id).as_str()))
        .unwrap_or(stem);
    (!stem.is_empty()).then(|| stem.to_string())
}
