use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use crate::app_state::ProgressEvent;

pub const PROGRESS_MARKER: &str = "[progress]";
pub const PARTS_MARKER: &str = "[parts]";
pub const FILE_MARKER: &str = "[file]";

static ANSI_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("valid ANSI regex"));

static PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[progress\]\s+(?P<downloaded>[^|]*)\|(?P<total>[^|]*)\|(?P<estimate>[^|]*)\|(?P<speed>[^|]*)\|(?P<eta>[^|]*)\|(?P<format>[^|]*)\|(?P<tmp>.*)$",
    )
    .expect("valid progress regex")
});

/// Value for yt-dlp's `--progress-template`, one machine-readable line per tick
pub fn progress_template() -> String {
    format!(
        "download:{} %(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.eta)s|%(info.format_id)s|%(progress.tmpfilename)s",
        PROGRESS_MARKER
    )
}

pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    ANSI_REGEX.replace_all(s, "")
}

/// A line of engine output, classified
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    Progress(RawProgress),
    /// Number of streams the engine will fetch for this request
    Parts(usize),
    /// Final output file after post-processing
    File(PathBuf),
    Other(String),
}

/// Progress for the stream currently being fetched
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawProgress {
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
    pub format_id: Option<String>,
    pub tmp_file: Option<PathBuf>,
}

impl RawProgress {
    pub fn stream_percent(&self) -> Option<f64> {
        let downloaded = self.downloaded?;
        let total = self.total.filter(|t| *t > 0)?;
        Some((downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }
}

pub fn parse_line(line: &str) -> EngineLine {
    let clean = strip_ansi(line);
    let clean = clean.trim();

    if let Some(captures) = PROGRESS_REGEX.captures(clean) {
        let field = |name: &str| captures.name(name).and_then(|m| present(m.as_str()));
        let total = field("total")
            .and_then(parse_bytes)
            .or_else(|| field("estimate").and_then(parse_bytes));
        return EngineLine::Progress(RawProgress {
            downloaded: field("downloaded").and_then(parse_bytes),
            total,
            speed: field("speed").and_then(parse_number),
            eta: field("eta")
                .and_then(parse_number)
                .filter(|secs| *secs < u32::MAX as f64)
                .map(Duration::from_secs_f64),
            format_id: field("format").map(str::to_string),
            tmp_file: field("tmp").map(PathBuf::from),
        });
    }

    if let Some(rest) = clean.strip_prefix(PARTS_MARKER) {
        let parts = present(rest.trim())
            .map(|ids| ids.split('+').filter(|id| !id.is_empty()).count())
            .unwrap_or(1);
        return EngineLine::Parts(parts.max(1));
    }

    if let Some(rest) = clean.strip_prefix(FILE_MARKER) {
        if let Some(path) = present(rest.trim()) {
            return EngineLine::File(PathBuf::from(path));
        }
    }

    EngineLine::Other(clean.to_string())
}

/// yt-dlp renders missing template fields as `NA`
fn present(value: &str) -> Option<&str> {
    let value = value.trim();
    match value {
        "" | "NA" | "None" => None,
        _ => Some(value),
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_bytes(value: &str) -> Option<u64> {
    parse_number(value).map(|v| v.round() as u64)
}

/// Folds per-stream progress into one overall percentage that never goes backwards.
///
/// A merged download fetches video and audio separately, each going 0-100%.
/// The tracker advances to the next slot whenever the format id changes.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    parts: usize,
    part_index: usize,
    current_format: Option<String>,
    last_percent: f64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            parts: 1,
            part_index: 0,
            current_format: None,
            last_percent: 0.0,
        }
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_parts(&mut self, parts: usize) {
        self.parts = parts.max(1);
        self.part_index = self.part_index.min(self.parts - 1);
    }

    pub fn percent(&self) -> f64 {
        self.last_percent
    }

    pub fn update(&mut self, raw: &RawProgress) -> ProgressEvent {
        if let Some(format_id) = &raw.format_id {
            match &self.current_format {
                Some(current) if current != format_id => {
                    self.part_index = (self.part_index + 1).min(self.parts - 1);
                    self.current_format = Some(format_id.clone());
                }
                None => self.current_format = Some(format_id.clone()),
                _ => {}
            }
        }

        if let Some(stream) = raw.stream_percent() {
            let overall = (self.part_index as f64 * 100.0 + stream) / self.parts as f64;
            self.last_percent = overall.max(self.last_percent).min(100.0);
        }

        ProgressEvent {
            percent: self.last_percent,
            speed: raw.speed,
            eta: raw.eta,
            downloaded_bytes: raw.downloaded,
            total_bytes: raw.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(downloaded: u64, total: u64, format: &str) -> RawProgress {
        RawProgress {
            downloaded: Some(downloaded),
            total: Some(total),
            format_id: Some(format.to_string()),
            ..RawProgress::default()
        }
    }

    #[test]
    fn test_progress_parsing() {
        let line = "[progress] 1048576|4194304|NA|524288.5|6|137|/tmp/out/Clip.f137.mp4.part";
        let EngineLine::Progress(progress) = parse_line(line) else {
            panic!("expected a progress line");
        };

        assert_eq!(progress.downloaded, Some(1_048_576));
        assert_eq!(progress.total, Some(4_194_304));
        assert_eq!(progress.speed, Some(524_288.5));
        assert_eq!(progress.eta, Some(Duration::from_secs(6)));
        assert_eq!(progress.format_id.as_deref(), Some("137"));
        assert_eq!(
            progress.tmp_file,
            Some(PathBuf::from("/tmp/out/Clip.f137.mp4.part"))
        );
        assert_eq!(progress.stream_percent(), Some(25.0));
    }

    #[test]
    fn test_progress_parsing_with_missing_fields() {
        let line = "\x1b[0;32m[progress] 2048|NA|8192.0|NA|NA|18|NA\x1b[0m";
        let EngineLine::Progress(progress) = parse_line(line) else {
            panic!("expected a progress line");
        };

        assert_eq!(progress.total, Some(8192));
        assert_eq!(progress.speed, None);
        assert_eq!(progress.eta, None);
        assert_eq!(progress.tmp_file, None);
        assert_eq!(progress.stream_percent(), Some(25.0));
    }

    #[test]
    fn test_marker_lines() {
        assert_eq!(parse_line("[parts] 137+140"), EngineLine::Parts(2));
        assert_eq!(parse_line("[parts] 22"), EngineLine::Parts(1));
        assert_eq!(parse_line("[parts] NA"), EngineLine::Parts(1));
        assert_eq!(
            parse_line("[file] /tmp/out/My Video.mp4"),
            EngineLine::File(PathBuf::from("/tmp/out/My Video.mp4"))
        );
        assert_eq!(
            parse_line("ERROR: something broke"),
            EngineLine::Other("ERROR: something broke".to_string())
        );
    }

    #[test]
    fn test_tracker_spreads_parts() {
        let mut tracker = ProgressTracker::new();
        tracker.set_parts(2);

        assert_eq!(tracker.update(&raw(50, 100, "137")).percent, 25.0);
        assert_eq!(tracker.update(&raw(100, 100, "137")).percent, 50.0);
        // The audio stream restarts at 0% but overall progress holds
        assert_eq!(tracker.update(&raw(0, 100, "140")).percent, 50.0);
        assert_eq!(tracker.update(&raw(50, 100, "140")).percent, 75.0);
        assert_eq!(tracker.update(&raw(100, 100, "140")).percent, 100.0);
    }

    #[test]
    fn test_tracker_without_parts_marker_never_drops() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.update(&raw(90, 100, "137")).percent, 90.0);
        assert_eq!(tracker.update(&raw(10, 100, "140")).percent, 90.0);
        let unknown = RawProgress {
            speed: Some(10.0),
            ..RawProgress::default()
        };
        let event = tracker.update(&unknown);
        assert_eq!(event.percent, 90.0);
        assert_eq!(event.speed, Some(10.0));
    }

    proptest! {
        #[test]
        fn overall_percent_never_decreases(
            parts in 1usize..4,
            ticks in prop::collection::vec((0usize..3, 0u64..=1000, 1u64..=1000), 1..60),
        ) {
            let mut tracker = ProgressTracker::new();
            tracker.set_parts(parts);
            let mut previous = 0.0;
            for (format, downloaded, total) in ticks {
                let event = tracker.update(&raw(downloaded.min(total), total, &format.to_string()));
                prop_assert!(event.percent >= previous);
                prop_assert!(event.percent <= 100.0);
                previous = event.percent;
            }
        }
    }
}
