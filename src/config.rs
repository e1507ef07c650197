use std::path::PathBuf;

use crate::app_state::Resolution;
use crate::error::ConfigError;

pub const ENV_YT_DLP: &str = "TUBEGRAB_YT_DLP";
pub const ENV_FFMPEG: &str = "TUBEGRAB_FFMPEG";
pub const ENV_OUTPUT_DIR: &str = "TUBEGRAB_OUTPUT_DIR";
pub const ENV_RESOLUTION: &str = "TUBEGRAB_RESOLUTION";
pub const ENV_LOG_FILE: &str = "TUBEGRAB_LOG_FILE";

/// Startup settings, read once from the environment and never written back
#[derive(Debug, Clone)]
pub struct Settings {
    /// yt-dlp executable
    pub yt_dlp: PathBuf,
    /// ffmpeg binary or directory; `None` searches PATH
    pub ffmpeg: Option<PathBuf>,
    /// Initial value of the destination field
    pub output_dir: PathBuf,
    /// Initial resolution preset
    pub resolution: Resolution,
    pub log_file: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Treat empty variables as unset
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let resolution = match get(ENV_RESOLUTION) {
            Some(value) => value.parse::<Resolution>().map_err(|reason| ConfigError::InvalidValue {
                var: ENV_RESOLUTION,
                value,
                reason,
            })?,
            None => Resolution::default(),
        };

        let log_file = match get(ENV_LOG_FILE) {
            Some(path) => PathBuf::from(path),
            None => default_log_file()?,
        };

        Ok(Self {
            yt_dlp: get(ENV_YT_DLP)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("yt-dlp")),
            ffmpeg: get(ENV_FFMPEG).map(PathBuf::from),
            output_dir: get(ENV_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(default_output_dir),
            resolution,
            log_file,
        })
    }
}

fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_log_file() -> Result<PathBuf, ConfigError> {
    dirs::data_local_dir()
        .map(|dir| dir.join("tubegrab").join("tubegrab.log"))
        .ok_or(ConfigError::NoLogLocation)
}
