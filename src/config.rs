use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::media::geocode::OfflineGazetteer;
use crate::media::probe::{FfmpegProbe, DEFAULT_FRAME_OFFSET_SECS};
use crate::media::thumbnail::{ThumbnailError, ThumbnailStore, THUMBNAIL_SIZE};
use crate::state::job::ScanEnvironment;

const APP_DIR: &str = "media-catalog";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not prepare thumbnail directory: {0}")]
    Thumbnails(#[from] ThumbnailError),
}

/// Runtime settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_path: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub thumbnail_size: u32,
    pub video_frame_offset_secs: f64,
    pub max_location_distance_km: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: app_dir(dirs::data_dir()).join("catalog.db"),
            thumbnail_dir: app_dir(dirs::cache_dir()).join("thumbnails"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            thumbnail_size: THUMBNAIL_SIZE,
            video_frame_offset_secs: DEFAULT_FRAME_OFFSET_SECS,
            max_location_distance_km: 150.0,
        }
    }
}

/// `<base>/media-catalog`, falling back to the home directory, then the working directory
fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Where the config file is looked up when none is given
    /// - Linux: ~/.config/media-catalog/config.toml
    /// - macOS: ~/Library/Application Support/media-catalog/config.toml
    pub fn default_path() -> PathBuf {
        app_dir(dirs::config_dir()).join("config.toml")
    }

    /// Load the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Wire up the real probe, gazetteer and thumbnail store
    pub fn scan_environment(&self) -> Result<ScanEnvironment, ConfigError> {
        let probe = FfmpegProbe::new(&self.ffmpeg_path, &self.ffprobe_path)
            .with_frame_offset(self.video_frame_offset_secs)
            .with_frame_size(self.thumbnail_size);

        Ok(ScanEnvironment {
            database_path: self.database_path.clone(),
            thumbnails: self.thumbnail_store()?,
            probe: Arc::new(probe),
            gazetteer: Arc::new(OfflineGazetteer::new(self.max_location_distance_km)),
        })
    }

    pub fn thumbnail_store(&self) -> Result<ThumbnailStore, ConfigError> {
        Ok(ThumbnailStore::open(&self.thumbnail_dir)?.with_size(self.thumbnail_size))
    }
}
