/// Shared data structures for the catalog
///
/// These structs represent the data model that flows between
/// the scanner, the database layer and the read-only consumers.
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::media::identity::ChangeSignature;

/// Kind of media file, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(format!("unknown media kind '{}'", other)),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse guess at where a media file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceClass {
    Camera,
    Screenshot,
    Web,
    Video,
    Unknown,
}

impl SourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceClass::Camera => "camera",
            SourceClass::Screenshot => "screenshot",
            SourceClass::Web => "web",
            SourceClass::Video => "video",
            SourceClass::Unknown => "unknown",
        }
    }

    /// Parse a persisted value. Anything unrecognised maps to `Unknown`.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "camera" => SourceClass::Camera,
            "screenshot" => SourceClass::Screenshot,
            "web" => SourceClass::Web,
            "video" => SourceClass::Video,
            _ => SourceClass::Unknown,
        }
    }
}

impl fmt::Display for SourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named views over the catalog used by the listing interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Album {
    All,
    Camera,
    Screenshot,
    Web,
    Video,
}

impl FromStr for Album {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Album::All),
            "camera" => Ok(Album::Camera),
            "screenshot" => Ok(Album::Screenshot),
            "web" => Ok(Album::Web),
            "video" => Ok(Album::Video),
            other => Err(format!(
                "invalid album '{}', expected one of all, camera, screenshot, web, video",
                other
            )),
        }
    }
}

/// A latitude/longitude pair in signed decimal degrees.
///
/// Coordinates only ever travel as a pair, so a half-known position
/// cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One indexed media file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Hash of the canonical path, also the thumbnail file stem
    pub identity: String,
    /// Canonical absolute path to the original file
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Embedded capture time, or the file's modification time
    pub captured_at: NaiveDateTime,
    /// Whole seconds, videos only. `Some(0)` means the probe could not tell.
    pub duration_seconds: Option<u32>,
    /// File name inside the thumbnail directory
    pub thumbnail_ref: Option<String>,
    #[serde(flatten)]
    pub location: Option<GeoPoint>,
    pub location_name: Option<String>,
    pub source_class: SourceClass,
    #[serde(skip)]
    pub signature: ChangeSignature,
}

impl CatalogEntry {
    /// Clear every field that does not belong to this entry's kind.
    ///
    /// Videos never carry a position; images never carry a duration;
    /// a place name is meaningless without coordinates.
    pub fn normalize(mut self) -> Self {
        match self.kind {
            MediaKind::Video => {
                self.location = None;
                self.location_name = None;
                self.source_class = SourceClass::Video;
            }
            MediaKind::Image => {
                self.duration_seconds = None;
            }
        }
        if self.location.is_none() {
            self.location_name = None;
        }
        self
    }

    /// True when a video still lacks a usable duration
    pub fn needs_duration(&self) -> bool {
        self.kind == MediaKind::Video && self.duration_seconds.unwrap_or(0) == 0
    }
}

/// Outcome counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub added: usize,
    /// Full re-extractions plus partial repairs that changed something
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
}
