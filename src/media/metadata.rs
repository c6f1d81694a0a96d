/// Metadata extraction
///
/// Each sub-step (capture time, GPS, camera model, duration, place name)
/// returns its own `Result`. [`MetadataExtractor::extract`] decides field by
/// field what a failure means; none of them fails the whole extraction.
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use exif::{Exif, In, Reader, Tag, Value};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::geocode::{GeocodeError, Gazetteer};
use super::identity::ChangeSignature;
use super::probe::{whole_seconds, MediaProbe, VideoInfo};
use crate::state::data::{GeoPoint, MediaKind, SourceClass};

/// Filename fragments that mark a screenshot, compared lowercase
const SCREENSHOT_MARKERS: &[&str] = &["screenshot", "screen shot", "screen_shot", "screencapture"];

/// Lossless raster formats that cameras don't produce but screen grabs do
const SCREENSHOT_CONTAINERS: &[&str] = &["png"];

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("EXIF error: {0}")]
    Exif(#[from] exif::Error),

    #[error("missing tag {0}")]
    MissingTag(Tag),

    #[error("malformed tag {tag}: {reason}")]
    BadTag { tag: Tag, reason: String },

    #[error("geocoding failed: {0}")]
    Geocode(#[from] GeocodeError),
}

/// Everything extraction produces for one file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaMetadata {
    pub captured_at: NaiveDateTime,
    pub duration_seconds: Option<u32>,
    pub location: Option<GeoPoint>,
    pub location_name: Option<String>,
    pub source_class: SourceClass,
}

/// Runs every extraction sub-step for a file
#[derive(Clone)]
pub struct MetadataExtractor {
    probe: Arc<dyn MediaProbe>,
    gazetteer: Arc<dyn Gazetteer>,
}

impl MetadataExtractor {
    pub fn new(probe: Arc<dyn MediaProbe>, gazetteer: Arc<dyn Gazetteer>) -> Self {
        Self { probe, gazetteer }
    }

    /// Extract all metadata for a file. Never fails: anything unreadable
    /// falls back to the modification time or an absent field.
    pub fn extract(&self, path: &Path, kind: MediaKind, signature: &ChangeSignature) -> MediaMetadata {
        let modified = modification_time(signature);

        match kind {
            MediaKind::Video => self.extract_video(path, modified),
            MediaKind::Image => self.extract_image(path, modified),
        }
    }

    /// Probe a video's duration in whole seconds, 0 when unknown
    pub fn duration(&self, path: &Path) -> u32 {
        match self.probe.probe_duration(path) {
            Ok(secs) => whole_seconds(secs),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not probe video duration");
                0
            }
        }
    }

    fn extract_video(&self, path: &Path, modified: NaiveDateTime) -> MediaMetadata {
        let info = match self.probe.probe_video(path) {
            Ok(info) => info,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not probe video");
                VideoInfo::default()
            }
        };

        let captured_at = info
            .created_at
            .map(|t| t.with_timezone(&Local).naive_local())
            .unwrap_or(modified);

        MediaMetadata {
            captured_at,
            duration_seconds: Some(info.duration_secs.map(whole_seconds).unwrap_or(0)),
            location: None,
            location_name: None,
            source_class: SourceClass::Video,
        }
    }

    fn extract_image(&self, path: &Path, modified: NaiveDateTime) -> MediaMetadata {
        let exif = match read_exif(path) {
            Ok(exif) => Some(exif),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "no readable EXIF");
                None
            }
        };

        let captured_at = exif
            .as_ref()
            .and_then(|e| unavailable_as_none(path, "capture time", capture_time(e)))
            .unwrap_or(modified);

        let location = exif
            .as_ref()
            .and_then(|e| unavailable_as_none(path, "GPS position", gps_location(e)));

        let location_name =
            location.and_then(|point| unavailable_as_none(path, "place name", self.place_name(point)));

        let has_camera = exif.as_ref().map(|e| camera_model(e).is_ok()).unwrap_or(false);

        MediaMetadata {
            captured_at,
            duration_seconds: None,
            location,
            location_name,
            source_class: classify(MediaKind::Image, path, has_camera),
        }
    }

    fn place_name(&self, point: GeoPoint) -> Result<String, MetadataError> {
        Ok(self.gazetteer.lookup(point)?)
    }
}

impl std::fmt::Debug for MetadataExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataExtractor").finish_non_exhaustive()
    }
}

fn unavailable_as_none<T>(path: &Path, what: &str, result: Result<T, MetadataError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "{} unavailable", what);
            None
        }
    }
}

/// Decide where a file most likely came from.
///
/// Priority: video, screenshot filename, camera model tag, screenshot
/// container, then web.
pub fn classify(kind: MediaKind, path: &Path, has_camera_model: bool) -> SourceClass {
    if kind == MediaKind::Video {
        return SourceClass::Video;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if SCREENSHOT_MARKERS.iter().any(|m| file_name.contains(m)) {
        return SourceClass::Screenshot;
    }

    if has_camera_model {
        return SourceClass::Camera;
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if SCREENSHOT_CONTAINERS.contains(&extension.as_str()) {
        return SourceClass::Screenshot;
    }

    SourceClass::Web
}

/// Modification time from a signature, as local wall-clock time
pub fn modification_time(signature: &ChangeSignature) -> NaiveDateTime {
    DateTime::from_timestamp_nanos(signature.modified_ns)
        .with_timezone(&Local)
        .naive_local()
}

pub fn read_exif(path: &Path) -> Result<Exif, MetadataError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    Ok(Reader::new().read_from_container(&mut reader)?)
}

/// EXIF orientation value (1-8) of an image, if it has one
pub fn orientation(path: &Path) -> Option<u32> {
    let exif = read_exif(path).ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)?.value.get_uint(0)
}

fn capture_time(exif: &Exif) -> Result<NaiveDateTime, MetadataError> {
    let field = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .find_map(|tag| exif.get_field(tag, In::PRIMARY))
        .ok_or(MetadataError::MissingTag(Tag::DateTimeOriginal))?;

    let bad = |reason: &str| MetadataError::BadTag {
        tag: field.tag,
        reason: reason.to_string(),
    };

    let raw = match &field.value {
        Value::Ascii(values) => values.first().ok_or_else(|| bad("empty"))?,
        _ => return Err(bad("not ASCII")),
    };
    let dt = exif::DateTime::from_ascii(raw).map_err(|e| bad(&e.to_string()))?;

    NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)
        .and_then(|d| d.and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32))
        .ok_or_else(|| bad("date out of range"))
}

fn camera_model(exif: &Exif) -> Result<String, MetadataError> {
    let field = exif
        .get_field(Tag::Model, In::PRIMARY)
        .ok_or(MetadataError::MissingTag(Tag::Model))?;

    let model = ascii_value(&field.value).unwrap_or_default();
    if model.is_empty() {
        return Err(MetadataError::BadTag {
            tag: Tag::Model,
            reason: "empty".to_string(),
        });
    }
    Ok(model)
}

fn gps_location(exif: &Exif) -> Result<GeoPoint, MetadataError> {
    let latitude = gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 90.0)?;
    let longitude = gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 180.0)?;
    Ok(GeoPoint { latitude, longitude })
}

fn gps_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, limit: f64) -> Result<f64, MetadataError> {
    let field = exif
        .get_field(value_tag, In::PRIMARY)
        .ok_or(MetadataError::MissingTag(value_tag))?;
    let reference = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| ascii_value(&f.value))
        .ok_or(MetadataError::MissingTag(ref_tag))?;

    let bad = |reason: &str| MetadataError::BadTag {
        tag: value_tag,
        reason: reason.to_string(),
    };

    let dms = match &field.value {
        Value::Rational(parts) if parts.len() >= 3 => [parts[0].to_f64(), parts[1].to_f64(), parts[2].to_f64()],
        _ => return Err(bad("expected three rationals")),
    };

    let decimal = dms_to_decimal(dms, &reference).ok_or_else(|| bad("invalid degrees or reference"))?;
    if decimal.abs() > limit {
        return Err(bad("out of range"));
    }
    Ok(decimal)
}

/// Convert degrees/minutes/seconds plus a hemisphere reference to signed
/// decimal degrees. South and west are negative.
pub fn dms_to_decimal(dms: [f64; 3], reference: &str) -> Option<f64> {
    if dms.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return None;
    }
    let magnitude = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;

    match reference.trim().to_ascii_uppercase().as_str() {
        "N" | "E" => Some(magnitude),
        "S" | "W" => Some(-magnitude),
        _ => None,
    }
}

fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(values) => values.first().map(|v| {
            String::from_utf8_lossy(v)
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string()
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::geocode::OfflineGazetteer;
    use crate::test_support::{write_jpeg, write_jpeg_with_exif, write_png, ExifFixture, FakeProbe};
    use std::path::PathBuf;

    fn extractor() -> MetadataExtractor {
        MetadataExtractor::new(Arc::new(FakeProbe::with_duration(12.7)), Arc::new(OfflineGazetteer::default()))
    }

    fn sig(path: &Path) -> ChangeSignature {
        crate::media::identity::signature(path).unwrap()
    }

    #[test]
    fn test_dms_hemispheres() {
        let north = dms_to_decimal([48.0, 51.0, 30.0], "N").unwrap();
        assert!((north - 48.858333).abs() < 1e-5);
        assert!(dms_to_decimal([2.0, 17.0, 40.0], "E").unwrap() > 0.0);
        assert!(dms_to_decimal([33.0, 52.0, 0.0], "S").unwrap() < 0.0);
        assert!(dms_to_decimal([70.0, 40.0, 0.0], "W").unwrap() < 0.0);
        assert_eq!(dms_to_decimal([1.0, 0.0, 0.0], "X"), None);
        assert_eq!(dms_to_decimal([f64::INFINITY, 0.0, 0.0], "N"), None);
    }

    #[test]
    fn test_classification_priority() {
        let image = MediaKind::Image;
        assert_eq!(classify(MediaKind::Video, Path::new("Screenshot.mp4"), true), SourceClass::Video);
        assert_eq!(classify(image, Path::new("/a/Screenshot 2023-01-01.jpg"), true), SourceClass::Screenshot);
        assert_eq!(classify(image, Path::new("/a/IMG_0001.png"), true), SourceClass::Camera);
        assert_eq!(classify(image, Path::new("/a/diagram.PNG"), false), SourceClass::Screenshot);
        assert_eq!(classify(image, Path::new("/a/meme.jpg"), false), SourceClass::Web);
    }

    #[test]
    fn test_image_without_exif_uses_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download.jpg");
        write_jpeg(&path, 64, 48);

        let signature = sig(&path);
        let meta = extractor().extract(&path, MediaKind::Image, &signature);

        assert_eq!(meta.captured_at, modification_time(&signature));
        assert_eq!(meta.location, None);
        assert_eq!(meta.location_name, None);
        assert_eq!(meta.duration_seconds, None);
        assert_eq!(meta.source_class, SourceClass::Web);
    }

    #[test]
    fn test_png_without_camera_is_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        write_png(&path, 32, 32);

        let meta = extractor().extract(&path, MediaKind::Image, &sig(&path));
        assert_eq!(meta.source_class, SourceClass::Screenshot);
    }

    #[test]
    fn test_exif_capture_time_gps_and_camera() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_2040.jpg");
        write_jpeg_with_exif(
            &path,
            &ExifFixture {
                model: Some("Pixel 7"),
                taken: Some("2021:07:14 18:30:05"),
                // Sydney Opera House
                gps: Some(([33.0, 51.0, 24.0], "S", [151.0, 12.0, 54.0], "E")),
                orientation: None,
            },
        );

        let meta = extractor().extract(&path, MediaKind::Image, &sig(&path));

        let expected = NaiveDate::from_ymd_opt(2021, 7, 14).unwrap().and_hms_opt(18, 30, 5).unwrap();
        assert_eq!(meta.captured_at, expected);
        assert_eq!(meta.source_class, SourceClass::Camera);

        let point = meta.location.expect("coordinates");
        assert!(point.latitude < 0.0 && point.longitude > 0.0);
        assert!((point.latitude + 33.8567).abs() < 1e-3);
        assert_eq!(meta.location_name.as_deref(), Some("Sydney, Australia"));
    }

    #[test]
    fn test_malformed_gps_yields_no_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("half.jpg");
        write_jpeg_with_exif(
            &path,
            &ExifFixture {
                model: None,
                taken: None,
                gps: Some(([10.0, 0.0, 0.0], "N", [20.0, 0.0, 0.0], "?")),
                orientation: None,
            },
        );

        let meta = extractor().extract(&path, MediaKind::Image, &sig(&path));
        assert_eq!(meta.location, None);
        assert_eq!(meta.location_name, None);
    }

    #[test]
    fn test_video_duration_and_class() {
        let path = PathBuf::from("/videos/holiday.mov");
        let signature = ChangeSignature { modified_ns: 1_600_000_000_000_000_000, size: 10 };
        let meta = extractor().extract(&path, MediaKind::Video, &signature);

        assert_eq!(meta.duration_seconds, Some(12));
        assert_eq!(meta.source_class, SourceClass::Video);
        assert_eq!(meta.location, None);
        assert_eq!(meta.captured_at, modification_time(&signature));
    }

    #[test]
    fn test_video_creation_time_beats_mtime() {
        let probe = FakeProbe::with_duration(4.0).with_creation_time("2022-08-14T09:15:30Z");
        let extractor = MetadataExtractor::new(Arc::new(probe), Arc::new(OfflineGazetteer::default()));
        let signature = ChangeSignature { modified_ns: 1_600_000_000_000_000_000, size: 10 };

        let meta = extractor.extract(Path::new("/videos/trip.mp4"), MediaKind::Video, &signature);

        let expected = DateTime::parse_from_rfc3339("2022-08-14T09:15:30Z")
            .unwrap()
            .with_timezone(&Local)
            .naive_local();
        assert_eq!(meta.captured_at, expected);
        assert_eq!(meta.duration_seconds, Some(4));
    }

    #[test]
    fn test_video_probe_failure_gives_zero() {
        let extractor = MetadataExtractor::new(Arc::new(FakeProbe::broken()), Arc::new(OfflineGazetteer::default()));
        assert_eq!(extractor.duration(Path::new("/videos/broken.avi")), 0);
    }
}
