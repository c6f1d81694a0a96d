/// Per-file media handling
///
/// Everything the scanner does to a single file lives here:
/// - Identity and change signature (identity.rs)
/// - Image/video detection (kind.rs)
/// - EXIF, GPS and duration extraction (metadata.rs)
/// - Offline place names for coordinates (geocode.rs)
/// - ffmpeg/ffprobe wrapper (probe.rs)
/// - Thumbnail generation and storage (thumbnail.rs)

pub mod geocode;
pub mod identity;
pub mod kind;
pub mod metadata;
pub mod probe;
pub mod thumbnail;
