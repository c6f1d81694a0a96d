/// Thumbnail artifacts
///
/// One JPEG per catalog entry, named `{identity}.jpg`, so the artifact of any
/// entry can be found, regenerated or deleted from the entry alone. The store
/// never looks at the catalog; the scanner tells it what to do.
use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::metadata;
use super::probe::{MediaProbe, ProbeError};
use crate::state::data::MediaKind;

/// Bounding box of generated thumbnails (square)
pub const THUMBNAIL_SIZE: u32 = 400;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("frame extraction failed: {0}")]
    Probe(#[from] ProbeError),
}

/// EXIF orientation, applied before downscaling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Normal,
    MirroredHorizontal,
    Rotated180,
    MirroredVertical,
    MirroredHorizontalAnd270CW,
    Rotated90CW,
    MirroredHorizontalAnd90CW,
    Rotated270CW,
}

impl Orientation {
    pub fn correct(self, img: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => img,
            Self::MirroredHorizontal => img.fliph(),
            Self::Rotated180 => img.rotate180(),
            Self::MirroredVertical => img.flipv(),
            Self::MirroredHorizontalAnd270CW => img.fliph().rotate270(),
            Self::Rotated90CW => img.rotate90(),
            Self::MirroredHorizontalAnd90CW => img.fliph().rotate90(),
            Self::Rotated270CW => img.rotate270(),
        }
    }
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            2 => Self::MirroredHorizontal,
            3 => Self::Rotated180,
            4 => Self::MirroredVertical,
            5 => Self::MirroredHorizontalAnd270CW,
            6 => Self::Rotated90CW,
            7 => Self::MirroredHorizontalAnd90CW,
            8 => Self::Rotated270CW,
            _ => Self::Normal,
        }
    }
}

/// Directory of thumbnail JPEGs keyed by identity
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    dir: PathBuf,
    size: u32,
}

impl ThumbnailStore {
    /// Open the store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ThumbnailError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            size: THUMBNAIL_SIZE,
        })
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The reference stored in the catalog for an identity
    pub fn file_name(identity: &str) -> String {
        format!("{}.jpg", identity)
    }

    /// Get the thumbnail path for an identity (doesn't generate, just returns the expected path)
    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(Self::file_name(identity))
    }

    pub fn exists(&self, identity: &str) -> bool {
        self.path_for(identity).is_file()
    }

    /// Map a stored `thumbnail_ref` to a file on disk, if it is still there
    pub fn resolve(&self, thumbnail_ref: &str) -> Option<PathBuf> {
        // Refs are bare file names; anything else is not ours
        if Path::new(thumbnail_ref).file_name() != Some(OsStr::new(thumbnail_ref)) {
            return None;
        }
        let path = self.dir.join(thumbnail_ref);
        path.is_file().then_some(path)
    }

    /// Make sure a thumbnail exists for `source`.
    ///
    /// Without `force`, an existing artifact is kept as is. Returns the
    /// reference to store in the catalog.
    pub fn ensure(
        &self,
        source: &Path,
        kind: MediaKind,
        identity: &str,
        probe: &dyn MediaProbe,
        force: bool,
    ) -> Result<String, ThumbnailError> {
        if !force && self.exists(identity) {
            return Ok(Self::file_name(identity));
        }

        let target = self.path_for(identity);
        let partial = self.dir.join(format!("{}.part", identity));

        let result = match kind {
            MediaKind::Image => self.render_image(source, &partial),
            MediaKind::Video => probe.extract_frame(source, &partial).map_err(ThumbnailError::from),
        };

        if let Err(err) = result {
            let _ = fs::remove_file(&partial);
            // An older artifact no longer matches the source
            let _ = fs::remove_file(&target);
            return Err(err);
        }

        fs::rename(&partial, &target)?;
        debug!(source = %source.display(), thumbnail = %target.display(), "generated thumbnail");
        Ok(Self::file_name(identity))
    }

    /// Delete the artifact for an identity. Failures are logged, never returned.
    pub fn remove(&self, identity: &str) {
        let path = self.path_for(identity);
        match fs::remove_file(&path) {
            Ok(()) => debug!(thumbnail = %path.display(), "removed thumbnail"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(thumbnail = %path.display(), error = %err, "could not remove thumbnail"),
        }
    }

    fn render_image(&self, source: &Path, dest: &Path) -> Result<(), ThumbnailError> {
        // Content decides the decoder, not the extension
        let img = ImageReader::open(source)?.with_guessed_format()?.decode()?;

        let orientation = metadata::orientation(source).map(Orientation::from).unwrap_or_default();
        let img = orientation.correct(img);

        // Fit inside the bounding box, never upscale
        let img = if img.width() > self.size || img.height() > self.size {
            img.resize(self.size, self.size, FilterType::Lanczos3)
        } else {
            img
        };

        // JPEG has no alpha channel
        DynamicImage::ImageRgb8(img.to_rgb8()).save_with_format(dest, ImageFormat::Jpeg)?;
        Ok(())
    }
}
