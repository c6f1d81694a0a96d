/// Media kind detection
///
/// The extension decides whether a file is considered at all. For files that
/// are, the first bytes decide whether it is an image or a video, so content
/// swapped under an unchanged name is still classified correctly.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::state::data::MediaKind;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "m4v", "mkv", "webm"];

/// ISO base media brands used by still-image containers
const HEIF_BRANDS: &[&[u8; 4]] = &[b"heic", b"heix", b"hevc", b"hevx", b"mif1", b"msf1", b"avif"];

/// Kind implied by the file extension, `None` for unsupported files
pub fn from_extension(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Kind from the file's magic bytes, falling back to `fallback` when the
/// header is unreadable or unrecognised.
pub fn detect(path: &Path, fallback: MediaKind) -> MediaKind {
    let mut header = [0u8; 16];
    let read = File::open(path).and_then(|mut f| f.read(&mut header));
    match read {
        Ok(n) => sniff(&header[..n]).unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn sniff(header: &[u8]) -> Option<MediaKind> {
    if header.starts_with(&[0xFF, 0xD8, 0xFF]) || header.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(MediaKind::Image);
    }
    if header.len() >= 12 && &header[..4] == b"RIFF" {
        return match &header[8..12] {
            b"WEBP" => Some(MediaKind::Image),
            b"AVI " => Some(MediaKind::Video),
            _ => None,
        };
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        // Matroska / WebM
        return Some(MediaKind::Video);
    }
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        let brand = &header[8..12];
        return if HEIF_BRANDS.iter().any(|b| &b[..] == brand) {
            Some(MediaKind::Image)
        } else {
            Some(MediaKind::Video)
        };
    }
    None
}
