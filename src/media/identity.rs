/// File identity and change signature
///
/// The identity is a hash of the canonical path, never of the file's bytes,
/// so it can be recomputed from a catalog row and used to name artifacts.
/// The signature is whatever `stat` gives us for free: modification time
/// and size. Content changes that preserve both go unnoticed.
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Cheap fingerprint used to skip reprocessing of unchanged files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeSignature {
    /// Modification time in nanoseconds since the Unix epoch
    pub modified_ns: i64,
    /// File size in bytes
    pub size: u64,
}

/// Stable identifier for a canonical absolute path
pub fn identity(path: &Path) -> String {
    let hash = blake3::hash(path.as_os_str().as_encoded_bytes());
    hash.to_hex().to_string()
}

/// Read the change signature from filesystem metadata.
///
/// Follows symlinks. Fails if the file vanished since it was listed.
pub fn signature(path: &Path) -> io::Result<ChangeSignature> {
    let metadata = fs::metadata(path)?;
    Ok(signature_from_metadata(&metadata))
}

pub fn signature_from_metadata(metadata: &fs::Metadata) -> ChangeSignature {
    // Pre-epoch or unsupported mtimes collapse to zero
    let modified_ns = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0);

    ChangeSignature {
        modified_ns,
        size: metadata.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_identity_is_deterministic() {
        let a = identity(Path::new("/photos/2023/beach.jpg"));
        let b = identity(&PathBuf::from("/photos/2023/beach.jpg"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_depends_on_path_not_content() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one.jpg");
        let second = dir.path().join("two.jpg");
        fs::write(&first, b"same bytes").unwrap();
        fs::write(&second, b"same bytes").unwrap();

        assert_ne!(identity(&first), identity(&second));
    }

    #[cfg(unix)]
    #[test]
    fn test_identity_distinguishes_invalid_utf8_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let latin1 = Path::new(OsStr::from_bytes(b"/photos/caf\xe9.jpg"));
        let other = Path::new(OsStr::from_bytes(b"/photos/caf\xe8.jpg"));
        assert_ne!(identity(latin1), identity(other));
        // Valid UTF-8 paths hash their text as before
        assert_eq!(
            identity(Path::new("/photos/café.jpg")),
            blake3::hash("/photos/café.jpg".as_bytes()).to_hex().to_string()
        );
    }

    #[test]
    fn test_signature_tracks_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        fs::write(&file, b"1234").unwrap();
        let before = signature(&file).unwrap();
        assert_eq!(before.size, 4);

        fs::write(&file, b"123456789").unwrap();
        let after = signature(&file).unwrap();
        assert_eq!(after.size, 9);
        assert_ne!(before, after);
    }

    #[test]
    fn test_signature_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(signature(&dir.path().join("gone.jpg")).is_err());
    }
}
