/// Catalog reconciliation
///
/// One pass walks a root directory, compares what it finds with the catalog
/// entries under that root and stages additions, updates and removals. The
/// staged delta is committed in a single transaction at the end; a pass that
/// stops early commits nothing.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::media::geocode::Gazetteer;
use crate::media::identity::{self, ChangeSignature};
use crate::media::kind;
use crate::media::metadata::MetadataExtractor;
use crate::media::probe::MediaProbe;
use crate::media::thumbnail::ThumbnailStore;
use crate::state::data::{CatalogEntry, MediaKind, ScanReport};
use crate::state::library::{CatalogDelta, CatalogRepository, LibraryError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root {path} is not accessible: {source}")]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("scan root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("scan cancelled")]
    Cancelled,

    #[error("catalog error: {0}")]
    Library(#[from] LibraryError),
}

/// Shared flag asking a running pass to stop before its next file
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Changes staged by one pass, committed only once the walk completes
#[derive(Debug, Default)]
struct StagedPass {
    /// Cataloged entries under the root not yet matched to a file on disk
    snapshot: HashMap<PathBuf, CatalogEntry>,
    delta: CatalogDelta,
    report: ScanReport,
}

impl StagedPass {
    fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            snapshot: entries.into_iter().map(|entry| (entry.path.clone(), entry)).collect(),
            ..Self::default()
        }
    }

    /// Turn unmatched snapshot entries into removals
    fn finish(mut self) -> (CatalogDelta, ScanReport) {
        for (path, stale) in self.snapshot {
            debug!(path = %path.display(), "removed");
            self.delta.removals.push(stale.identity);
            self.report.deleted += 1;
        }
        (self.delta, self.report)
    }
}

/// A supported file seen during the walk
#[derive(Debug)]
struct ObservedFile {
    path: PathBuf,
    identity: String,
    extension_kind: MediaKind,
}

/// Runs reconciliation passes against one catalog and thumbnail store
pub struct Scanner<'a, R: CatalogRepository> {
    catalog: &'a mut R,
    thumbnails: &'a ThumbnailStore,
    probe: Arc<dyn MediaProbe>,
    extractor: MetadataExtractor,
}

impl<'a, R: CatalogRepository> Scanner<'a, R> {
    pub fn new(
        catalog: &'a mut R,
        thumbnails: &'a ThumbnailStore,
        probe: Arc<dyn MediaProbe>,
        gazetteer: Arc<dyn Gazetteer>,
    ) -> Self {
        let extractor = MetadataExtractor::new(Arc::clone(&probe), gazetteer);
        Self {
            catalog,
            thumbnails,
            probe,
            extractor,
        }
    }

    /// Bring the catalog in sync with everything under `root`.
    pub fn scan(&mut self, root: &Path, cancel: &CancelToken) -> Result<ScanReport, ScanError> {
        let root = resolve_root(root)?;
        info!(root = %root.display(), "scan started");

        // 1. Snapshot what the catalog believes is under this root
        let mut pass = StagedPass::new(self.catalog.list_under_root(&root)?);
        debug!(entries = pass.snapshot.len(), "catalog snapshot loaded");

        // 2-3. Walk and classify each file against the snapshot
        for file in self.enumerate(&root) {
            if cancel.is_cancelled() {
                info!(root = %root.display(), "scan cancelled before commit");
                return Err(ScanError::Cancelled);
            }
            let signature = identity::signature(&file.path);
            self.stage_file(&mut pass, &file, signature);
        }

        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        // 4. Whatever is left in the snapshot was not seen on disk
        let (delta, report) = pass.finish();

        // 5. Commit, then clean up artifacts of removed entries
        self.catalog.apply_delta(&delta)?;
        for identity in &delta.removals {
            self.thumbnails.remove(identity);
        }

        info!(
            root = %root.display(),
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            deleted = report.deleted,
            "scan finished"
        );
        Ok(report)
    }

    /// Classify one observed file against the snapshot and stage the result
    fn stage_file(&self, pass: &mut StagedPass, file: &ObservedFile, signature: io::Result<ChangeSignature>) {
        let signature = match signature {
            Ok(signature) => signature,
            Err(err) => {
                // Not counted here. A cataloged file that vanished stays in the
                // snapshot and is removed with its artifact like any other deletion.
                debug!(path = %file.path.display(), error = %err, "file vanished before stat");
                return;
            }
        };

        match pass.snapshot.remove(&file.path) {
            None => {
                debug!(path = %file.path.display(), "added");
                pass.delta.upserts.push(self.index_file(file, signature));
                pass.report.added += 1;
            }
            Some(existing) if existing.signature == signature => match self.repair(&existing) {
                Some(repaired) => {
                    debug!(path = %file.path.display(), "repaired");
                    pass.delta.upserts.push(repaired);
                    pass.report.updated += 1;
                }
                None => pass.report.skipped += 1,
            },
            Some(_) => {
                debug!(path = %file.path.display(), "modified");
                pass.delta.upserts.push(self.index_file(file, signature));
                pass.report.updated += 1;
            }
        }
    }

    /// Supported regular files under `root`, each canonical path once
    fn enumerate<'r>(&self, root: &'r Path) -> impl Iterator<Item = ObservedFile> + 'r {
        let artifact_dir = fs::canonicalize(self.thumbnails.dir()).ok();
        let mut seen = HashSet::new();

        WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| {
                let extension_kind = kind::from_extension(entry.path())?;

                let path = match fs::canonicalize(entry.path()) {
                    Ok(path) => path,
                    Err(err) => {
                        debug!(path = %entry.path().display(), error = %err, "file vanished during walk");
                        return None;
                    }
                };

                // Catalog paths are stored as UTF-8 text
                if path.to_str().is_none() {
                    warn!(path = %path.display(), "skipping file with a non UTF-8 path");
                    return None;
                }

                // Links leading out of the root, or into our own thumbnails, don't count
                if !path.starts_with(root) {
                    return None;
                }
                if artifact_dir.as_deref().is_some_and(|dir| path.starts_with(dir)) {
                    return None;
                }
                if !seen.insert(path.clone()) {
                    return None;
                }

                Some(ObservedFile {
                    identity: identity::identity(&path),
                    path,
                    extension_kind,
                })
            })
    }

    /// Full extraction and a freshly generated thumbnail
    fn index_file(&self, file: &ObservedFile, signature: ChangeSignature) -> CatalogEntry {
        let kind = kind::detect(&file.path, file.extension_kind);
        let metadata = self.extractor.extract(&file.path, kind, &signature);
        let thumbnail_ref = self.thumbnail(&file.path, kind, &file.identity, true);

        CatalogEntry {
            identity: file.identity.clone(),
            path: file.path.clone(),
            kind,
            captured_at: metadata.captured_at,
            duration_seconds: metadata.duration_seconds,
            thumbnail_ref,
            location: metadata.location,
            location_name: metadata.location_name,
            source_class: metadata.source_class,
            signature,
        }
        .normalize()
    }

    /// Fill in what an unchanged entry is missing: a video duration or a
    /// thumbnail. Returns `None` when no repair step produced anything.
    fn repair(&self, existing: &CatalogEntry) -> Option<CatalogEntry> {
        let artifact_missing = existing.thumbnail_ref.is_none() || !self.thumbnails.exists(&existing.identity);
        let needs_duration = existing.needs_duration();
        if !artifact_missing && !needs_duration {
            return None;
        }

        let mut repaired = existing.clone();
        let mut produced = false;

        if needs_duration {
            let secs = self.extractor.duration(&existing.path);
            if secs > 0 {
                repaired.duration_seconds = Some(secs);
                produced = true;
            }
        }
        if artifact_missing {
            if let Some(reference) = self.thumbnail(&existing.path, existing.kind, &existing.identity, true) {
                repaired.thumbnail_ref = Some(reference);
                produced = true;
            }
        }

        produced.then_some(repaired)
    }

    fn thumbnail(&self, path: &Path, kind: MediaKind, identity: &str, force: bool) -> Option<String> {
        match self.thumbnails.ensure(path, kind, identity, self.probe.as_ref(), force) {
            Ok(reference) => Some(reference),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "thumbnail generation failed");
                None
            }
        }
    }
}

/// Canonicalize the root and make sure it is a directory
fn resolve_root(root: &Path) -> Result<PathBuf, ScanError> {
    let canonical = fs::canonicalize(root).map_err(|source| ScanError::RootInaccessible {
        path: root.to_path_buf(),
        source,
    })?;
    if !canonical.is_dir() {
        return Err(ScanError::RootNotDirectory(canonical));
    }
    Ok(canonical)
}
