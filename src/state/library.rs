use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use thiserror::Error;
use tracing::{debug, info};

use super::data::{Album, CatalogEntry, GeoPoint, MediaKind, SourceClass};
use crate::media::identity::ChangeSignature;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not prepare database location: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// All catalog changes staged by one scan pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogDelta {
    /// New or replaced entries
    pub upserts: Vec<CatalogEntry>,
    /// Identities of entries to delete
    pub removals: Vec<String>,
}

impl CatalogDelta {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// What the scanner needs from a catalog store
pub trait CatalogRepository {
    fn get_by_path(&self, path: &Path) -> Result<Option<CatalogEntry>>;

    /// Every entry whose path is `root` itself or lies below it
    fn list_under_root(&self, root: &Path) -> Result<Vec<CatalogEntry>>;

    /// Apply a whole delta, or nothing at all
    fn apply_delta(&mut self, delta: &CatalogDelta) -> Result<()>;
}

const ENTRY_COLUMNS: &str = "identity, path, kind, captured_at, duration_seconds, thumbnail_ref, \
     latitude, longitude, location_name, source_class, modified_ns, size_bytes";

/// The Library manages the SQLite catalog database.
/// It stores one row per indexed media file.
pub struct Library {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl Library {
    /// Open (or create) the catalog at `db_path` and initialize the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %db_path.display(), "catalog database opened");

        let library = Library {
            conn,
            db_path: Some(db_path.to_path_buf()),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Open an in-memory catalog (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let library = Library {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Create tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS media_entries (
                identity          TEXT PRIMARY KEY,
                path              TEXT NOT NULL UNIQUE,
                kind              TEXT NOT NULL,
                captured_at       TEXT NOT NULL,
                duration_seconds  INTEGER,
                thumbnail_ref     TEXT,
                latitude          REAL,
                longitude         REAL,
                location_name     TEXT,
                source_class      TEXT NOT NULL,
                modified_ns       INTEGER NOT NULL,
                size_bytes        INTEGER NOT NULL,
                CHECK ((latitude IS NULL) = (longitude IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_media_entries_captured_at
                ON media_entries(captured_at DESC);

            CREATE INDEX IF NOT EXISTS idx_media_entries_source_class
                ON media_entries(source_class);",
        )?;

        debug!("catalog schema initialized");
        Ok(())
    }

    /// Path to the database file, `None` for in-memory catalogs
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn entry_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM media_entries", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn get_by_identity(&self, identity: &str) -> Result<Option<CatalogEntry>> {
        let sql = format!("SELECT {} FROM media_entries WHERE identity = ?1", ENTRY_COLUMNS);
        let entry = self
            .conn
            .query_row(&sql, params![identity], entry_from_row)
            .optional()?;
        Ok(entry)
    }

    /// The whole collection, newest first
    pub fn list_all(&self) -> Result<Vec<CatalogEntry>> {
        self.query_entries("", params![])
    }

    /// Entries captured on a given calendar day, newest first
    pub fn list_by_capture_date(&self, date: NaiveDate) -> Result<Vec<CatalogEntry>> {
        let day = date.format("%Y-%m-%d").to_string();
        self.query_entries("WHERE date(captured_at) = ?1", params![day])
    }

    /// Entries with a given source classification, newest first
    pub fn list_by_source(&self, source: SourceClass) -> Result<Vec<CatalogEntry>> {
        self.query_entries("WHERE source_class = ?1", params![source.as_str()])
    }

    /// Entries in an album, newest first
    pub fn list_album(&self, album: Album) -> Result<Vec<CatalogEntry>> {
        match album {
            Album::All => self.list_all(),
            Album::Video => self.query_entries("WHERE kind = ?1", params![MediaKind::Video.as_str()]),
            Album::Camera => self.list_by_source(SourceClass::Camera),
            Album::Screenshot => self.list_by_source(SourceClass::Screenshot),
            Album::Web => self.list_by_source(SourceClass::Web),
        }
    }

    fn query_entries(&self, filter: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<CatalogEntry>> {
        let sql = format!(
            "SELECT {} FROM media_entries {} ORDER BY captured_at DESC, path ASC",
            ENTRY_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params, entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl CatalogRepository for Library {
    fn get_by_path(&self, path: &Path) -> Result<Option<CatalogEntry>> {
        let sql = format!("SELECT {} FROM media_entries WHERE path = ?1", ENTRY_COLUMNS);
        let entry = self
            .conn
            .query_row(&sql, params![path.to_string_lossy()], entry_from_row)
            .optional()?;
        Ok(entry)
    }

    fn list_under_root(&self, root: &Path) -> Result<Vec<CatalogEntry>> {
        let root_str = root.to_string_lossy().to_string();
        // Compare against "root/" so /photos does not match /photos2
        let prefix = if root_str.ends_with(MAIN_SEPARATOR) {
            root_str.clone()
        } else {
            format!("{}{}", root_str, MAIN_SEPARATOR)
        };
        let prefix_len = prefix.chars().count() as i64;

        let sql = format!(
            "SELECT {} FROM media_entries WHERE path = ?1 OR substr(path, 1, ?3) = ?2",
            ENTRY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![root_str, prefix, prefix_len], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn apply_delta(&mut self, delta: &CatalogDelta) -> Result<()> {
        // Dropping the transaction without commit rolls everything back
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(&format!(
                "INSERT INTO media_entries ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(identity) DO UPDATE SET
                    path = excluded.path,
                    kind = excluded.kind,
                    captured_at = excluded.captured_at,
                    duration_seconds = excluded.duration_seconds,
                    thumbnail_ref = excluded.thumbnail_ref,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    location_name = excluded.location_name,
                    source_class = excluded.source_class,
                    modified_ns = excluded.modified_ns,
                    size_bytes = excluded.size_bytes",
                ENTRY_COLUMNS
            ))?;

            for entry in &delta.upserts {
                upsert.execute(params![
                    entry.identity,
                    entry.path.to_string_lossy(),
                    entry.kind.as_str(),
                    entry.captured_at,
                    entry.duration_seconds,
                    entry.thumbnail_ref,
                    entry.location.map(|p| p.latitude),
                    entry.location.map(|p| p.longitude),
                    entry.location_name,
                    entry.source_class.as_str(),
                    entry.signature.modified_ns,
                    entry.signature.size as i64,
                ])?;
            }

            let mut remove = tx.prepare("DELETE FROM media_entries WHERE identity = ?1")?;
            for identity in &delta.removals {
                remove.execute(params![identity])?;
            }
        }
        tx.commit()?;

        debug!(
            upserts = delta.upserts.len(),
            removals = delta.removals.len(),
            "catalog delta committed"
        );
        Ok(())
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let kind: String = row.get(2)?;
    let kind = kind
        .parse::<MediaKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?;

    let latitude: Option<f64> = row.get(6)?;
    let longitude: Option<f64> = row.get(7)?;
    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
        _ => None,
    };

    let source_class: String = row.get(9)?;
    let size: i64 = row.get(11)?;

    Ok(CatalogEntry {
        identity: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        kind,
        captured_at: row.get::<_, NaiveDateTime>(3)?,
        duration_seconds: row.get(4)?,
        thumbnail_ref: row.get(5)?,
        location,
        location_name: row.get(8)?,
        source_class: SourceClass::from_stored(&source_class),
        signature: ChangeSignature {
            modified_ns: row.get(10)?,
            size: size.max(0) as u64,
        },
    })
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
