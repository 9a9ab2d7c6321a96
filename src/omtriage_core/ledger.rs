use crate::omtriage_core::error::{Result, TriageError};
use crate::omtriage_core::fingerprint::Fingerprint;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Ledger file created at the root of the output directory.
pub const LEDGER_FILE_NAME: &str = ".omtriage.db";

/// Date format for ledger timestamps.
pub const DB_DATE_FORMAT: &[time::format_description::FormatItem] = time::macros::format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
);

/// Date format for capture times stored alongside an entry.
const CAPTURE_DATE_FORMAT: &[time::format_description::FormatItem] =
    time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            r#"
            CREATE TABLE IF NOT EXISTS imported (
                identity TEXT PRIMARY KEY,
                source_path TEXT NOT NULL,
                imported_at TEXT NOT NULL
            );
            "#,
        ),
        M::up(
            r#"
            ALTER TABLE imported ADD COLUMN file_size INTEGER;
            ALTER TABLE imported ADD COLUMN capture_time TEXT;
            "#,
        ),
    ])
}

/// One file confirmed as imported.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub identity: Fingerprint,
    /// Path relative to the source root at import time.
    pub source_path: PathBuf,
    pub imported_at: OffsetDateTime,
    pub file_size: Option<u64>,
    pub capture_time: Option<PrimitiveDateTime>,
}

impl LedgerEntry {
    pub fn new(identity: Fingerprint, source_path: impl Into<PathBuf>, imported_at: OffsetDateTime) -> Self {
        LedgerEntry {
            identity,
            source_path: source_path.into(),
            imported_at,
            file_size: None,
            capture_time: None,
        }
    }
}

/// Snapshot of every identity recorded in the ledger, read once per run.
#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    identities: HashSet<Fingerprint>,
}

impl LedgerView {
    pub fn contains(&self, identity: &Fingerprint) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl FromIterator<Fingerprint> for LedgerView {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        LedgerView {
            identities: iter.into_iter().collect(),
        }
    }
}

/// Summary of the ledger contents.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub total_files: u64,
    pub files_with_capture_time: u64,
    pub unique_days: u64,
    pub total_size: u64,
}

/// Append-only record of imported file identities, stored in SQLite.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open the ledger at `path`, creating it if it does not exist yet.
    ///
    /// A file that exists but cannot be read as a ledger is reported as
    /// [`TriageError::CorruptLedger`].
    pub fn open(path: &Path) -> Result<Self> {
        let existed = path.exists();
        Self::open_inner(path).map_err(|e| {
            if existed {
                TriageError::corrupt_ledger(path, e)
            } else {
                e
            }
        })
    }

    fn open_inner(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations().to_latest(&mut conn)?;

        Ok(Ledger { conn })
    }

    /// Open a ledger that lives only in memory.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations().to_latest(&mut conn)?;
        Ok(Ledger { conn })
    }

    /// Read the identities of an existing ledger without creating or changing it.
    ///
    /// An absent (or zero-length) store yields an empty view.
    pub fn load_existing(path: &Path) -> Result<LedgerView> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() == 0 => return Ok(LedgerView::default()),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No import ledger at {} yet", path.display());
                return Ok(LedgerView::default());
            }
            Err(e) => return Err(TriageError::corrupt_ledger(path, e)),
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| TriageError::corrupt_ledger(path, e))?;
        read_identities(&conn).map_err(|e| TriageError::corrupt_ledger(path, e))
    }

    /// All previously recorded identities.
    pub fn load(&self) -> Result<LedgerView> {
        read_identities(&self.conn)
    }

    pub fn contains(&self, identity: &Fingerprint) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM imported WHERE identity = ?1",
                params![identity.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record one identity. Recording an identity already present is a no-op.
    ///
    /// Returns whether a new entry was written.
    pub fn record(&mut self, identity: &Fingerprint, source_path: &Path, imported_at: OffsetDateTime) -> Result<bool> {
        let entry = LedgerEntry::new(identity.clone(), source_path, imported_at);
        Ok(self.record_item(std::slice::from_ref(&entry))? == 1)
    }

    /// Record every file of one item in a single transaction.
    ///
    /// Returns the number of identities that were not already present.
    pub fn record_item(&mut self, entries: &[LedgerEntry]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for entry in entries {
            let imported_at = format_date(&entry.imported_at)?;
            let capture_time = entry
                .capture_time
                .map(|t| {
                    t.format(CAPTURE_DATE_FORMAT)
                        .map_err(|e| TriageError::InvalidDateFormat(e.to_string()))
                })
                .transpose()?;
            inserted += tx.execute(
                "INSERT OR IGNORE INTO imported (identity, source_path, imported_at, file_size, capture_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.identity.as_str(),
                    entry.source_path.to_string_lossy(),
                    imported_at,
                    entry.file_size.map(|s| s as i64),
                    capture_time,
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM imported", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(capture_time),
                    COUNT(DISTINCT substr(capture_time, 1, 10)),
                    COALESCE(SUM(file_size), 0)
             FROM imported",
            [],
            |row| {
                Ok(LedgerStats {
                    total_files: row.get::<_, i64>(0)? as u64,
                    files_with_capture_time: row.get::<_, i64>(1)? as u64,
                    unique_days: row.get::<_, i64>(2)? as u64,
                    total_size: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}

fn read_identities(conn: &Connection) -> Result<LedgerView> {
    let mut stmt = conn.prepare("SELECT identity FROM imported")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut identities = HashSet::new();
    for row in rows {
        identities.insert(Fingerprint::from(row?));
    }
    Ok(LedgerView { identities })
}

/// Format a timestamp for storage in the ledger.
pub fn format_date(date: &OffsetDateTime) -> Result<String> {
    date.format(DB_DATE_FORMAT)
        .map_err(|e| TriageError::InvalidDateFormat(e.to_string()))
}
