//! SubjectStore: SQLite-backed partitions, one table per lifecycle state.
//!
//! Every partition table shares the same column layout, so moving a subject is
//! a row copy plus deletes. Each `SubjectStore` owns one connection; separate
//! workers (threads or processes) open their own store on the same file and
//! rely on SQLite's write lock for mutual exclusion.

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ModqueueError, Result};
use crate::store::records::{Subject, SubjectKind, SubjectStatus};

/// Column list shared by every partition table, in `row_to_subject` order.
pub(crate) const SUBJECT_COLUMNS: &str = "id, uuid, name, confidence, reason, reasons, upvotes, downvotes, \
     last_scanned, last_updated, last_viewed, last_ban_check, verified_at, cleared_at, purged_at";

/// Default time a writer waits on another connection's write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistence for subjects and everything keyed by them (votes, history,
/// leaderboard aggregates).
pub struct SubjectStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SubjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectStore").finish_non_exhaustive()
    }
}

impl SubjectStore {
    /// Open or create a store at the given database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create a store with a custom busy timeout.
    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Self::init_schema(&conn)?;

        log::debug!("Opened subject store at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open a private in-memory store. Useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        let mut ddl = String::new();
        for kind in [SubjectKind::User, SubjectKind::Group] {
            for table in kind.tables() {
                ddl.push_str(&format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {table} (
                        id INTEGER PRIMARY KEY,
                        uuid TEXT NOT NULL,
                        name TEXT NOT NULL,
                        confidence REAL NOT NULL,
                        reason TEXT NOT NULL,
                        reasons TEXT NOT NULL DEFAULT '{{}}',
                        upvotes INTEGER NOT NULL DEFAULT 0,
                        downvotes INTEGER NOT NULL DEFAULT 0,
                        last_scanned INTEGER,
                        last_updated INTEGER NOT NULL,
                        last_viewed INTEGER,
                        last_ban_check INTEGER,
                        verified_at INTEGER,
                        cleared_at INTEGER,
                        purged_at INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS idx_{table}_viewed ON {table}(last_viewed);
                    CREATE INDEX IF NOT EXISTS idx_{table}_scanned ON {table}(last_scanned);
                    CREATE INDEX IF NOT EXISTS idx_{table}_ban_check ON {table}(last_ban_check);
                    "#
                ));
            }
        }

        ddl.push_str(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                kind TEXT NOT NULL,
                subject_id INTEGER NOT NULL,
                voter_id INTEGER NOT NULL,
                is_upvote INTEGER NOT NULL,
                is_verified INTEGER NOT NULL DEFAULT 0,
                is_correct INTEGER NOT NULL DEFAULT 0,
                voted_at INTEGER NOT NULL,
                PRIMARY KEY (kind, subject_id, voter_id)
            );
            CREATE INDEX IF NOT EXISTS idx_votes_unverified ON votes(kind, subject_id, is_verified);

            CREATE TABLE IF NOT EXISTS vote_stats (
                kind TEXT NOT NULL,
                subject_id INTEGER NOT NULL,
                voter_id INTEGER NOT NULL,
                is_correct INTEGER NOT NULL,
                voted_at INTEGER NOT NULL,
                verified_at INTEGER NOT NULL,
                PRIMARY KEY (kind, subject_id, voter_id)
            );
            CREATE INDEX IF NOT EXISTS idx_vote_stats_voted ON vote_stats(voted_at);

            CREATE TABLE IF NOT EXISTS review_history (
                reviewer_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                subject_id INTEGER NOT NULL,
                reviewed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_review_history_recent
                ON review_history(reviewer_id, kind, reviewed_at DESC);

            CREATE TABLE IF NOT EXISTS leaderboard (
                period TEXT NOT NULL,
                voter_id INTEGER NOT NULL,
                correct_votes INTEGER NOT NULL,
                total_votes INTEGER NOT NULL,
                accuracy REAL NOT NULL,
                last_voted_at INTEGER NOT NULL,
                PRIMARY KEY (period, voter_id)
            );
            CREATE INDEX IF NOT EXISTS idx_leaderboard_rank
                ON leaderboard(period, correct_votes DESC, accuracy DESC, last_voted_at DESC, voter_id DESC);

            CREATE TABLE IF NOT EXISTS leaderboard_refresh (
                period TEXT PRIMARY KEY,
                refreshed_at INTEGER NOT NULL DEFAULT 0,
                lease_until INTEGER NOT NULL DEFAULT 0
            );
            "#,
        );

        conn.execute_batch(&ddl)?;
        Ok(())
    }

    /// Run `f` with exclusive use of this store's connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().map_err(|e| ModqueueError::Storage(e.to_string()))?;
        f(&mut conn)
    }

    /// Insert a newly detected subject into the Flagged partition.
    ///
    /// This is the `Unflagged -> Flagged` transition. Returns false without
    /// writing when the subject already lives in any partition.
    pub fn flag(&self, kind: SubjectKind, subject: &Subject) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            if locate(&tx, kind, subject.id)?.is_some() {
                return Ok(false);
            }
            let inserted = insert_subject(&tx, SubjectStatus::Flagged.table(kind), subject)?;
            tx.commit()?;

            if inserted {
                log::info!("Flagged {} {} (confidence {:.2})", kind, subject.id, subject.confidence);
            }
            Ok(inserted)
        })
    }

    /// Get a subject and the partition it currently lives in.
    pub fn get(&self, kind: SubjectKind, id: i64) -> Result<Option<(SubjectStatus, Subject)>> {
        self.with_conn(|conn| {
            for status in SubjectStatus::ALL {
                if let Some(subject) = fetch(conn, status.table(kind), id)? {
                    return Ok(Some((status, subject)));
                }
            }
            Ok(None)
        })
    }

    /// Current lifecycle state (`None` = unflagged).
    pub fn status_of(&self, kind: SubjectKind, id: i64) -> Result<Option<SubjectStatus>> {
        self.with_conn(|conn| locate(conn, kind, id))
    }

    /// Number of partitions holding `id`. Always 0 or 1.
    pub fn partition_count(&self, kind: SubjectKind, id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let mut found = 0;
            for table in kind.tables() {
                let exists: bool = conn.query_row(
                    &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"),
                    [id],
                    |row| row.get(0),
                )?;
                if exists {
                    found += 1;
                }
            }
            Ok(found)
        })
    }

    /// Count subjects in a partition.
    pub fn count(&self, kind: SubjectKind, status: SubjectStatus) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", status.table(kind)),
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}

/// Find which partition holds `id`.
pub(crate) fn locate(conn: &Connection, kind: SubjectKind, id: i64) -> Result<Option<SubjectStatus>> {
    for status in SubjectStatus::ALL {
        let exists: bool = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", status.table(kind)),
            [id],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(Some(status));
        }
    }
    Ok(None)
}

/// Read one subject from a partition table.
pub(crate) fn fetch(conn: &Connection, table: &str, id: i64) -> Result<Option<Subject>> {
    let subject = conn
        .query_row(
            &format!("SELECT {SUBJECT_COLUMNS} FROM {table} WHERE id = ?1"),
            [id],
            row_to_subject,
        )
        .optional()?;
    Ok(subject)
}

/// Insert a subject into a partition table, ignoring an existing row.
///
/// Returns whether a row was written.
pub(crate) fn insert_subject(conn: &Connection, table: &str, subject: &Subject) -> Result<bool> {
    let reasons = serde_json::to_string(&subject.reasons)?;
    let changed = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {table} ({SUBJECT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            subject.id,
            subject.uuid,
            subject.name,
            subject.confidence,
            subject.reason,
            reasons,
            subject.upvotes,
            subject.downvotes,
            subject.last_scanned,
            subject.last_updated,
            subject.last_viewed,
            subject.last_ban_check,
            subject.verified_at,
            subject.cleared_at,
            subject.purged_at,
        ],
    )?;
    Ok(changed == 1)
}

/// Map a row selected with `SUBJECT_COLUMNS` to a `Subject`.
pub(crate) fn row_to_subject(row: &Row<'_>) -> rusqlite::Result<Subject> {
    let reasons_json: String = row.get(5)?;
    let reasons: BTreeMap<String, String> = serde_json::from_str(&reasons_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Subject {
        id: row.get(0)?,
        uuid: row.get(1)?,
        name: row.get(2)?,
        confidence: row.get(3)?,
        reason: row.get(4)?,
        reasons,
        upvotes: row.get(6)?,
        downvotes: row.get(7)?,
        last_scanned: row.get(8)?,
        last_updated: row.get(9)?,
        last_viewed: row.get(10)?,
        last_ban_check: row.get(11)?,
        verified_at: row.get(12)?,
        cleared_at: row.get(13)?,
        purged_at: row.get(14)?,
    })
}
