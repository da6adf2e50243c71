//! Read-only accessor over the Bear SQLite database
//!
//! Bear keeps notes in a Core Data store owned by the app. This adapter never
//! writes to it: the connection is opened read-only and every query filters
//! out trashed notes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;
use tracing::warn;

use super::config::StoreConfig;
use super::note::{from_reference_seconds, IndexableNote, Note};

/// Maximum number of results returned by [`NoteStore::find_by_partial`].
pub const PARTIAL_MATCH_LIMIT: usize = 10;

/// Rows fetched per connection lock while scanning the corpus.
const SCAN_PAGE_SIZE: usize = 64;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

const NOTE_COLUMNS: &str = "Z_PK, ZUNIQUEIDENTIFIER, COALESCE(ZTITLE, ''), COALESCE(ZTEXT, ''), \
     ZCREATIONDATE, ZMODIFICATIONDATE";

const NOT_TRASHED: &str = "COALESCE(ZTRASHED, 0) = 0 AND ZUNIQUEIDENTIFIER IS NOT NULL";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("note store connection lock poisoned")]
    Poisoned,
    #[error("invalid schema identifier '{0}'")]
    InvalidIdentifier(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Anything that can stream the indexable corpus, one note at a time.
pub trait NoteSource: Send + Sync {
    /// Visits every non-trashed note exactly once. Returns the number visited.
    fn scan_indexable(&self, visit: &mut dyn FnMut(IndexableNote)) -> StoreResult<usize>;
}

/// Names of the many-to-many join between notes and tags.
///
/// Bear renumbers this table between releases (`Z_5TAGS`, `Z_7TAGS`, ...).
#[derive(Debug, Clone)]
struct TagJoin {
    table: String,
    note_column: String,
    tag_column: String,
}

impl TagJoin {
    fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        for ident in [
            &config.tag_join_table,
            &config.tag_join_note_column,
            &config.tag_join_tag_column,
        ] {
            if !IDENTIFIER_RE.is_match(ident) {
                return Err(StoreError::InvalidIdentifier(ident.clone()));
            }
        }

        Ok(Self {
            table: config.tag_join_table.clone(),
            note_column: config.tag_join_note_column.clone(),
            tag_column: config.tag_join_tag_column.clone(),
        })
    }
}

pub struct NoteStore {
    conn: Mutex<Connection>,
    join: TagJoin,
}

impl NoteStore {
    /// Open the Bear database read-only.
    ///
    /// Fails if the file is missing or does not look like a Bear store.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        Self::open_path(&config.database_path, config)
    }

    pub fn open_path(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Self::from_connection(conn, config)
    }

    /// Wrap an existing connection. The schema is probed before returning.
    pub fn from_connection(conn: Connection, config: &StoreConfig) -> StoreResult<Self> {
        let join = TagJoin::from_config(config)?;
        register_functions(&conn)?;
        conn.query_row("SELECT COUNT(*) FROM ZSFNOTE", [], |row| row.get::<_, i64>(0))?;

        Ok(Self {
            conn: Mutex::new(conn),
            join,
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Exact identifier lookup among non-trashed notes.
    pub fn find_by_id(&self, id: &str) -> StoreResult<Option<Note>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM ZSFNOTE WHERE ZUNIQUEIDENTIFIER = ?1 AND {NOT_TRASHED}"
        );
        let found = conn.query_row(&sql, params![id], note_row).optional()?;

        Ok(found.map(|(pk, note)| self.with_tags(&conn, pk, note)))
    }

    /// Notes whose identifier or title contains `fragment`, newest first.
    pub fn find_by_partial(&self, fragment: &str) -> StoreResult<Vec<Note>> {
        let conn = self.conn()?;
        let pattern = like_pattern(&fragment.to_lowercase());
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM ZSFNOTE \
             WHERE {NOT_TRASHED} \
               AND (unicode_lower(ZUNIQUEIDENTIFIER) LIKE ?1 ESCAPE '\\' \
                    OR unicode_lower(COALESCE(ZTITLE, '')) LIKE ?1 ESCAPE '\\') \
             ORDER BY ZMODIFICATIONDATE DESC \
             LIMIT ?2"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![pattern, PARTIAL_MATCH_LIMIT as i64], note_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(pk, note)| self.with_tags(&conn, pk, note))
            .collect())
    }

    /// Substring match over title and body, newest first.
    pub fn keyword_search(&self, query: &str, limit: usize) -> StoreResult<Vec<Note>> {
        let conn = self.conn()?;
        let pattern = like_pattern(query);
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM ZSFNOTE \
             WHERE {NOT_TRASHED} \
               AND (COALESCE(ZTITLE, '') LIKE ?1 ESCAPE '\\' \
                    OR COALESCE(ZTEXT, '') LIKE ?1 ESCAPE '\\') \
             ORDER BY ZMODIFICATIONDATE DESC \
             LIMIT ?2"
        );

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![pattern, limit], note_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(pk, note)| self.with_tags(&conn, pk, note))
            .collect())
    }

    /// Tags attached to the note with identifier `note_id`.
    pub fn tags_of(&self, note_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let sql = format!("SELECT Z_PK FROM ZSFNOTE WHERE ZUNIQUEIDENTIFIER = ?1 AND {NOT_TRASHED}");
        let pk: Option<i64> = conn
            .query_row(&sql, params![note_id], |row| row.get(0))
            .optional()?;

        match pk {
            Some(pk) => self.tags_for_pk(&conn, pk),
            None => Ok(Vec::new()),
        }
    }

    /// Distinct tag names attached to at least one non-trashed note, sorted.
    pub fn all_tags(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT DISTINCT t.ZTITLE FROM ZSFNOTETAG t \
             JOIN {join} j ON j.{tag_col} = t.Z_PK \
             JOIN ZSFNOTE n ON n.Z_PK = j.{note_col} \
             WHERE COALESCE(n.ZTRASHED, 0) = 0 AND t.ZTITLE IS NOT NULL \
             ORDER BY t.ZTITLE",
            join = self.join.table,
            tag_col = self.join.tag_column,
            note_col = self.join.note_column,
        );

        let mut stmt = conn.prepare(&sql)?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    /// Number of non-trashed notes.
    pub fn note_count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM ZSFNOTE WHERE {NOT_TRASHED}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn tags_for_pk(&self, conn: &Connection, pk: i64) -> StoreResult<Vec<String>> {
        let sql = format!(
            "SELECT t.ZTITLE FROM ZSFNOTETAG t \
             JOIN {join} j ON j.{tag_col} = t.Z_PK \
             WHERE j.{note_col} = ?1 AND t.ZTITLE IS NOT NULL \
             ORDER BY t.ZTITLE",
            join = self.join.table,
            tag_col = self.join.tag_column,
            note_col = self.join.note_column,
        );

        let mut stmt = conn.prepare(&sql)?;
        let tags = stmt
            .query_map(params![pk], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    /// Attach tags; a failing lookup leaves this one note untagged.
    fn with_tags(&self, conn: &Connection, pk: i64, mut note: Note) -> Note {
        note.tags = self.tags_for_pk(conn, pk).unwrap_or_else(|e| {
            warn!(note_id = %note.id, error = %e, "tag lookup failed, returning no tags");
            Vec::new()
        });
        note
    }
}

impl NoteSource for NoteStore {
    /// Reads in `SCAN_PAGE_SIZE` pages keyed on `Z_PK`; the connection is
    /// released before `visit` runs so other queries interleave with a scan.
    fn scan_indexable(&self, visit: &mut dyn FnMut(IndexableNote)) -> StoreResult<usize> {
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM ZSFNOTE \
             WHERE {NOT_TRASHED} AND Z_PK > ?1 \
             ORDER BY Z_PK \
             LIMIT ?2"
        );

        let mut visited = 0;
        let mut after = i64::MIN;
        loop {
            let page = {
                let conn = self.conn()?;
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(params![after, SCAN_PAGE_SIZE as i64], note_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let Some((last_pk, _)) = page.last() else {
                break;
            };
            after = *last_pk;
            let full = page.len() == SCAN_PAGE_SIZE;

            for (_, note) in page {
                visit(IndexableNote {
                    id: note.id,
                    title: note.title,
                    body: note.body,
                    created: note.created,
                    modified: note.modified,
                });
                visited += 1;
            }

            if !full {
                break;
            }
        }

        Ok(visited)
    }
}

/// SQLite's `LOWER` only folds ASCII; `unicode_lower` folds the full range.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

fn note_row(row: &Row<'_>) -> rusqlite::Result<(i64, Note)> {
    let created: Option<f64> = row.get(4)?;
    let modified: Option<f64> = row.get(5)?;

    Ok((
        row.get(0)?,
        Note {
            id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            created: from_reference_seconds(created.unwrap_or(0.0)),
            modified: from_reference_seconds(modified.unwrap_or(0.0)),
            tags: Vec::new(),
        },
    ))
}

/// `%fragment%` with LIKE wildcards in `fragment` escaped by `\`.
fn like_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Bear-shaped database on disk, written through a separate connection.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use tempfile::TempDir;

    pub struct BearFixture {
        _dir: TempDir,
        pub path: std::path::PathBuf,
        writer: Connection,
    }

    impl BearFixture {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("database.sqlite");
            let writer = Connection::open(&path).unwrap();
            writer
                .execute_batch(
                    r#"
                    CREATE TABLE ZSFNOTE (
                        Z_PK INTEGER PRIMARY KEY,
                        ZUNIQUEIDENTIFIER TEXT,
                        ZTITLE TEXT,
                        ZTEXT TEXT,
                        ZTRASHED INTEGER,
                        ZCREATIONDATE TIMESTAMP,
                        ZMODIFICATIONDATE TIMESTAMP
                    );
                    CREATE TABLE ZSFNOTETAG (
                        Z_PK INTEGER PRIMARY KEY,
                        ZTITLE TEXT
                    );
                    CREATE TABLE Z_5TAGS (
                        Z_5NOTES INTEGER,
                        Z_13TAGS INTEGER
                    );
                    "#,
                )
                .unwrap();

            Self {
                _dir: dir,
                path,
                writer,
            }
        }

        pub fn add_note(&self, id: &str, title: &str, body: &str, modified: f64) -> i64 {
            self.writer
                .execute(
                    "INSERT INTO ZSFNOTE (ZUNIQUEIDENTIFIER, ZTITLE, ZTEXT, ZTRASHED, ZCREATIONDATE, ZMODIFICATIONDATE) \
                     VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                    params![id, title, body, modified],
                )
                .unwrap();
            self.writer.last_insert_rowid()
        }

        pub fn tag(&self, note_pk: i64, tag: &str) {
            let existing: Option<i64> = self
                .writer
                .query_row(
                    "SELECT Z_PK FROM ZSFNOTETAG WHERE ZTITLE = ?1",
                    params![tag],
                    |row| row.get(0),
                )
                .optional()
                .unwrap();
            let tag_pk = match existing {
                Some(pk) => pk,
                None => {
                    self.writer
                        .execute("INSERT INTO ZSFNOTETAG (ZTITLE) VALUES (?1)", params![tag])
                        .unwrap();
                    self.writer.last_insert_rowid()
                }
            };
            self.writer
                .execute(
                    "INSERT INTO Z_5TAGS (Z_5NOTES, Z_13TAGS) VALUES (?1, ?2)",
                    params![note_pk, tag_pk],
                )
                .unwrap();
        }

        pub fn trash(&self, id: &str) {
            self.writer
                .execute(
                    "UPDATE ZSFNOTE SET ZTRASHED = 1 WHERE ZUNIQUEIDENTIFIER = ?1",
                    params![id],
                )
                .unwrap();
        }

        pub fn execute(&self, sql: &str) {
            self.writer.execute_batch(sql).unwrap();
        }

        pub fn store(&self) -> NoteStore {
            NoteStore::open_path(&self.path, &StoreConfig::default()).unwrap()
        }

        /// Two notes: "Project Plan" tagged work, "Grocery List" tagged home.
        pub fn project_and_groceries() -> Self {
            let fixture = Self::new();
            let a = fixture.add_note("A-1111", "Project Plan", "Milestones for the launch", 200.0);
            fixture.tag(a, "work");
            let b = fixture.add_note("B-2222", "Grocery List", "Milk, eggs, bread", 100.0);
            fixture.tag(b, "home");
            fixture
        }
    }
}
