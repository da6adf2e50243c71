//! In-memory vector index with SQLite persistence
//!
//! Embeddings are stored as little-endian f32 BLOBs and similarity is
//! computed in Rust with a brute-force scan. The index is only ever built
//! whole and replaced whole.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::embedding::{cosine_similarity, EmbedError, EmbeddingProvider};
use crate::core::store::{NoteSource, StoreError};

/// Bumped whenever the on-disk layout changes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no persisted index at {0}")]
    Missing(PathBuf),
    #[error(
        "index was built with {found_model} ({found_dim} dims) but the provider is {expected_model} ({expected_dim} dims)"
    )]
    Incompatible {
        found_model: String,
        found_dim: usize,
        expected_model: String,
        expected_dim: usize,
    },
    #[error("query vector has {found} dimensions, index has {expected}")]
    DimensionMismatch { found: usize, expected: usize },
    #[error("corrupt index: {0}")]
    Corrupt(String),
    #[error("embedding provider unavailable")]
    ProviderUnavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One indexed note.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub note_id: String,
    pub title: String,
    pub modified: DateTime<Utc>,
    pub vector: Vec<f32>,
}

/// A ranked index entry.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub note_id: String,
    pub title: String,
    pub modified: DateTime<Utc>,
    pub score: f32,
}

/// Embeddings for the whole corpus, all produced by one model.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_id: String,
    dimension: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Assemble an index from entries. Entries with the wrong dimension are rejected.
    pub fn from_entries(
        model_id: impl Into<String>,
        dimension: usize,
        entries: Vec<IndexEntry>,
    ) -> Result<Self, IndexError> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimension) {
            return Err(IndexError::Corrupt(format!(
                "entry {} has {} dimensions, expected {}",
                bad.note_id,
                bad.vector.len(),
                dimension
            )));
        }

        Ok(Self {
            model_id: model_id.into(),
            dimension,
            built_at: Utc::now(),
            entries,
        })
    }

    /// Build a fresh index from every note in `source`.
    ///
    /// A note whose embedding fails is skipped. If the provider is (or becomes)
    /// unavailable the whole build is abandoned.
    pub fn rebuild(source: &dyn NoteSource, provider: &EmbeddingProvider) -> Result<Self, IndexError> {
        if !provider.is_available() {
            return Err(IndexError::ProviderUnavailable);
        }

        let start = std::time::Instant::now();
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut skipped = 0usize;
        let mut aborted = false;

        let scanned = source.scan_indexable(&mut |note| {
            if aborted {
                return;
            }
            if !seen.insert(note.id.clone()) {
                warn!(note_id = %note.id, "duplicate note identifier, keeping first");
                return;
            }

            match provider.embed_document(&note.title, &note.body) {
                Ok(vector) => entries.push(IndexEntry {
                    note_id: note.id,
                    title: note.title,
                    modified: note.modified,
                    vector,
                }),
                Err(EmbedError::Unavailable) => aborted = true,
                Err(e) => {
                    warn!(note_id = %note.id, error = %e, "skipping note, embedding failed");
                    skipped += 1;
                }
            }
        })?;

        if aborted {
            return Err(IndexError::ProviderUnavailable);
        }

        info!(
            scanned,
            indexed = entries.len(),
            skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "vector index built"
        );

        Self::from_entries(provider.model_id(), provider.dimension(), entries)
    }

    /// Restore a persisted index, refusing one stamped by a different model.
    pub fn load(path: &Path, provider: &EmbeddingProvider) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::Missing(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let version: u32 = parse_meta(&conn, "format_version")?;
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }

        let model_id: String = parse_meta(&conn, "model_id")?;
        let dimension: usize = parse_meta(&conn, "dimension")?;
        if model_id != provider.model_id() || dimension != provider.dimension() {
            return Err(IndexError::Incompatible {
                found_model: model_id,
                found_dim: dimension,
                expected_model: provider.model_id().to_string(),
                expected_dim: provider.dimension(),
            });
        }
        let built_at = DateTime::parse_from_rfc3339(&parse_meta::<String>(&conn, "built_at")?)
            .map_err(|e| IndexError::Corrupt(format!("built_at: {e}")))?
            .with_timezone(&Utc);

        let mut stmt = conn.prepare("SELECT note_id, title, modified_us, embedding FROM entries")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (note_id, title, modified_us, blob) = row?;
            if blob.len() != dimension * 4 {
                return Err(IndexError::Corrupt(format!(
                    "entry {note_id} has a {} byte vector, expected {}",
                    blob.len(),
                    dimension * 4
                )));
            }
            let modified = DateTime::from_timestamp_micros(modified_us).ok_or_else(|| {
                IndexError::Corrupt(format!("entry {note_id} has an invalid timestamp"))
            })?;
            entries.push(IndexEntry {
                note_id,
                title,
                modified,
                vector: blob_to_embedding(&blob),
            });
        }

        let mut index = Self::from_entries(model_id, dimension, entries)?;
        index.built_at = built_at;
        debug!(path = %path.display(), entries = index.len(), "vector index loaded");
        Ok(index)
    }

    /// Persist to `path`, replacing any previous file only once fully written.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = temp_path(path);
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        {
            let mut conn = Connection::open(&tmp_path)?;
            conn.execute_batch(
                r#"
                CREATE TABLE index_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE entries (
                    note_id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    modified_us INTEGER NOT NULL,
                    embedding BLOB NOT NULL
                );
                "#,
            )?;

            let tx = conn.transaction()?;
            for (key, value) in [
                ("format_version", FORMAT_VERSION.to_string()),
                ("model_id", self.model_id.clone()),
                ("dimension", self.dimension.to_string()),
                ("built_at", self.built_at.to_rfc3339()),
            ] {
                tx.execute(
                    "INSERT INTO index_meta (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
            }
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO entries (note_id, title, modified_us, embedding) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for entry in &self.entries {
                    stmt.execute(params![
                        entry.note_id,
                        entry.title,
                        entry.modified.timestamp_micros(),
                        embedding_to_blob(&entry.vector),
                    ])?;
                }
            }
            tx.commit()?;
        }

        fs::rename(&tmp_path, path)?;
        info!(path = %path.display(), entries = self.len(), "vector index saved");
        Ok(())
    }

    /// The `k` entries most similar to `vector`, best first.
    ///
    /// Equal scores are ordered by most recent modification.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                found: vector.len(),
                expected: self.dimension,
            });
        }

        let mut scored: Vec<(&IndexEntry, f32)> = self
            .entries
            .iter()
            .map(|entry| (entry, cosine_similarity(vector, &entry.vector)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.modified.cmp(&a.0.modified))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(entry, score)| IndexHit {
                note_id: entry.note_id.clone(),
                title: entry.title.clone(),
                modified: entry.modified,
                score,
            })
            .collect())
    }

    pub fn is_compatible_with(&self, provider: &EmbeddingProvider) -> bool {
        self.model_id == provider.model_id() && self.dimension == provider.dimension()
    }

    pub fn note_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.note_id.as_str())
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read and parse one `index_meta` value.
fn parse_meta<T: std::str::FromStr>(conn: &Connection, key: &str) -> Result<T, IndexError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    raw.ok_or_else(|| IndexError::Corrupt(format!("missing {key}")))?
        .parse()
        .map_err(|_| IndexError::Corrupt(format!("unparseable {key}")))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Convert f32 embedding to BLOB
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
