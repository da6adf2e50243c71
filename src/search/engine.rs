//! Retrieval orchestrator - keyword search over the note store, semantic
//! search over the vector index
//!
//! Availability of the semantic path is decided once at bootstrap and again
//! after each reindex, and recorded in a [`Capability`] flag that every
//! request consults.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::embedding::{EmbedError, EmbeddingProvider};
use super::vectordb::{IndexError, VectorIndex};
use crate::core::config::IndexConfig;
use crate::core::note::Note;
use crate::core::store::{NoteStore, StoreError};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_CONTEXT_LIMIT: usize = 5;

/// What the retriever can currently serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Not bootstrapped yet.
    Unavailable,
    Initializing,
    KeywordOnly,
    SemanticReady,
}

/// Which path answered a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Semantic,
    Keyword,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("note not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("semantic search unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("background task failed: {0}")]
    Task(String),
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// A note with its similarity score, when the semantic path produced it.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub note: Note,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub strategy: Strategy,
    pub hits: Vec<SearchHit>,
}

/// A scored note for context injection.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPassage {
    #[serde(flatten)]
    pub note: Note,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieverStatus {
    pub capability: Capability,
    pub model_id: String,
    pub indexed_notes: Option<usize>,
    pub index_built_at: Option<String>,
    pub note_count: usize,
}

/// Owns the store, the embedding provider and the active index.
pub struct Retriever {
    store: Arc<NoteStore>,
    provider: Arc<EmbeddingProvider>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    capability: RwLock<Capability>,
    index_path: PathBuf,
    build_on_startup: bool,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl Retriever {
    pub fn new(store: NoteStore, provider: EmbeddingProvider, config: &IndexConfig) -> Self {
        Self {
            store: Arc::new(store),
            provider: Arc::new(provider),
            index: RwLock::new(None),
            capability: RwLock::new(Capability::Unavailable),
            index_path: config.path.clone(),
            build_on_startup: config.build_on_startup,
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Initialize the provider, then load (or build) the index.
    ///
    /// Never fails: every problem degrades to keyword-only search.
    pub async fn bootstrap(&self) -> Capability {
        self.set_capability(Capability::Initializing);

        let provider = self.provider.clone();
        let initialized = blocking(move || Ok(provider.initialize()?)).await;
        if let Err(e) = initialized {
            debug!(error = %e, "semantic search disabled");
            self.set_capability(Capability::KeywordOnly);
            return Capability::KeywordOnly;
        }

        let provider = self.provider.clone();
        let path = self.index_path.clone();
        match blocking(move || Ok(VectorIndex::load(&path, &provider)?)).await {
            Ok(index) => {
                info!(entries = index.len(), path = %self.index_path.display(), "loaded persisted index");
                self.install(index);
                return Capability::SemanticReady;
            }
            Err(e) => warn!(error = %e, "persisted index not usable"),
        }

        if self.build_on_startup {
            if let Err(e) = self.reindex().await {
                warn!(error = %e, "startup index build failed");
            }
        }

        let capability = self.capability();
        if capability != Capability::SemanticReady {
            self.set_capability(Capability::KeywordOnly);
            return Capability::KeywordOnly;
        }
        capability
    }

    pub fn capability(&self) -> Capability {
        *self
            .capability
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_capability(&self, capability: Capability) {
        *self
            .capability
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = capability;
    }

    fn current_index(&self) -> Option<Arc<VectorIndex>> {
        self.index
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a complete index as one unit.
    fn install(&self, index: VectorIndex) {
        *self
            .index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(index));
        self.set_capability(Capability::SemanticReady);
    }

    /// The active index, if the semantic path may serve requests.
    fn semantic_index(&self) -> Option<Arc<VectorIndex>> {
        if self.capability() != Capability::SemanticReady || !self.provider.is_available() {
            return None;
        }
        self.current_index()
            .filter(|index| index.is_compatible_with(&self.provider))
    }

    /// Semantic search when requested and ready, keyword search otherwise.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        semantic: bool,
    ) -> RetrievalResult<SearchOutcome> {
        if semantic {
            match self.semantic_index() {
                Some(index) => {
                    let hits = self.semantic_hits(index, query, limit).await?;
                    debug!(query, hits = hits.len(), "semantic search");
                    return Ok(SearchOutcome {
                        strategy: Strategy::Semantic,
                        hits: hits
                            .into_iter()
                            .map(|(note, score)| SearchHit {
                                note,
                                score: Some(score),
                            })
                            .collect(),
                    });
                }
                None => debug!(capability = ?self.capability(), "falling back to keyword search"),
            }
        }

        let store = self.store.clone();
        let owned_query = query.to_string();
        let notes = blocking(move || Ok(store.keyword_search(&owned_query, limit)?)).await?;
        debug!(query, hits = notes.len(), "keyword search");

        Ok(SearchOutcome {
            strategy: Strategy::Keyword,
            hits: notes
                .into_iter()
                .map(|note| SearchHit { note, score: None })
                .collect(),
        })
    }

    /// Scored semantic matches only; no keyword fallback.
    pub async fn retrieve_for_context(
        &self,
        query: &str,
        limit: usize,
    ) -> RetrievalResult<Vec<ContextPassage>> {
        let index = self.semantic_index().ok_or_else(|| {
            RetrievalError::Unavailable(format!("capability is {:?}", self.capability()))
        })?;

        let hits = self.semantic_hits(index, query, limit).await?;
        Ok(hits
            .into_iter()
            .map(|(note, score)| ContextPassage { note, score })
            .collect())
    }

    /// Embed `query`, rank against `index`, and resolve hits to live notes.
    ///
    /// Hits whose note was trashed or deleted since indexing are dropped.
    async fn semantic_hits(
        &self,
        index: Arc<VectorIndex>,
        query: &str,
        limit: usize,
    ) -> RetrievalResult<Vec<(Note, f32)>> {
        let store = self.store.clone();
        let provider = self.provider.clone();
        let query = query.to_string();

        blocking(move || {
            let vector = provider.embed(&query)?;
            let mut resolved = Vec::new();
            for hit in index.query(&vector, limit)? {
                if let Some(note) = store.find_by_id(&hit.note_id)? {
                    resolved.push((note, hit.score));
                }
            }
            Ok(resolved)
        })
        .await
    }

    /// Rebuild the index from the store, swap it in, and persist it.
    ///
    /// On failure the previous index and capability are left untouched.
    pub async fn reindex(&self) -> RetrievalResult<usize> {
        let _guard = self.rebuild_lock.lock().await;

        if !self.provider.is_available() {
            return Err(RetrievalError::Unavailable(
                "embedding provider is not initialized".to_string(),
            ));
        }

        let store = self.store.clone();
        let provider = self.provider.clone();
        let index = blocking(move || Ok(VectorIndex::rebuild(store.as_ref(), &provider)?)).await?;
        let count = index.len();
        let index = Arc::new(index);

        *self
            .index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(index.clone());
        self.set_capability(Capability::SemanticReady);

        let path = self.index_path.clone();
        if let Err(e) = blocking(move || Ok(index.save(&path)?)).await {
            warn!(error = %e, path = %self.index_path.display(), "failed to persist index");
        }

        info!(count, "reindex complete");
        Ok(count)
    }

    pub async fn get_note(&self, id: &str) -> RetrievalResult<Note> {
        let store = self.store.clone();
        let owned = id.to_string();
        blocking(move || Ok(store.find_by_id(&owned)?))
            .await?
            .ok_or_else(|| RetrievalError::NotFound(id.to_string()))
    }

    pub async fn get_tags(&self) -> RetrievalResult<Vec<String>> {
        let store = self.store.clone();
        blocking(move || Ok(store.all_tags()?)).await
    }

    pub async fn find_by_partial(&self, partial: &str) -> RetrievalResult<Vec<Note>> {
        let store = self.store.clone();
        let partial = partial.to_string();
        blocking(move || Ok(store.find_by_partial(&partial)?)).await
    }

    pub async fn status(&self) -> RetrievalResult<RetrieverStatus> {
        let store = self.store.clone();
        let note_count = blocking(move || Ok(store.note_count()?)).await?;
        let index = self.current_index();

        Ok(RetrieverStatus {
            capability: self.capability(),
            model_id: self.provider.model_id().to_string(),
            indexed_notes: index.as_ref().map(|i| i.len()),
            index_built_at: index.as_ref().map(|i| i.built_at().to_rfc3339()),
            note_count,
        })
    }
}

/// Run blocking SQLite or embedding work off the async executor.
async fn blocking<T, F>(work: F) -> RetrievalResult<T>
where
    F: FnOnce() -> RetrievalResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RetrievalError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::fixtures::BearFixture;
    use crate::search::embedding::testing::{MissingAssetsBackend, SlowBackend};
    use crate::search::embedding::HtpModel;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn index_config(dir: &TempDir, build_on_startup: bool) -> IndexConfig {
        IndexConfig {
            path: dir.path().join("index.sqlite"),
            build_on_startup,
        }
    }

    fn htp_retriever(fixture: &BearFixture, config: &IndexConfig) -> Retriever {
        let provider = EmbeddingProvider::new(Box::new(HtpModel::new()), 8000);
        Retriever::new(fixture.store(), provider, config)
    }

    #[tokio::test]
    async fn test_missing_model_falls_back_to_keyword() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();
        let provider = EmbeddingProvider::new(Box::new(MissingAssetsBackend), 8000);
        let retriever = Retriever::new(fixture.store(), provider, &index_config(&dir, true));

        assert_eq!(retriever.capability(), Capability::Unavailable);
        assert_eq!(retriever.bootstrap().await, Capability::KeywordOnly);

        let outcome = retriever.search("Project", 10, true).await?;
        assert_eq!(outcome.strategy, Strategy::Keyword);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].note.id, "A-1111");
        assert!(outcome.hits[0].score.is_none());

        assert!(matches!(
            retriever.retrieve_for_context("Project", 5).await,
            Err(RetrievalError::Unavailable(_))
        ));
        assert!(matches!(
            retriever.reindex().await,
            Err(RetrievalError::Unavailable(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_bootstrap_builds_and_persists_index() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();
        let config = index_config(&dir, true);
        let retriever = htp_retriever(&fixture, &config);

        assert_eq!(retriever.bootstrap().await, Capability::SemanticReady);
        assert!(config.path.exists());

        let outcome = retriever.search("Grocery List milk eggs", 1, true).await?;
        assert_eq!(outcome.strategy, Strategy::Semantic);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].note.id, "B-2222");
        assert_eq!(outcome.hits[0].note.tags, vec!["home"]);

        let passages = retriever.retrieve_for_context("Project Plan", 5).await?;
        assert_eq!(passages.len(), 2);
        assert!(passages.iter().all(|p| (-1.0..=1.0).contains(&p.score)));
        assert!(passages[0].score >= passages[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn test_bootstrap_loads_persisted_index() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();

        let first = htp_retriever(&fixture, &index_config(&dir, true));
        first.bootstrap().await;

        let second = htp_retriever(&fixture, &index_config(&dir, false));
        assert_eq!(second.bootstrap().await, Capability::SemanticReady);
        assert_eq!(second.status().await?.indexed_notes, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_no_index_and_no_startup_build_is_keyword_only() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();
        let retriever = htp_retriever(&fixture, &index_config(&dir, false));

        assert_eq!(retriever.bootstrap().await, Capability::KeywordOnly);
        let outcome = retriever.search("Grocery", 10, true).await?;
        assert_eq!(outcome.strategy, Strategy::Keyword);

        assert_eq!(retriever.reindex().await?, 2);
        assert_eq!(retriever.capability(), Capability::SemanticReady);
        let outcome = retriever.search("Grocery", 10, true).await?;
        assert_eq!(outcome.strategy, Strategy::Semantic);
        Ok(())
    }

    #[tokio::test]
    async fn test_reindex_twice_yields_same_notes() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();
        let retriever = htp_retriever(&fixture, &index_config(&dir, false));
        retriever.bootstrap().await;

        let ids = |r: &Retriever| {
            let mut ids: Vec<String> = r
                .current_index()
                .map(|i| i.note_ids().map(String::from).collect())
                .unwrap_or_default();
            ids.sort();
            ids
        };

        assert_eq!(retriever.reindex().await?, 2);
        let first = ids(&retriever);
        assert_eq!(retriever.reindex().await?, 2);
        assert_eq!(first, ids(&retriever));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_reindex_keeps_previous_index() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();
        let retriever = htp_retriever(&fixture, &index_config(&dir, true));
        assert_eq!(retriever.bootstrap().await, Capability::SemanticReady);

        fixture.execute("ALTER TABLE ZSFNOTE RENAME TO ZSFNOTE_GONE;");
        assert!(retriever.reindex().await.is_err());

        assert_eq!(retriever.capability(), Capability::SemanticReady);
        assert_eq!(retriever.current_index().map(|i| i.len()), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_trashed_after_indexing_is_hidden() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();
        let retriever = htp_retriever(&fixture, &index_config(&dir, true));
        retriever.bootstrap().await;

        fixture.trash("A-1111");

        let outcome = retriever.search("Project Plan", 10, true).await?;
        assert_eq!(outcome.strategy, Strategy::Semantic);
        assert!(outcome.hits.iter().all(|h| h.note.id != "A-1111"));

        let keyword = retriever.search("Project", 10, false).await?;
        assert_eq!(keyword.strategy, Strategy::Keyword);
        assert!(keyword.hits.is_empty());
        assert_eq!(retriever.get_tags().await?, vec!["home"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_limits_are_respected() -> RetrievalResult<()> {
        let fixture = BearFixture::new();
        for i in 0..20 {
            fixture.add_note(&format!("N-{i}"), &format!("Meeting {i}"), "meeting notes", i as f64);
        }
        let dir = tempfile::tempdir().unwrap();
        let retriever = htp_retriever(&fixture, &index_config(&dir, true));
        retriever.bootstrap().await;

        for limit in [0, 1, 7, 50] {
            for semantic in [true, false] {
                let outcome = retriever.search("meeting", limit, semantic).await?;
                assert!(outcome.hits.len() <= limit);
            }
        }
        assert_eq!(retriever.find_by_partial("Meeting").await?.len(), 10);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_proceed_while_reindex_runs() -> RetrievalResult<()> {
        let fixture = BearFixture::project_and_groceries();
        for i in 0..6 {
            fixture.add_note(&format!("S-{i}"), &format!("Draft {i}"), "slow to embed", i as f64);
        }
        let dir = tempfile::tempdir().unwrap();
        let provider = EmbeddingProvider::new(
            Box::new(SlowBackend {
                model: HtpModel::new(),
                delay: Duration::from_millis(300),
            }),
            8000,
        );
        let retriever = Arc::new(Retriever::new(
            fixture.store(),
            provider,
            &index_config(&dir, false),
        ));
        assert_eq!(retriever.bootstrap().await, Capability::KeywordOnly);

        let rebuilding = retriever.clone();
        let rebuild = tokio::spawn(async move { rebuilding.reindex().await });
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let outcome = retriever.search("Project", 10, false).await?;
        let note = retriever.get_note("B-2222").await?;
        let waited = started.elapsed();

        assert!(!rebuild.is_finished());
        assert!(waited < Duration::from_millis(500), "reads waited {waited:?}");
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(note.tags, vec!["home"]);

        let indexed = rebuild
            .await
            .map_err(|e| RetrievalError::Task(e.to_string()))??;
        assert_eq!(indexed, 8);
        assert_eq!(retriever.capability(), Capability::SemanticReady);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_note_not_found() {
        let fixture = BearFixture::project_and_groceries();
        let dir = tempfile::tempdir().unwrap();
        let retriever = htp_retriever(&fixture, &index_config(&dir, false));

        assert!(matches!(
            retriever.get_note("missing").await,
            Err(RetrievalError::NotFound(_))
        ));
        let note = retriever.get_note("A-1111").await.unwrap();
        assert_eq!(note.title, "Project Plan");
        assert_eq!(note.tags, vec!["work"]);
    }
}
