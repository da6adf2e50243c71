//! Request dispatch
//!
//! Every operation a caller can invoke is a variant of [`Operation`]; adapters
//! (MCP tools, CLI subcommands) build one and hand it to [`dispatch`].

use serde::{Deserialize, Serialize};

use crate::core::note::Note;
use crate::search::engine::{
    ContextPassage, RetrievalError, RetrievalResult, Retriever, SearchOutcome,
    DEFAULT_CONTEXT_LIMIT, DEFAULT_SEARCH_LIMIT,
};

/// Characters of body text kept in `find_by_partial` results.
pub const PREVIEW_CHARS: usize = 200;

pub(crate) fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

pub(crate) fn default_context_limit() -> usize {
    DEFAULT_CONTEXT_LIMIT
}

pub(crate) fn default_semantic() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Search {
        query: String,
        #[serde(default = "default_search_limit")]
        limit: usize,
        #[serde(default = "default_semantic")]
        semantic: bool,
    },
    GetNote {
        id: String,
    },
    GetTags,
    FindByPartial {
        partial_id: String,
    },
    Reindex,
    RetrieveForContext {
        query: String,
        #[serde(default = "default_context_limit")]
        limit: usize,
    },
}

/// A `find_by_partial` match with its body cut down for display.
#[derive(Debug, Clone, Serialize)]
pub struct NotePreview {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub modified: String,
    pub tags: Vec<String>,
}

impl From<Note> for NotePreview {
    fn from(note: Note) -> Self {
        Self {
            preview: note.preview(PREVIEW_CHARS),
            modified: note.modified.to_rfc3339(),
            id: note.id,
            title: note.title,
            tags: note.tags,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum OperationOutput {
    Search(SearchOutcome),
    Note(Note),
    Tags(Vec<String>),
    Partial(Vec<NotePreview>),
    Reindexed { notes_indexed: usize },
    Context(Vec<ContextPassage>),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::GetNote { .. } => "get_note",
            Self::GetTags => "get_tags",
            Self::FindByPartial { .. } => "find_by_partial",
            Self::Reindex => "reindex",
            Self::RetrieveForContext { .. } => "retrieve_for_context",
        }
    }

    /// Reject arguments no operation can do anything useful with.
    pub fn validate(&self) -> RetrievalResult<()> {
        match self {
            Self::Search { query, .. } | Self::RetrieveForContext { query, .. } => {
                require_non_empty("query", query)
            }
            Self::GetNote { id } => require_non_empty("id", id),
            Self::FindByPartial { partial_id } => require_non_empty("partial_id", partial_id),
            Self::GetTags | Self::Reindex => Ok(()),
        }
    }
}

fn require_non_empty(name: &str, value: &str) -> RetrievalResult<()> {
    if value.trim().is_empty() {
        return Err(RetrievalError::InvalidArgument(format!("{name} must not be empty")));
    }
    Ok(())
}

pub async fn dispatch(retriever: &Retriever, op: Operation) -> RetrievalResult<OperationOutput> {
    op.validate()?;
    tracing::debug!(op = op.name(), "dispatching");

    let output = match op {
        Operation::Search {
            query,
            limit,
            semantic,
        } => OperationOutput::Search(retriever.search(&query, limit, semantic).await?),
        Operation::GetNote { id } => OperationOutput::Note(retriever.get_note(&id).await?),
        Operation::GetTags => OperationOutput::Tags(retriever.get_tags().await?),
        Operation::FindByPartial { partial_id } => OperationOutput::Partial(
            retriever
                .find_by_partial(&partial_id)
                .await?
                .into_iter()
                .map(NotePreview::from)
                .collect(),
        ),
        Operation::Reindex => OperationOutput::Reindexed {
            notes_indexed: retriever.reindex().await?,
        },
        Operation::RetrieveForContext { query, limit } => {
            OperationOutput::Context(retriever.retrieve_for_context(&query, limit).await?)
        }
    };

    Ok(output)
}
