//! Bear MCP Server implementation

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::ops::{
    default_context_limit, default_search_limit, default_semantic, dispatch, Operation,
};
use crate::search::engine::Retriever;

/// Parameters for bear_search tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Free-text search query")]
    pub query: String,
    #[schemars(description = "Maximum number of results (default: 10)")]
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[schemars(description = "Use semantic search when available (default: true)")]
    #[serde(default = "default_semantic")]
    pub semantic: bool,
}

/// Parameters for bear_get_note tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetNoteParams {
    #[schemars(description = "Exact Bear note identifier")]
    pub id: String,
}

/// Parameters for bear_find_by_partial tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindByPartialParams {
    #[schemars(description = "Fragment of a note identifier or title")]
    pub partial_id: String,
}

/// Parameters for bear_retrieve_for_context tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RetrieveParams {
    #[schemars(description = "Question or topic to retrieve context for")]
    pub query: String,
    #[schemars(description = "Maximum number of passages (default: 5)")]
    #[serde(default = "default_context_limit")]
    pub limit: usize,
}

/// Bear MCP Service
#[derive(Clone)]
pub struct BearService {
    retriever: Arc<Retriever>,
    tool_router: ToolRouter<Self>,
}

impl BearService {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self {
            retriever,
            tool_router: Self::tool_router(),
        }
    }

    /// Run one operation; per-request failures become error tool results.
    async fn run(&self, op: Operation) -> Result<CallToolResult, McpError> {
        match dispatch(&self.retriever, op).await {
            Ok(output) => {
                let text = serde_json::to_string_pretty(&output).map_err(|e| {
                    McpError::internal_error(format!("JSON serialization failed: {}", e), None)
                })?;
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

#[tool_router]
impl BearService {
    #[tool(description = "Search Bear notes. Uses semantic similarity when the index is ready, otherwise keyword matching on title and body. The result reports which strategy was used.")]
    async fn bear_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let SearchParams {
            query,
            limit,
            semantic,
        } = params.0;
        self.run(Operation::Search {
            query,
            limit,
            semantic,
        })
        .await
    }

    #[tool(description = "Get a Bear note by its exact identifier, with tags and timestamps.")]
    async fn bear_get_note(
        &self,
        params: Parameters<GetNoteParams>,
    ) -> Result<CallToolResult, McpError> {
        self.run(Operation::GetNote { id: params.0.id }).await
    }

    #[tool(description = "List every tag used by a non-trashed Bear note.")]
    async fn bear_get_tags(&self) -> Result<CallToolResult, McpError> {
        self.run(Operation::GetTags).await
    }

    #[tool(description = "Find up to 10 Bear notes whose identifier or title contains the given fragment.")]
    async fn bear_find_by_partial(
        &self,
        params: Parameters<FindByPartialParams>,
    ) -> Result<CallToolResult, McpError> {
        self.run(Operation::FindByPartial {
            partial_id: params.0.partial_id,
        })
        .await
    }

    #[tool(description = "Rebuild the semantic search index from all Bear notes. Returns the number of notes indexed.")]
    async fn bear_reindex(&self) -> Result<CallToolResult, McpError> {
        self.run(Operation::Reindex).await
    }

    #[tool(description = "Retrieve semantically relevant Bear notes with similarity scores, for use as context. Fails if semantic search is not ready.")]
    async fn bear_retrieve_for_context(
        &self,
        params: Parameters<RetrieveParams>,
    ) -> Result<CallToolResult, McpError> {
        self.run(Operation::RetrieveForContext {
            query: params.0.query,
            limit: params.0.limit,
        })
        .await
    }
}

#[tool_handler]
impl ServerHandler for BearService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Bear notes MCP Server. Read-only keyword and semantic search over the local Bear database.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server on stdio
pub async fn run_mcp_server(retriever: Arc<Retriever>) -> Result<()> {
    use tokio::io::{stdin, stdout};

    let service = BearService::new(retriever);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    info!("MCP server running on stdio");
    server.waiting().await?;

    Ok(())
}
