use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser};
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
    transport::io::stdio,
};

use msgvault_core::{Config, Engine, SearchRequest};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn try_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .common
        .config
        .unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    let engine = Engine::open(config).await?;
    let server = McpServer::new(Arc::new(engine));
    let transport = stdio();

    server
        .serve(transport)
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}

#[derive(Debug, Parser)]
#[command(author, version, about = "MCP server for msgvault message search")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ListChatsRequest {
    #[schemars(description = "Maximum chats to return (default 20)")]
    limit: Option<i64>,
    #[schemars(description = "Pagination offset")]
    offset: Option<i64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct MessagesRequest {
    #[schemars(description = "Chat row id to read from")]
    chat_id: Option<i64>,
    #[schemars(description = "Participant (phone, email, contact or chat name)")]
    participant: Option<String>,
    #[schemars(description = "Only messages at or after this Unix-ms timestamp")]
    after_ms: Option<i64>,
    #[schemars(description = "Only messages at or before this Unix-ms timestamp")]
    before_ms: Option<i64>,
    #[schemars(description = "Maximum messages to return")]
    limit: Option<i64>,
    #[schemars(description = "Pagination offset")]
    offset: Option<i64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct SearchMessagesRequest {
    #[schemars(description = "Case-insensitive substring to search for")]
    query: String,
    #[schemars(description = "Restrict to one chat row id")]
    chat_id: Option<i64>,
    #[schemars(description = "Restrict to a participant (phone, email, contact or chat name)")]
    participant: Option<String>,
    #[schemars(description = "Only messages at or after this Unix-ms timestamp")]
    after_ms: Option<i64>,
    #[schemars(description = "Only messages at or before this Unix-ms timestamp")]
    before_ms: Option<i64>,
    #[schemars(description = "Only messages sent (true) or received (false) by the store owner")]
    from_me: Option<bool>,
    #[schemars(description = "Only messages with (true) or without (false) attachments")]
    has_attachments: Option<bool>,
    #[schemars(description = "Maximum results to return")]
    limit: Option<i64>,
    #[schemars(description = "Pagination offset")]
    offset: Option<i64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ContextRequest {
    #[schemars(description = "Anchor message row id")]
    rowid: i64,
    #[schemars(description = "Messages to include before the anchor (default 5)")]
    before: Option<i64>,
    #[schemars(description = "Messages to include after the anchor (default 5)")]
    after: Option<i64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct AttachmentsRequest {
    #[schemars(description = "Message row ids to list attachments for")]
    rowids: Vec<i64>,
    #[schemars(description = "Maximum attachments per message (0 = unlimited)")]
    per_row_cap: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ResolveParticipantRequest {
    #[schemars(description = "Participant to resolve (phone, email, contact or chat name)")]
    participant: String,
}

#[derive(Clone)]
struct McpServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

impl McpServer {
    fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }
}

fn render<T: serde::Serialize>(result: msgvault_core::Result<T>) -> String {
    let value = match result {
        Ok(value) => match serde_json::to_value(&value) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        },
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

#[tool_router]
impl McpServer {
    /// List chats, most recently active first
    #[tool(description = "Lists chats in the Messages store, most recently active first")]
    async fn list_chats(&self, Parameters(req): Parameters<ListChatsRequest>) -> String {
        render(
            self.engine
                .list_chats(req.limit.unwrap_or(20), req.offset.unwrap_or(0))
                .await,
        )
    }

    /// Read messages from a chat or participant
    #[tool(description = "Reads messages scoped to a chat id or a participant, newest first")]
    async fn get_messages(&self, Parameters(req): Parameters<MessagesRequest>) -> String {
        let request = SearchRequest {
            chat_id: req.chat_id,
            participant: req.participant,
            after_ms: req.after_ms,
            before_ms: req.before_ms,
            limit: req.limit,
            offset: req.offset.unwrap_or(0),
            ..SearchRequest::default()
        };
        render(self.engine.messages(&request).await)
    }

    /// Search message text within a mandatory scope
    #[tool(
        description = "Searches message text (including decoded rich-text bodies) within a \
                       mandatory scope: chat, participant, or time bound"
    )]
    async fn search_messages(&self, Parameters(req): Parameters<SearchMessagesRequest>) -> String {
        let request = SearchRequest {
            query: Some(req.query),
            chat_id: req.chat_id,
            participant: req.participant,
            after_ms: req.after_ms,
            before_ms: req.before_ms,
            from_me: req.from_me,
            has_attachments: req.has_attachments,
            limit: req.limit,
            offset: req.offset.unwrap_or(0),
        };
        render(self.engine.search(&request).await)
    }

    /// Conversation context around one message
    #[tool(description = "Returns the messages surrounding an anchor message, oldest first")]
    async fn message_context(&self, Parameters(req): Parameters<ContextRequest>) -> String {
        render(
            self.engine
                .context_around(req.rowid, req.before.unwrap_or(5), req.after.unwrap_or(5))
                .await,
        )
    }

    /// List attachments for messages
    #[tool(description = "Lists attachment records for the given message row ids")]
    async fn get_attachments(&self, Parameters(req): Parameters<AttachmentsRequest>) -> String {
        render(
            self.engine
                .attachments(&req.rowids, req.per_row_cap.unwrap_or(0))
                .await,
        )
    }

    /// Resolve a participant to store handles
    #[tool(
        description = "Resolves a participant (phone, email, contact or chat name) to the \
                       canonical set of store handles"
    )]
    async fn resolve_participant(
        &self,
        Parameters(req): Parameters<ResolveParticipantRequest>,
    ) -> String {
        render(self.engine.resolve_handles(&req.participant).await)
    }

    /// Report which optional store columns are available
    #[tool(description = "Reports which optional store schema features are available")]
    async fn store_capabilities(&self) -> String {
        render(self.engine.capabilities().await)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "MCP server for msgvault - scoped search over the Apple Messages store"
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}
