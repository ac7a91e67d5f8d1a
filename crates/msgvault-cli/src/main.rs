//! msgvault CLI - scoped search over the Apple Messages store

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use msgvault_core::models::{MessagePage, NormalizedMessage};
use msgvault_core::{Config, Engine, SearchRequest};

#[derive(Debug, Parser)]
#[command(
    name = "msgvault",
    author,
    version,
    about = "Normalize and search the Apple Messages store",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the store path (chat.db)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Emit raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List chats, most recently active first
    Chats {
        /// Maximum chats to list
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Pagination offset
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Read messages from a chat or participant
    Messages {
        /// Chat row id
        #[arg(long)]
        chat: Option<i64>,

        /// Participant (phone, email, contact or chat name)
        #[arg(long)]
        participant: Option<String>,

        /// Only messages after this time (e.g. "2024-01-01", "yesterday")
        #[arg(long)]
        after: Option<String>,

        /// Only messages before this time
        #[arg(long)]
        before: Option<String>,

        /// Maximum messages to return
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Pagination offset
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Search message text within a mandatory scope
    Search {
        /// Case-insensitive substring to search for
        query: String,

        /// Restrict to one chat row id
        #[arg(long)]
        chat: Option<i64>,

        /// Restrict to a participant (phone, email, contact or chat name)
        #[arg(long)]
        participant: Option<String>,

        /// Only messages after this time (e.g. "2024-01-01", "yesterday")
        #[arg(long)]
        after: Option<String>,

        /// Only messages before this time
        #[arg(long)]
        before: Option<String>,

        /// Only messages sent by the store owner
        #[arg(long)]
        from_me: bool,

        /// Only messages with attachments
        #[arg(long)]
        with_attachments: bool,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Pagination offset
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Show the messages surrounding an anchor message
    Context {
        /// Anchor message row id
        rowid: i64,

        /// Messages before the anchor
        #[arg(long, default_value = "5")]
        before: i64,

        /// Messages after the anchor
        #[arg(long, default_value = "5")]
        after: i64,
    },

    /// List attachments for message row ids
    Attachments {
        /// Message row ids
        rowids: Vec<i64>,

        /// Maximum attachments per message (0 = unlimited)
        #[arg(long, default_value = "0")]
        cap: usize,
    },

    /// Resolve a participant to store handles
    Handles {
        /// Participant (phone, email, contact or chat name)
        participant: String,
    },

    /// Report which optional store schema features are available
    Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    // Load config
    let config_path = cli.config.clone().unwrap_or_else(Config::default_config_path);
    let mut config = Config::ensure_at(&config_path)?;
    if let Some(store) = cli.store.clone() {
        config.store_path = store;
    }

    let engine = Engine::open(config).await?;

    match cli.command {
        Command::Chats { limit, offset } => {
            let chats = engine.list_chats(limit, offset).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&chats)?);
            } else {
                for chat in &chats {
                    let name = chat
                        .display_name
                        .clone()
                        .or_else(|| chat.identifier.clone())
                        .unwrap_or_else(|| "(unnamed)".to_string());
                    println!(
                        "{:>6}  {:<30}  {}",
                        chat.chat_id,
                        truncate(&name, 30),
                        chat.participants.join(", ")
                    );
                }
            }
        }
        Command::Messages {
            chat,
            participant,
            after,
            before,
            limit,
            offset,
        } => {
            let request = SearchRequest {
                chat_id: chat,
                participant,
                after_ms: parse_time(after.as_deref())?,
                before_ms: parse_time(before.as_deref())?,
                limit: Some(limit),
                offset,
                ..SearchRequest::default()
            };
            let page = engine.messages(&request).await?;
            print_page(&page, cli.json)?;
        }
        Command::Search {
            query,
            chat,
            participant,
            after,
            before,
            from_me,
            with_attachments,
            limit,
            offset,
        } => {
            let request = SearchRequest {
                query: Some(query),
                chat_id: chat,
                participant,
                after_ms: parse_time(after.as_deref())?,
                before_ms: parse_time(before.as_deref())?,
                from_me: from_me.then_some(true),
                has_attachments: with_attachments.then_some(true),
                limit: Some(limit),
                offset,
            };
            let page = engine.search(&request).await?;
            print_page(&page, cli.json)?;
        }
        Command::Context {
            rowid,
            before,
            after,
        } => {
            let page = engine.context_around(rowid, before, after).await?;
            print_page(&page, cli.json)?;
        }
        Command::Attachments { rowids, cap } => {
            let records = engine.attachments(&rowids, cap).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!(
                        "{:>6}  msg {:>6}  {:>10}B  {}  {}",
                        record.rowid,
                        record.message_rowid,
                        record.total_bytes,
                        if record.on_disk { "on-disk" } else { "missing" },
                        record.filename.as_deref().unwrap_or("(no filename)")
                    );
                }
            }
        }
        Command::Handles { participant } => {
            let set = engine.resolve_handles(&participant).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&set)?);
            } else {
                println!("{} ({:?}):", set.input, set.strategy);
                for handle in &set.handles {
                    println!("  {handle}");
                }
            }
        }
        Command::Capabilities => {
            let caps = engine.capabilities().await?;
            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
    }

    Ok(())
}

/// Parse a human time bound into canonical Unix milliseconds.
fn parse_time(input: Option<&str>) -> Result<Option<i64>> {
    let Some(input) = input else {
        return Ok(None);
    };
    let parsed = dateparser::parse(input)
        .map_err(|e| anyhow::anyhow!("cannot parse time '{input}': {e}"))?;
    Ok(Some(parsed.timestamp_millis()))
}

fn print_page(page: &MessagePage, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(page)?);
        return Ok(());
    }

    for message in &page.messages {
        print_message(message);
    }
    if page.truncated {
        println!("({} considered, more available)", page.total_considered);
    }
    Ok(())
}

fn print_message(message: &NormalizedMessage) {
    let who = if message.is_from_me {
        "me"
    } else {
        message.sender.as_deref().unwrap_or("?")
    };
    let when = message.date_local.as_deref().unwrap_or("(no date)");
    let body = match (&message.text, &message.subtype) {
        (Some(text), _) => truncate(text, 100),
        (None, Some(subtype)) => format!("[{} {}]", message.kind, subtype),
        (None, None) => format!("[{}]", message.kind),
    };
    println!("{:>8}  {}  {:<22}  {}", message.rowid, when, truncate(who, 22), body);
}

fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{cut}...")
    }
}
