//! msgvault-core: Message normalization and scoped search over the Apple
//! Messages store.
//!
//! This crate reads a `chat.db` SQLite store read-only, normalizes its
//! schema-evolving rows into stable typed messages (including tiered decoding
//! of binary `attributedBody` payloads), and runs bounded, scoped search over
//! them.

pub mod capabilities;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod identity;
pub mod models;
pub mod normalize;
pub mod search;
pub mod store;
pub mod timestamp;
pub mod typedstream;

pub use config::Config;
pub use engine::Engine;
pub use error::Error;
pub use error::Result;
pub use search::SearchRequest;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "msgvault";
