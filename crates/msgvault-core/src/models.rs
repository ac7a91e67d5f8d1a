//! Domain models for normalized message entities.

use serde::{Deserialize, Serialize};

/// Untyped projection of store columns for one message row.
///
/// Produced fresh per query by the store layer; consumed by normalization and
/// discarded. Optional columns that the store's schema version lacks arrive
/// as `None`.
#[derive(Debug, Clone, Default)]
pub struct RawMessageRow {
    pub rowid: i64,
    pub guid: String,
    pub is_from_me: bool,
    pub text: Option<String>,
    pub attributed_body: Option<Vec<u8>>,
    /// Store-native timestamp, unit not self-describing.
    pub date: Option<i64>,
    pub sender: Option<String>,
    pub has_attachments: bool,
    pub service: Option<String>,
    pub account: Option<String>,
    pub subject: Option<String>,
    pub associated_type: Option<i64>,
    pub associated_guid: Option<String>,
    pub expressive_effect: Option<String>,
    pub thread_originator_guid: Option<String>,
    pub reply_to_guid: Option<String>,
    pub item_type: Option<i64>,
    pub chat_id: Option<i64>,
}

/// Where a message's recovered text came from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TextSource {
    /// The plain-text column.
    #[serde(rename = "text")]
    Plain,
    /// Structured parse of the binary rich-text payload.
    #[serde(rename = "primary-parser")]
    PrimaryParser,
    /// Legacy plist conversion or raw byte scan.
    #[serde(rename = "legacy-extraction")]
    LegacyExtraction,
    /// No text could be recovered.
    #[default]
    #[serde(rename = "none")]
    None,
}

impl std::fmt::Display for TextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextSource::Plain => write!(f, "text"),
            TextSource::PrimaryParser => write!(f, "primary-parser"),
            TextSource::LegacyExtraction => write!(f, "legacy-extraction"),
            TextSource::None => write!(f, "none"),
        }
    }
}

/// Message classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Reaction,
    ReactionRemoved,
    Effect,
    Attachment,
    Unknown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Reaction => write!(f, "reaction"),
            MessageKind::ReactionRemoved => write!(f, "reaction_removed"),
            MessageKind::Effect => write!(f, "effect"),
            MessageKind::Attachment => write!(f, "attachment"),
            MessageKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Byte range into a message's recovered text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextRange {
    pub offset: usize,
    pub length: usize,
}

/// Inline attachment reference recovered from a rich-text payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentHint {
    pub transfer_guid: Option<String>,
    pub range: Option<TextRange>,
}

/// Confirmed mention recovered from a rich-text payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mention {
    pub handle: Option<String>,
    pub range: Option<TextRange>,
}

/// Link recovered from a rich-text payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkSpan {
    pub url: String,
    pub range: Option<TextRange>,
}

/// Data-detector entity recovered from a rich-text payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectedEntity {
    pub kind: String,
    pub range: Option<TextRange>,
}

/// Canonical result of rich-text decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodedPayload {
    pub text: Option<String>,
    pub provenance: TextSource,
    pub canonical_url: Option<String>,
    pub attachments: Vec<AttachmentHint>,
    pub mentions: Vec<Mention>,
    pub links: Vec<LinkSpan>,
    pub detected: Vec<DetectedEntity>,
}

/// The canonical output entity: one message, normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub rowid: i64,
    pub chat_id: Option<i64>,
    pub guid: String,
    pub is_from_me: bool,
    pub text: Option<String>,
    pub text_source: TextSource,
    pub sender: Option<String>,
    /// Canonical Unix-epoch milliseconds.
    pub timestamp_ms: Option<i64>,
    pub date_utc: Option<String>,
    pub date_local: Option<String>,
    pub has_attachments: bool,
    pub attachment_hints: Vec<AttachmentHint>,
    pub service: Option<String>,
    pub account: Option<String>,
    pub subject: Option<String>,
    pub kind: MessageKind,
    pub subtype: Option<String>,
    /// Raw reaction/effect/threading fields, preserved verbatim.
    pub metadata: serde_json::Value,
}

/// Which resolution strategy produced a [`HandleSet`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ExactHandle,
    PersonIdentity,
    ChatName,
    Substring,
    Literal,
}

/// Resolved set of handle identifiers for a participant query.
///
/// Never empty: when every strategy misses, the literal input becomes a
/// single-element set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleSet {
    pub input: String,
    pub handles: Vec<String>,
    pub strategy: ResolutionStrategy,
}

/// One chat, summarized for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: i64,
    pub guid: Option<String>,
    pub identifier: Option<String>,
    pub display_name: Option<String>,
    pub service: Option<String>,
    pub participants: Vec<String>,
    pub last_message_ms: Option<i64>,
}

/// One attachment row, resolved against the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub rowid: i64,
    pub message_rowid: i64,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub transfer_name: Option<String>,
    pub total_bytes: i64,
    pub on_disk: bool,
}

/// Envelope for message collections returned by search and context queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<NormalizedMessage>,
    /// How many candidate rows were examined to produce this page.
    pub total_considered: usize,
    pub truncated: bool,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
