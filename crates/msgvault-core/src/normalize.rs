//! Row normalization and message-type classification.

use std::sync::Arc;

use chrono::{Local, TimeZone, Utc};

use crate::decode::{PayloadDecoder, clean_text};
use crate::models::{MessageKind, NormalizedMessage, RawMessageRow, TextSource};
use crate::timestamp;

/// Reaction codes the store writes for tapbacks. The 3000-band codes are the
/// "removed" counterparts of the 2000-band codes.
const REACTION_ADD_BASE: i64 = 2000;
const REACTION_REMOVE_BASE: i64 = 3000;

fn reaction_subtype(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("loved"),
        1 => Some("liked"),
        2 => Some("disliked"),
        3 => Some("laughed"),
        4 => Some("emphasized"),
        5 => Some("questioned"),
        _ => None,
    }
}

/// Turns raw rows into [`NormalizedMessage`] values, decoding rich-text
/// payloads as needed.
pub struct Normalizer {
    decoder: Arc<PayloadDecoder>,
}

impl Normalizer {
    pub fn new(decoder: Arc<PayloadDecoder>) -> Self {
        Self { decoder }
    }

    /// Normalize one row.
    pub async fn normalize(&self, row: RawMessageRow) -> NormalizedMessage {
        // Text resolution order: plain column, then decoded rich text.
        let plain = row.text.as_deref().and_then(clean_text);
        let mut text = plain;
        let mut text_source = if text.is_some() {
            TextSource::Plain
        } else {
            TextSource::None
        };
        let mut attachment_hints = Vec::new();

        if text.is_none() {
            if let Some(body) = &row.attributed_body {
                if let Some(decoded) = self.decoder.decode(body).await {
                    text = decoded.text;
                    text_source = if text.is_some() {
                        decoded.provenance
                    } else {
                        TextSource::None
                    };
                    attachment_hints = decoded.attachments;
                }
            }
        }

        let timestamp_ms = timestamp::to_canonical_ms(row.date);
        let (date_utc, date_local) = iso_projections(timestamp_ms);
        let (kind, subtype) = classify(&row, text.is_some());
        let metadata = metadata_bag(&row);

        NormalizedMessage {
            rowid: row.rowid,
            chat_id: row.chat_id,
            guid: row.guid,
            is_from_me: row.is_from_me,
            text,
            text_source,
            sender: row.sender,
            timestamp_ms,
            date_utc,
            date_local,
            has_attachments: row.has_attachments,
            attachment_hints,
            service: row.service,
            account: row.account,
            subject: row.subject,
            kind,
            subtype,
            metadata,
        }
    }

    /// Normalize a batch; per-row decodes run concurrently and join before
    /// the batch is assembled.
    pub async fn normalize_batch(&self, rows: Vec<RawMessageRow>) -> Vec<NormalizedMessage> {
        futures::future::join_all(rows.into_iter().map(|row| self.normalize(row))).await
    }
}

/// Classification precedence: reaction semantics dominate (a reaction row
/// may also carry an effect field), then effect, attachment, text.
fn classify(row: &RawMessageRow, has_text: bool) -> (MessageKind, Option<String>) {
    if let Some(code) = row.associated_type {
        if let Some(subtype) = reaction_subtype(code - REACTION_ADD_BASE) {
            return (MessageKind::Reaction, Some(subtype.to_string()));
        }
        if let Some(subtype) = reaction_subtype(code - REACTION_REMOVE_BASE) {
            return (MessageKind::ReactionRemoved, Some(subtype.to_string()));
        }
    }
    if let Some(effect) = &row.expressive_effect {
        if !effect.is_empty() {
            return (MessageKind::Effect, Some(effect.clone()));
        }
    }
    if row.has_attachments && !has_text {
        return (MessageKind::Attachment, None);
    }
    if has_text {
        return (MessageKind::Text, None);
    }
    (MessageKind::Unknown, None)
}

/// Raw reaction/effect/threading identifiers, preserved verbatim so
/// classification loses nothing.
fn metadata_bag(row: &RawMessageRow) -> serde_json::Value {
    let mut bag = serde_json::Map::new();
    if let Some(code) = row.associated_type {
        bag.insert("associated_message_type".to_string(), code.into());
    }
    if let Some(guid) = &row.associated_guid {
        bag.insert("associated_message_guid".to_string(), guid.clone().into());
    }
    if let Some(effect) = &row.expressive_effect {
        bag.insert("expressive_send_style_id".to_string(), effect.clone().into());
    }
    if let Some(guid) = &row.thread_originator_guid {
        bag.insert("thread_originator_guid".to_string(), guid.clone().into());
    }
    if let Some(guid) = &row.reply_to_guid {
        bag.insert("reply_to_guid".to_string(), guid.clone().into());
    }
    if let Some(item_type) = row.item_type {
        bag.insert("item_type".to_string(), item_type.into());
    }
    serde_json::Value::Object(bag)
}

fn iso_projections(timestamp_ms: Option<i64>) -> (Option<String>, Option<String>) {
    let Some(ms) = timestamp_ms else {
        return (None, None);
    };
    let Some(utc) = Utc.timestamp_millis_opt(ms).single() else {
        return (None, None);
    };
    (
        Some(utc.to_rfc3339()),
        Some(utc.with_timezone(&Local).to_rfc3339()),
    )
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;
