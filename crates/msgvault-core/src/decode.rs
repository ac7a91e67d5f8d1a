//! Tiered rich-text payload decoding with per-payload memoization.
//!
//! Tier order, first success wins: structured `streamtyped` parse; external
//! property-list conversion with a string-leaf walk; raw printable-byte
//! scan. Every tier is a pure bytes-to-outcome function; the chain always
//! terminates, so an exhausted chain still yields a payload with no text
//! rather than an error. Results are memoized process-wide by a content
//! hash of the raw bytes.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use unicode_normalization::UnicodeNormalization;

use crate::config::ConverterConfig;
use crate::models::{DecodedPayload, TextRange, TextSource};
use crate::typedstream::{self, ArchivedBody};

/// Archive-internal tokens that must not be mistaken for message content
/// when walking converted property lists.
const ARCHIVE_TOKENS: &[&str] = &[
    "NSString",
    "NSMutableString",
    "NSDictionary",
    "NSAttributedString",
    "NSMutableAttributedString",
    "NSNumber",
    "NSValue",
    "NSObject",
    "NSArray",
    "NSData",
    "NSURL",
    "streamtyped",
    "__kIM",
    "MessagePart",
    "AttributeName",
];

/// Decoder with a process-wide memo table.
pub struct PayloadDecoder {
    cache: Arc<Mutex<HashMap<u64, Option<DecodedPayload>>>>,
    converter: Arc<PlistConverter>,
}

impl PayloadDecoder {
    pub fn new(converter: ConverterConfig) -> Self {
        Self {
            cache: Arc::new(Mutex::new(HashMap::new())),
            converter: Arc::new(PlistConverter {
                binary: converter.binary,
                timeout: Duration::from_millis(converter.timeout_ms),
            }),
        }
    }

    /// Decode a payload, memoized by content hash.
    ///
    /// The tier chain runs on a detached task: if the caller abandons the
    /// request mid-decode, the work still completes and populates the memo
    /// table. `None` means the payload was catastrophically unusable
    /// (empty); that verdict is cached so the expensive tiers never re-run
    /// for it.
    pub async fn decode(&self, payload: &[u8]) -> Option<DecodedPayload> {
        if payload.is_empty() {
            return None;
        }
        let key = content_hash(payload);
        if let Some(hit) = lock(&self.cache).get(&key) {
            return hit.clone();
        }

        let cache = Arc::clone(&self.cache);
        let converter = Arc::clone(&self.converter);
        let payload = payload.to_vec();
        let task = tokio::spawn(async move {
            let result = decode_uncached(&converter, &payload).await;
            // Idempotent overwrite: concurrent decodes of the same payload
            // produce equal results.
            lock(&cache).insert(key, result.clone());
            result
        });
        task.await.unwrap_or(None)
    }

    /// Drop every memoized entry. Test hook.
    pub fn clear(&self) {
        lock(&self.cache).clear();
    }
}

async fn decode_uncached(converter: &PlistConverter, payload: &[u8]) -> Option<DecodedPayload> {
    if let Some(body) = typedstream::parse(payload) {
        if let Some(text) = body.text.as_deref().and_then(clean_text) {
            return Some(assemble(text, body));
        }
    }

    if let Some(value) = converter.to_json(payload).await {
        if let Some(text) = longest_string_leaf(&value).as_deref().and_then(clean_text) {
            tracing::debug!(len = text.len(), "recovered text via plist conversion");
            return Some(DecodedPayload {
                text: Some(text),
                provenance: TextSource::LegacyExtraction,
                ..DecodedPayload::default()
            });
        }
    }

    if let Some(text) = longest_printable_run(payload).as_deref().and_then(clean_text) {
        return Some(DecodedPayload {
            text: Some(text),
            provenance: TextSource::LegacyExtraction,
            ..DecodedPayload::default()
        });
    }

    Some(DecodedPayload::default())
}

/// External property-list converter (legacy tier). The payload is piped
/// through stdin; JSON comes back on stdout. Any failure, including the
/// wall-clock timeout, just means the tier yields nothing.
struct PlistConverter {
    binary: String,
    timeout: Duration,
}

impl PlistConverter {
    async fn to_json(&self, payload: &[u8]) -> Option<serde_json::Value> {
        let mut child = AsyncCommand::new(&self.binary)
            .args(["-convert", "json", "-o", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .ok()?;

        if let Some(mut stdin) = child.stdin.take() {
            if stdin.write_all(payload).await.is_err() {
                return None;
            }
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(_)) => return None,
            Err(_) => {
                tracing::warn!(binary = %self.binary, "plist converter timed out");
                return None;
            }
        };

        if !output.status.success() {
            return None;
        }
        serde_json::from_slice(&output.stdout).ok()
    }
}

fn assemble(text: String, body: ArchivedBody) -> DecodedPayload {
    let text_len = text.len();
    let valid = |range: Option<TextRange>| {
        range.filter(|r| r.offset.saturating_add(r.length) <= text_len)
    };

    let mut payload = DecodedPayload {
        text: Some(text),
        provenance: TextSource::PrimaryParser,
        canonical_url: None,
        attachments: body.attachments,
        mentions: body.mentions,
        links: body.links,
        detected: body.detected,
    };
    for hint in &mut payload.attachments {
        hint.range = valid(hint.range);
    }
    for mention in &mut payload.mentions {
        mention.range = valid(mention.range);
    }
    for link in &mut payload.links {
        link.range = valid(link.range);
    }
    for entity in &mut payload.detected {
        entity.range = valid(entity.range);
    }
    payload.canonical_url = payload.links.first().map(|l| l.url.clone());
    payload
}

/// Clean a tier's recovered text: trim, NFC-normalize, strip control
/// characters except standard whitespace, fold paragraph/line separators to
/// `\n`. Text that is only replacement glyphs (or empty) counts as nothing
/// recovered.
pub(crate) fn clean_text(raw: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.trim().nfc() {
        match ch {
            '\u{2028}' | '\u{2029}' => cleaned.push('\n'),
            '\t' | '\n' | '\r' => cleaned.push(ch),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    let only_placeholders = cleaned
        .chars()
        .all(|c| matches!(c, '\u{FFFC}' | '\u{FFFD}') || c.is_whitespace());
    if cleaned.is_empty() || only_placeholders {
        None
    } else {
        Some(cleaned)
    }
}

/// Walk a converted property list collecting printable string leaves that
/// carry at least one letter or digit, and keep the longest.
fn longest_string_leaf(value: &serde_json::Value) -> Option<String> {
    fn walk(value: &serde_json::Value, best: &mut Option<String>) {
        match value {
            serde_json::Value::String(s) => {
                let candidate = s.trim();
                if candidate.chars().any(char::is_alphanumeric)
                    && !ARCHIVE_TOKENS.iter().any(|token| candidate.contains(token))
                    && best.as_ref().is_none_or(|b| candidate.len() > b.len())
                {
                    *best = Some(candidate.to_string());
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    walk(item, best);
                }
            }
            serde_json::Value::Object(map) => {
                for item in map.values() {
                    walk(item, best);
                }
            }
            _ => {}
        }
    }

    let mut best = None;
    walk(value, &mut best);
    best
}

/// Last-resort scan: the longest run of printable ASCII plus common
/// whitespace, ignoring runs that are nothing but `+`/`=`/whitespace
/// length-marker artifacts.
fn longest_printable_run(payload: &[u8]) -> Option<String> {
    let mut best: Option<String> = None;
    let mut run = String::new();

    let mut flush = |run: &mut String, best: &mut Option<String>| {
        let stripped = run.trim_start_matches(['+', '=', ' ', '\t', '\n', '\r']);
        if !stripped.is_empty() && best.as_ref().is_none_or(|b| stripped.len() > b.len()) {
            *best = Some(stripped.to_string());
        }
        run.clear();
    };

    for &byte in payload {
        if (0x20..=0x7E).contains(&byte) || matches!(byte, b'\t' | b'\n' | b'\r') {
            run.push(byte as char);
        } else {
            flush(&mut run, &mut best);
        }
    }
    flush(&mut run, &mut best);
    best
}

fn content_hash(payload: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "decode_tests.rs"]
mod tests;
