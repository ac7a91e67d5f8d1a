//! Structured parse of the `streamtyped` rich-text archive.
//!
//! The payload is a serialized NSArchiver stream carrying an
//! NSAttributedString: the body text lives in an `NSString` (or
//! `NSMutableString`) cell marked by a `0x2B` byte followed by a
//! variable-width little-endian length, and inline entity metadata hangs off
//! `__kIM…` attribute names. This parser extracts the body and the entity
//! attributes without replaying the full archive graph; anything it cannot
//! account for is left to the later decode tiers.

use crate::models::{AttachmentHint, DetectedEntity, LinkSpan, Mention, TextRange};

const HEADER: &[u8] = b"streamtyped";
const STRING_MARKER: u8 = 0x2B;

/// U+FFFC, the in-text placeholder for an inline attachment.
const OBJECT_REPLACEMENT: char = '\u{FFFC}';

const ATTR_FILE_TRANSFER: &[u8] = b"__kIMFileTransferGUIDAttributeName";
const ATTR_MENTION: &[u8] = b"__kIMMentionConfirmedMention";
const ATTR_LINK: &[u8] = b"__kIMLinkAttributeName";
const ATTR_DATA_DETECTED: &[u8] = b"__kIMDataDetectedAttributeName";

/// Everything recovered by the primary parser.
#[derive(Debug, Clone, Default)]
pub struct ArchivedBody {
    pub text: Option<String>,
    pub attachments: Vec<AttachmentHint>,
    pub mentions: Vec<Mention>,
    pub links: Vec<LinkSpan>,
    pub detected: Vec<DetectedEntity>,
}

/// Parse a rich-text payload. Returns `None` when the bytes are not a
/// `streamtyped` archive at all.
pub fn parse(payload: &[u8]) -> Option<ArchivedBody> {
    // The header sits a couple of bytes in (version prefix varies).
    let head = &payload[..payload.len().min(16)];
    find_subsequence(head, HEADER)?;

    let text = find_subsequence(payload, b"NSString")
        .and_then(|pos| marked_string(payload, pos + b"NSString".len(), 24))
        .or_else(|| {
            find_subsequence(payload, b"NSMutableString")
                .and_then(|pos| marked_string(payload, pos + b"NSMutableString".len(), 24))
        });

    let mut body = ArchivedBody {
        text,
        ..ArchivedBody::default()
    };
    collect_attachments(payload, &mut body);
    collect_mentions(payload, &mut body);
    collect_links(payload, &mut body);
    collect_detected(payload, &mut body);
    Some(body)
}

/// Decode the first `0x2B`-marked string within `window` bytes after `start`.
fn marked_string(data: &[u8], start: usize, window: usize) -> Option<String> {
    let end = (start + window).min(data.len());
    (start..end).find_map(|i| string_at_marker(data, i))
}

/// Decode a string cell whose `0x2B` marker sits at `marker_pos`.
///
/// Length encodings: one byte below 0x80; `0x81` + u16 LE; `0x82` + u24 LE.
fn string_at_marker(data: &[u8], marker_pos: usize) -> Option<String> {
    let i = marker_pos;
    if data.get(i) != Some(&STRING_MARKER) || i + 1 >= data.len() {
        return None;
    }
    let length_byte = data[i + 1];
    let (text_start, text_len) = if length_byte < 0x80 {
        (i + 2, length_byte as usize)
    } else if length_byte == 0x81 && i + 3 < data.len() {
        let len = (data[i + 2] as usize) | ((data[i + 3] as usize) << 8);
        (i + 4, len)
    } else if length_byte == 0x82 && i + 4 < data.len() {
        let len = (data[i + 2] as usize)
            | ((data[i + 3] as usize) << 8)
            | ((data[i + 4] as usize) << 16);
        (i + 5, len)
    } else {
        return None;
    };

    if text_len == 0 || text_start + text_len > data.len() {
        return None;
    }
    std::str::from_utf8(&data[text_start..text_start + text_len])
        .ok()
        .map(ToOwned::to_owned)
}

fn collect_attachments(payload: &[u8], body: &mut ArchivedBody) {
    // Each file-transfer GUID pairs, in order, with a U+FFFC placeholder in
    // the body text.
    let placeholder_ranges: Vec<TextRange> = body
        .text
        .as_deref()
        .map(|text| {
            text.char_indices()
                .filter(|(_, ch)| *ch == OBJECT_REPLACEMENT)
                .map(|(offset, ch)| TextRange {
                    offset,
                    length: ch.len_utf8(),
                })
                .collect()
        })
        .unwrap_or_default();

    for (idx, pos) in find_all(payload, ATTR_FILE_TRANSFER).into_iter().enumerate() {
        let guid = marked_string(payload, pos + ATTR_FILE_TRANSFER.len(), 64);
        body.attachments.push(AttachmentHint {
            transfer_guid: guid,
            range: placeholder_ranges.get(idx).copied(),
        });
    }
}

fn collect_mentions(payload: &[u8], body: &mut ArchivedBody) {
    for pos in find_all(payload, ATTR_MENTION) {
        let handle = marked_string(payload, pos + ATTR_MENTION.len(), 64);
        body.mentions.push(Mention {
            handle,
            range: None,
        });
    }
}

fn collect_links(payload: &[u8], body: &mut ArchivedBody) {
    for pos in find_all(payload, ATTR_LINK) {
        // The NSURL cell follows; take the first marked string that looks
        // like a URL within a generous window.
        let Some(url) = marked_string_where(payload, pos + ATTR_LINK.len(), 160, |s| {
            s.contains("://")
        }) else {
            continue;
        };
        let range = body.text.as_deref().and_then(|text| {
            text.find(&url).map(|offset| TextRange {
                offset,
                length: url.len(),
            })
        });
        body.links.push(LinkSpan { url, range });
    }
}

fn collect_detected(payload: &[u8], body: &mut ArchivedBody) {
    for _pos in find_all(payload, ATTR_DATA_DETECTED) {
        body.detected.push(DetectedEntity {
            kind: "data-detected".to_string(),
            range: None,
        });
    }
}

/// Like [`marked_string`], but keeps scanning until the predicate accepts.
fn marked_string_where(
    data: &[u8],
    start: usize,
    window: usize,
    accept: impl Fn(&str) -> bool,
) -> Option<String> {
    let end = (start + window).min(data.len());
    (start..end).find_map(|i| string_at_marker(data, i).filter(|s| accept(s)))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut offset = 0;
    while let Some(pos) = find_subsequence(&haystack[offset..], needle) {
        positions.push(offset + pos);
        offset += pos + needle.len();
    }
    positions
}

#[cfg(test)]
#[path = "typedstream_tests.rs"]
mod tests;
