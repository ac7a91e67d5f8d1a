//! Unit tests for normalization and classification.

use std::sync::Arc;

use super::*;
use crate::config::ConverterConfig;
use crate::models::RawMessageRow;

fn normalizer() -> Normalizer {
    let converter = ConverterConfig {
        binary: "msgvault-test-no-such-converter".to_string(),
        timeout_ms: 200,
    };
    Normalizer::new(Arc::new(PayloadDecoder::new(converter)))
}

fn typedstream_payload(text: &str) -> Vec<u8> {
    let mut buf = vec![0x04, 0x0B];
    buf.extend_from_slice(b"streamtyped");
    buf.extend_from_slice(&[0x81, 0xE8, 0x03, 0x84, 0x01, 0x40]);
    buf.extend_from_slice(b"NSString");
    buf.extend_from_slice(&[0x01, 0x94, 0x84, 0x01, 0x2B]);
    buf.push(text.len() as u8);
    buf.extend_from_slice(text.as_bytes());
    buf
}

fn row() -> RawMessageRow {
    RawMessageRow {
        rowid: 1,
        guid: "GUID-1".to_string(),
        date: Some(700_000_000_000_000_000),
        ..RawMessageRow::default()
    }
}

#[tokio::test]
async fn plain_text_wins_and_sources_as_text() {
    let mut raw = row();
    raw.text = Some("plain body".to_string());
    raw.attributed_body = Some(typedstream_payload("rich body"));

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.text.as_deref(), Some("plain body"));
    assert_eq!(msg.text_source, TextSource::Plain);
    assert_eq!(msg.kind, MessageKind::Text);
}

#[tokio::test]
async fn empty_plain_text_never_sources_as_text() {
    let mut raw = row();
    raw.text = Some("   ".to_string());
    raw.attributed_body = Some(typedstream_payload("recovered rich body"));

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.text.as_deref(), Some("recovered rich body"));
    assert_eq!(msg.text_source, TextSource::PrimaryParser);
}

#[tokio::test]
async fn no_text_anywhere_sources_as_none() {
    let msg = normalizer().normalize(row()).await;
    assert_eq!(msg.text, None);
    assert_eq!(msg.text_source, TextSource::None);
}

#[tokio::test]
async fn reaction_beats_effect() {
    let mut raw = row();
    raw.associated_type = Some(2001);
    raw.associated_guid = Some("p:0/GUID-9".to_string());
    raw.expressive_effect = Some("com.apple.messages.effect.CKConfettiEffect".to_string());

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.kind, MessageKind::Reaction);
    assert_eq!(msg.subtype.as_deref(), Some("liked"));
    // Classification loses nothing: both raw fields survive in metadata.
    assert_eq!(msg.metadata["associated_message_type"], 2001);
    assert_eq!(msg.metadata["associated_message_guid"], "p:0/GUID-9");
    assert_eq!(
        msg.metadata["expressive_send_style_id"],
        "com.apple.messages.effect.CKConfettiEffect"
    );
}

#[tokio::test]
async fn removed_reaction_codes_classify_as_removed() {
    let mut raw = row();
    raw.associated_type = Some(3003);

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.kind, MessageKind::ReactionRemoved);
    assert_eq!(msg.subtype.as_deref(), Some("laughed"));
}

#[tokio::test]
async fn effect_classifies_with_identifier_subtype() {
    let mut raw = row();
    raw.text = Some("pew pew".to_string());
    raw.expressive_effect = Some("com.apple.MobileSMS.expressivesend.impact".to_string());

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.kind, MessageKind::Effect);
    assert_eq!(
        msg.subtype.as_deref(),
        Some("com.apple.MobileSMS.expressivesend.impact")
    );
}

#[tokio::test]
async fn attachment_only_rows_classify_as_attachment() {
    let mut raw = row();
    raw.has_attachments = true;

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.kind, MessageKind::Attachment);
}

#[tokio::test]
async fn attachment_with_text_classifies_as_text() {
    let mut raw = row();
    raw.has_attachments = true;
    raw.text = Some("see photo".to_string());

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.kind, MessageKind::Text);
    assert!(msg.has_attachments);
}

#[tokio::test]
async fn unknown_only_without_any_signal() {
    let msg = normalizer().normalize(row()).await;
    assert_eq!(msg.kind, MessageKind::Unknown);
}

#[tokio::test]
async fn timestamps_project_to_iso() {
    let msg = normalizer().normalize(row()).await;
    let ms = msg.timestamp_ms.unwrap();
    assert_eq!(ms, crate::timestamp::APPLE_EPOCH_MS + 700_000_000_000);
    let utc = msg.date_utc.unwrap();
    assert!(utc.starts_with("2023-"), "unexpected projection: {utc}");
    assert!(msg.date_local.is_some());
}

#[tokio::test]
async fn missing_date_projects_nothing() {
    let mut raw = row();
    raw.date = None;

    let msg = normalizer().normalize(raw).await;
    assert_eq!(msg.timestamp_ms, None);
    assert_eq!(msg.date_utc, None);
    assert_eq!(msg.date_local, None);
}

#[tokio::test]
async fn batch_normalization_preserves_order() {
    let normalizer = normalizer();
    let rows: Vec<RawMessageRow> = (1..=4)
        .map(|i| {
            let mut raw = row();
            raw.rowid = i;
            raw.text = Some(format!("message {i}"));
            raw
        })
        .collect();

    let messages = normalizer.normalize_batch(rows).await;
    let rowids: Vec<i64> = messages.iter().map(|m| m.rowid).collect();
    assert_eq!(rowids, vec![1, 2, 3, 4]);
}
