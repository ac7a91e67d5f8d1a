//! Unit tests for the tiered payload decoder.

use super::*;
use crate::models::TextSource;

fn test_converter() -> ConverterConfig {
    // A binary that cannot exist, so the legacy tier always falls through
    // deterministically in tests.
    ConverterConfig {
        binary: "msgvault-test-no-such-converter".to_string(),
        timeout_ms: 200,
    }
}

fn decoder() -> PayloadDecoder {
    PayloadDecoder::new(test_converter())
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

mod clean_text_tests {
    use super::*;

    #[test]
    fn trims_and_keeps_plain_text() {
        assert_eq!(clean_text("  hello  ").as_deref(), Some("hello"));
    }

    #[test]
    fn strips_control_characters_but_keeps_whitespace() {
        assert_eq!(clean_text("a\u{0000}b\tc\nd").as_deref(), Some("ab\tc\nd"));
    }

    #[test]
    fn folds_line_and_paragraph_separators() {
        assert_eq!(clean_text("a\u{2028}b\u{2029}c").as_deref(), Some("a\nb\nc"));
    }

    #[test]
    fn composes_to_nfc() {
        // e + combining acute composes to a single code point.
        assert_eq!(clean_text("caf\u{0065}\u{0301}").as_deref(), Some("café"));
    }

    #[test]
    fn replacement_only_text_is_nothing() {
        assert_eq!(clean_text("\u{FFFC}"), None);
        assert_eq!(clean_text("\u{FFFD}\u{FFFD} \u{FFFC}"), None);
        assert_eq!(clean_text("   "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn replacement_mixed_with_real_text_survives() {
        assert_eq!(
            clean_text("photo \u{FFFC} attached").as_deref(),
            Some("photo \u{FFFC} attached")
        );
    }
}

#[tokio::test]
async fn primary_tier_sets_primary_provenance() {
    let decoder = decoder();
    let payload = typedstream_payload("decoded by the archive parser");
    let decoded = decoder.decode(&payload).await.unwrap();
    assert_eq!(decoded.text.as_deref(), Some("decoded by the archive parser"));
    assert_eq!(decoded.provenance, TextSource::PrimaryParser);
}

#[tokio::test]
async fn raw_scan_reports_legacy_provenance() {
    let decoder = decoder();
    // Not an archive; the printable run is the only recoverable text.
    let mut payload = vec![0x00, 0x01, 0x02];
    payload.extend_from_slice(b"buried plain text here");
    payload.extend_from_slice(&[0xFE, 0xFF]);
    let decoded = decoder.decode(&payload).await.unwrap();
    assert_eq!(decoded.text.as_deref(), Some("buried plain text here"));
    assert_eq!(decoded.provenance, TextSource::LegacyExtraction);
}

#[tokio::test]
async fn artifact_only_runs_are_discarded() {
    let decoder = decoder();
    let mut payload = vec![0x00];
    payload.extend_from_slice(b"++==  \t ");
    payload.push(0x00);
    let decoded = decoder.decode(&payload).await.unwrap();
    assert_eq!(decoded.text, None);
    assert_eq!(decoded.provenance, TextSource::None);
}

#[tokio::test]
async fn exhausted_tiers_yield_payload_without_text() {
    let decoder = decoder();
    let payload = vec![0x00, 0x01, 0x02, 0x03];
    let decoded = decoder.decode(&payload).await.unwrap();
    assert_eq!(decoded.text, None);
    assert_eq!(decoded.provenance, TextSource::None);
    assert!(decoded.attachments.is_empty());
}

#[tokio::test]
async fn empty_payload_is_catastrophic_and_cached() {
    let decoder = decoder();
    assert!(decoder.decode(&[]).await.is_none());
    assert!(decoder.decode(&[]).await.is_none());
}

#[tokio::test]
async fn decode_is_deterministic_and_memoized() {
    let decoder = decoder();
    let payload = typedstream_payload("same bytes, same answer");
    let first = decoder.decode(&payload).await;
    let second = decoder.decode(&payload).await;
    assert_eq!(first, second);

    // Clearing the memo and re-decoding still gives a structurally equal
    // result.
    decoder.clear();
    let third = decoder.decode(&payload).await;
    assert_eq!(first, third);
}

#[tokio::test]
async fn primary_text_that_cleans_to_nothing_falls_through() {
    let decoder = decoder();
    // The archive parses but its body is a lone object-replacement char;
    // the raw scan then finds only structure tokens, which include letters,
    // so text recovery falls to whatever the scan yields.
    let payload = typedstream_payload("\u{FFFC}");
    let decoded = decoder.decode(&payload).await.unwrap();
    assert_ne!(decoded.provenance, TextSource::PrimaryParser);
}
