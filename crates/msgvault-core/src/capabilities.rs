//! Schema capability detection.
//!
//! The store's schema varies across OS versions; columns this crate relies
//! on may simply not exist. Capabilities are probed once per store path from
//! `PRAGMA table_info` output and cached by the engine; a missing column is
//! "feature unsupported", never an error.

use serde::{Deserialize, Serialize};

/// Which optional store columns exist, one flag per column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaCapabilities {
    // message table
    pub attributed_body: bool,
    pub service: bool,
    pub account: bool,
    pub subject: bool,
    pub associated_message_type: bool,
    pub associated_message_guid: bool,
    pub expressive_send_style_id: bool,
    pub thread_originator_guid: bool,
    pub reply_to_guid: bool,
    pub item_type: bool,
    // handle table
    pub person_centric_id: bool,
    pub uncanonicalized_id: bool,
    // chat table
    pub display_name: bool,
}

impl SchemaCapabilities {
    /// Derive capabilities from the probed column names of the three tables.
    pub fn from_columns(message: &[String], handle: &[String], chat: &[String]) -> Self {
        let has = |cols: &[String], name: &str| cols.iter().any(|c| c.eq_ignore_ascii_case(name));
        Self {
            attributed_body: has(message, "attributedBody"),
            service: has(message, "service"),
            account: has(message, "destination_caller_id"),
            subject: has(message, "subject"),
            associated_message_type: has(message, "associated_message_type"),
            associated_message_guid: has(message, "associated_message_guid"),
            expressive_send_style_id: has(message, "expressive_send_style_id"),
            thread_originator_guid: has(message, "thread_originator_guid"),
            reply_to_guid: has(message, "reply_to_guid"),
            item_type: has(message, "item_type"),
            person_centric_id: has(handle, "person_centric_id"),
            uncanonicalized_id: has(handle, "uncanonicalized_id"),
            display_name: has(chat, "display_name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn detects_present_columns() {
        let caps = SchemaCapabilities::from_columns(
            &cols(&["ROWID", "guid", "text", "attributedBody", "subject"]),
            &cols(&["ROWID", "id", "person_centric_id"]),
            &cols(&["ROWID", "display_name"]),
        );
        assert!(caps.attributed_body);
        assert!(caps.subject);
        assert!(caps.person_centric_id);
        assert!(caps.display_name);
    }

    #[test]
    fn missing_columns_are_unsupported_not_errors() {
        let caps = SchemaCapabilities::from_columns(
            &cols(&["ROWID", "guid", "text", "date"]),
            &cols(&["ROWID", "id"]),
            &cols(&["ROWID"]),
        );
        assert!(!caps.attributed_body);
        assert!(!caps.associated_message_type);
        assert!(!caps.thread_originator_guid);
        assert!(!caps.person_centric_id);
        assert!(!caps.display_name);
    }

    #[test]
    fn column_match_is_case_insensitive() {
        let caps = SchemaCapabilities::from_columns(
            &cols(&["attributedbody"]),
            &cols(&[]),
            &cols(&[]),
        );
        assert!(caps.attributed_body);
    }
}
