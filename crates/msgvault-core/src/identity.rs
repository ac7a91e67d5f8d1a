//! Participant-to-handle resolution.
//!
//! A phone or email handle is not a stable identity: the same person may
//! appear under several handles. Resolution therefore expands through the
//! store's person-identity grouping when one exists, and always degrades to
//! the literal input rather than failing.

use crate::capabilities::SchemaCapabilities;
use crate::error::Result;
use crate::models::{HandleSet, ResolutionStrategy};
use crate::store::Store;

/// How many handles a substring match may return.
const SUBSTRING_CAP: i64 = 8;

/// Resolve a participant string to its canonical handle set.
///
/// Strategy chain, first success wins: exact handle match (expanded through
/// the person-identity group where available), exact chat display-name
/// match, capped substring match, literal fallback.
pub async fn resolve_handles(
    store: &Store,
    caps: &SchemaCapabilities,
    participant: &str,
) -> Result<HandleSet> {
    let participant = participant.trim();

    let exact = store.exact_handles(caps, participant).await?;
    if !exact.is_empty() {
        let mut handles = Vec::new();
        let mut expanded = false;
        for (id, person) in &exact {
            push_unique(&mut handles, id.clone());
            if caps.person_centric_id {
                if let Some(person) = person.as_deref().filter(|p| !p.is_empty()) {
                    for grouped in store.handles_for_person(person).await? {
                        expanded |= push_unique(&mut handles, grouped);
                    }
                }
            }
        }
        let strategy = if expanded {
            ResolutionStrategy::PersonIdentity
        } else {
            ResolutionStrategy::ExactHandle
        };
        return Ok(HandleSet {
            input: participant.to_string(),
            handles,
            strategy,
        });
    }

    let by_chat = store.handles_for_chat_name(caps, participant).await?;
    if !by_chat.is_empty() {
        return Ok(HandleSet {
            input: participant.to_string(),
            handles: by_chat,
            strategy: ResolutionStrategy::ChatName,
        });
    }

    let fuzzy = store.handles_like(participant, SUBSTRING_CAP).await?;
    if !fuzzy.is_empty() {
        return Ok(HandleSet {
            input: participant.to_string(),
            handles: fuzzy,
            strategy: ResolutionStrategy::Substring,
        });
    }

    // Best effort, not a failure: the caller may know a handle the store
    // has never seen.
    Ok(HandleSet {
        input: participant.to_string(),
        handles: vec![participant.to_string()],
        strategy: ResolutionStrategy::Literal,
    })
}

fn push_unique(handles: &mut Vec<String>, candidate: String) -> bool {
    if handles.iter().any(|h| h.eq_ignore_ascii_case(&candidate)) {
        false
    } else {
        handles.push(candidate);
        true
    }
}
