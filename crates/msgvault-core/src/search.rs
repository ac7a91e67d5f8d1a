//! Two-phase scoped search.
//!
//! Phase 1 is an indexed pass over the plain-text column. Rich-text-only
//! messages are invisible to it, so when a text query comes up short, a
//! bounded second pass decodes candidates with a binary payload and no
//! plain text and matches against the recovered text. Both phases run under
//! the same mandatory scope.

use crate::capabilities::SchemaCapabilities;
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::models::MessagePage;
use crate::normalize::Normalizer;
use crate::store::{MessageQuery, SortOrder, Store};
use crate::timestamp::{self, TimeScale};

/// A search request. At least one scope field (chat, participant, or a time
/// bound) is mandatory.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Case-insensitive substring to match. `None` makes this a scoped
    /// listing (no phase 2).
    pub query: Option<String>,
    pub chat_id: Option<i64>,
    pub participant: Option<String>,
    /// Canonical Unix milliseconds, inclusive.
    pub after_ms: Option<i64>,
    /// Canonical Unix milliseconds, inclusive.
    pub before_ms: Option<i64>,
    pub from_me: Option<bool>,
    pub has_attachments: Option<bool>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl SearchRequest {
    /// Whether the request carries the mandatory scope.
    pub fn has_scope(&self) -> bool {
        self.chat_id.is_some()
            || self.participant.is_some()
            || self.after_ms.is_some()
            || self.before_ms.is_some()
    }
}

pub(crate) struct SearchContext<'a> {
    pub store: &'a Store,
    pub caps: &'a SchemaCapabilities,
    pub scale: TimeScale,
    pub normalizer: &'a Normalizer,
    pub limits: &'a SearchConfig,
}

pub(crate) async fn execute(
    ctx: &SearchContext<'_>,
    req: &SearchRequest,
    handles: Option<Vec<String>>,
) -> Result<MessagePage> {
    if !req.has_scope() {
        return Err(Error::ScopeRequired);
    }

    let limit = req
        .limit
        .unwrap_or(ctx.limits.default_limit)
        .clamp(1, ctx.limits.max_limit.max(1));
    let needle = req
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());

    let base = MessageQuery {
        chat_id: req.chat_id,
        handles,
        after_raw: req.after_ms.map(|ms| timestamp::to_raw_units(ms, ctx.scale)),
        before_raw: req.before_ms.map(|ms| timestamp::to_raw_units(ms, ctx.scale)),
        from_me: req.from_me,
        has_attachments: req.has_attachments,
        order: SortOrder::Descending,
        ..MessageQuery::default()
    };

    // Phase 1: indexed plain-text pass.
    let phase1 = MessageQuery {
        text_like: needle.map(ToOwned::to_owned),
        limit,
        offset: req.offset.max(0),
        ..base.clone()
    };
    let phase1_rows = ctx.store.fetch_messages(ctx.caps, &phase1).await?;
    let phase1_full = phase1_rows.len() == usize_of(limit);
    let phase1_ids: Vec<i64> = phase1_rows.iter().map(|r| r.rowid).collect();

    let mut total_considered = phase1_rows.len();
    let mut messages = ctx.normalizer.normalize_batch(phase1_rows).await;
    let mut truncated = phase1_full;

    // Phase 2: decode fallback over rich-text-only candidates.
    if let Some(needle) = needle {
        let need = usize_of(limit).saturating_sub(messages.len());
        if need > 0 && ctx.caps.attributed_body {
            let pool = (need as i64)
                .saturating_mul(ctx.limits.fallback_multiplier)
                .min(ctx.limits.fallback_cap);
            let phase2 = MessageQuery {
                rich_text_only: true,
                exclude_rowids: phase1_ids,
                limit: pool,
                offset: 0,
                ..base
            };
            match ctx.store.fetch_messages(ctx.caps, &phase2).await {
                Ok(candidates) => {
                    total_considered += candidates.len();
                    let pool_exhausted = candidates.len() == usize_of(pool);
                    let decoded = ctx.normalizer.normalize_batch(candidates).await;

                    let needle_lower = needle.to_lowercase();
                    let mut matched = 0usize;
                    for message in decoded {
                        let hit = message
                            .text
                            .as_deref()
                            .is_some_and(|t| t.to_lowercase().contains(&needle_lower));
                        if !hit {
                            continue;
                        }
                        matched += 1;
                        if matched <= need {
                            messages.push(message);
                        }
                    }
                    truncated |= matched > need || (pool_exhausted && matched < need);
                }
                Err(err) => {
                    // Degraded, not fatal: phase 2 just yields fewer matches.
                    tracing::warn!(error = %err, "decode-fallback pass failed");
                }
            }
        }
    }

    messages.sort_by(|a, b| {
        b.timestamp_ms
            .cmp(&a.timestamp_ms)
            .then(b.rowid.cmp(&a.rowid))
    });
    truncated |= messages.len() > usize_of(limit);
    messages.truncate(usize_of(limit));

    Ok(MessagePage {
        messages,
        total_considered,
        truncated,
    })
}

fn usize_of(value: i64) -> usize {
    usize::try_from(value.max(0)).unwrap_or(0)
}
