//! Engine facade: session caches plus the typed operations exposed to
//! transports.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::capabilities::SchemaCapabilities;
use crate::config::Config;
use crate::decode::PayloadDecoder;
use crate::error::{Error, Result};
use crate::identity;
use crate::models::{
    AttachmentRecord, ChatSummary, HandleSet, MessagePage, NormalizedMessage,
};
use crate::normalize::Normalizer;
use crate::search::{self, SearchContext, SearchRequest};
use crate::store::{MessageQuery, SortOrder, Store};
use crate::timestamp::{self, TimeScale};

/// Process-wide compute-once caches, owned by the engine rather than
/// ambient. [`Engine::reset_caches`] forces recomputation (test hook, and
/// required when pointing at a different store path via a fresh engine).
#[derive(Default)]
struct SessionCaches {
    capabilities: Mutex<Option<SchemaCapabilities>>,
    scale: Mutex<Option<TimeScale>>,
}

/// One open store plus everything needed to serve requests against it.
pub struct Engine {
    store: Store,
    config: Config,
    decoder: Arc<PayloadDecoder>,
    normalizer: Normalizer,
    caches: SessionCaches,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the store configured in `config`, read-only.
    pub async fn open(config: Config) -> Result<Self> {
        let store = Store::open(
            &config.store_path,
            Duration::from_millis(config.query_timeout_ms),
        )
        .await?;
        let decoder = Arc::new(PayloadDecoder::new(config.converter.clone()));
        let normalizer = Normalizer::new(Arc::clone(&decoder));
        Ok(Self {
            store,
            config,
            decoder,
            normalizer,
            caches: SessionCaches::default(),
        })
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    /// Schema capabilities of the open store, probed once and cached.
    pub async fn capabilities(&self) -> Result<SchemaCapabilities> {
        if let Some(caps) = lock(&self.caches.capabilities).clone() {
            return Ok(caps);
        }
        let caps = self.store.probe_capabilities().await?;
        tracing::debug!(?caps, "probed schema capabilities");
        *lock(&self.caches.capabilities) = Some(caps.clone());
        Ok(caps)
    }

    /// The store's native timestamp scale, detected once per session from
    /// the largest stored timestamp.
    async fn detected_scale(&self) -> Result<TimeScale> {
        if let Some(scale) = *lock(&self.caches.scale) {
            return Ok(scale);
        }
        let max_date = self.store.max_message_date().await?;
        let scale = timestamp::detect_scale(max_date);
        tracing::debug!(?scale, "detected store timestamp scale");
        *lock(&self.caches.scale) = Some(scale);
        Ok(scale)
    }

    /// Forget the capability, scale, and decode caches.
    pub fn reset_caches(&self) {
        *lock(&self.caches.capabilities) = None;
        *lock(&self.caches.scale) = None;
        self.decoder.clear();
    }

    /// Resolve a participant string to its canonical handle set.
    pub async fn resolve_handles(&self, participant: &str) -> Result<HandleSet> {
        let caps = self.capabilities().await?;
        identity::resolve_handles(&self.store, &caps, participant).await
    }

    /// List chats ordered by most recent activity.
    pub async fn list_chats(&self, limit: i64, offset: i64) -> Result<Vec<ChatSummary>> {
        let caps = self.capabilities().await?;
        let rows = self.store.fetch_chats(&caps, limit, offset).await?;
        let chat_ids: Vec<i64> = rows.iter().map(|c| c.chat_id).collect();
        let mut participants = self.store.chat_participants(&chat_ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| ChatSummary {
                participants: participants.remove(&row.chat_id).unwrap_or_default(),
                last_message_ms: timestamp::to_canonical_ms(row.last_date),
                chat_id: row.chat_id,
                guid: row.guid,
                identifier: row.identifier,
                display_name: row.display_name,
                service: row.service,
            })
            .collect())
    }

    /// Scoped message listing: a search without a text query.
    pub async fn messages(&self, req: &SearchRequest) -> Result<MessagePage> {
        let mut req = req.clone();
        req.query = None;
        self.search(&req).await
    }

    /// Two-phase scoped search.
    pub async fn search(&self, req: &SearchRequest) -> Result<MessagePage> {
        // Scope is validated before any store query runs.
        if !req.has_scope() {
            return Err(Error::ScopeRequired);
        }

        let caps = self.capabilities().await?;
        let scale = self.detected_scale().await?;
        let handles = match req.participant.as_deref() {
            Some(participant) => Some(
                identity::resolve_handles(&self.store, &caps, participant)
                    .await?
                    .handles,
            ),
            None => None,
        };

        let ctx = SearchContext {
            store: &self.store,
            caps: &caps,
            scale,
            normalizer: &self.normalizer,
            limits: &self.config.search,
        };
        search::execute(&ctx, req, handles).await
    }

    /// Messages around an anchor row, ordered ascending by timestamp:
    /// at most `before` earlier rows, the anchor, and `after` later rows,
    /// all within the anchor's chat.
    pub async fn context_around(
        &self,
        anchor_rowid: i64,
        before: i64,
        after: i64,
    ) -> Result<MessagePage> {
        let caps = self.capabilities().await?;
        let Some((anchor_date, chat_id)) = self.store.fetch_anchor(anchor_rowid).await? else {
            return Err(Error::NotFound(format!("message row {anchor_rowid}")));
        };
        let anchor_date = anchor_date.unwrap_or(0);
        let before = before.max(0);
        let after = after.max(0);

        let anchor_query = MessageQuery {
            rowid: Some(anchor_rowid),
            limit: 1,
            ..MessageQuery::default()
        };
        let before_query = MessageQuery {
            chat_id,
            before_anchor: Some((anchor_date, anchor_rowid)),
            order: SortOrder::Descending,
            limit: before,
            ..MessageQuery::default()
        };
        let after_query = MessageQuery {
            chat_id,
            after_anchor: Some((anchor_date, anchor_rowid)),
            order: SortOrder::Ascending,
            limit: after,
            ..MessageQuery::default()
        };

        let mut earlier = self.store.fetch_messages(&caps, &before_query).await?;
        let anchor_rows = self.store.fetch_messages(&caps, &anchor_query).await?;
        let later = self.store.fetch_messages(&caps, &after_query).await?;

        let truncated =
            earlier.len() == usize_of(before) && before > 0 || later.len() == usize_of(after) && after > 0;

        // The before-pass returns nearest-first; flip it to chronological.
        earlier.reverse();
        let mut rows = earlier;
        rows.extend(anchor_rows);
        rows.extend(later);

        let total_considered = rows.len();
        let messages = self.normalizer.normalize_batch(rows).await;
        Ok(MessagePage {
            messages,
            total_considered,
            truncated,
        })
    }

    /// Attachment records for a set of message rows, capped per row.
    pub async fn attachments(
        &self,
        message_rowids: &[i64],
        per_row_cap: usize,
    ) -> Result<Vec<AttachmentRecord>> {
        let rows = self.store.fetch_attachments(message_rowids).await?;

        let mut records = Vec::new();
        let mut current_message = None;
        let mut taken = 0usize;
        for row in rows {
            if current_message != Some(row.message_rowid) {
                current_message = Some(row.message_rowid);
                taken = 0;
            }
            if per_row_cap > 0 && taken >= per_row_cap {
                continue;
            }
            taken += 1;

            let on_disk = row
                .filename
                .as_deref()
                .map(|f| Path::new(shellexpand::tilde(f).as_ref()).exists())
                .unwrap_or(false);
            records.push(AttachmentRecord {
                rowid: row.rowid,
                message_rowid: row.message_rowid,
                filename: row
                    .filename
                    .map(|f| shellexpand::tilde(&f).into_owned()),
                mime_type: row.mime_type,
                transfer_name: row.transfer_name,
                total_bytes: row.total_bytes,
                on_disk,
            });
        }
        Ok(records)
    }

    /// Normalize a single already-fetched row. Exposed for callers that do
    /// their own fetching in tests.
    pub async fn normalize_row(
        &self,
        row: crate::models::RawMessageRow,
    ) -> NormalizedMessage {
        self.normalizer.normalize(row).await
    }
}

fn usize_of(value: i64) -> usize {
    usize::try_from(value.max(0)).unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
