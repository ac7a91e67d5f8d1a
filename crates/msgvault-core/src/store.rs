//! Read-only access to the external Messages store.
//!
//! This is the row-fetch boundary: it turns a [`MessageQuery`] description
//! into bound SQL against chat.db and projects the result into
//! [`RawMessageRow`] values. The store is externally owned; nothing here
//! writes to it, and every query carries a wall-clock timeout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::capabilities::SchemaCapabilities;
use crate::error::{Error, Result};
use crate::models::RawMessageRow;

/// Read-only handle to one store path.
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
    query_timeout: Duration,
}

/// Sort direction for message queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// A scoped, already-bound message query description.
///
/// Time bounds and anchors are in raw store units; the caller converts from
/// canonical milliseconds using the session's detected scale.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Exact row match (context anchors).
    pub rowid: Option<i64>,
    pub chat_id: Option<i64>,
    /// Participant scope: match rows sent by one of these handles, or
    /// from-self rows in a chat that includes one of them (from-self rows
    /// carry no sender handle in the store).
    pub handles: Option<Vec<String>>,
    pub after_raw: Option<i64>,
    pub before_raw: Option<i64>,
    /// Case-insensitive substring over the plain-text column; escaped for
    /// LIKE internally.
    pub text_like: Option<String>,
    pub from_me: Option<bool>,
    pub has_attachments: Option<bool>,
    /// Restrict to rows with a binary payload and absent/empty plain text
    /// (the phase-2 candidate pool).
    pub rich_text_only: bool,
    pub exclude_rowids: Vec<i64>,
    /// Rows strictly before this (date, rowid) anchor.
    pub before_anchor: Option<(i64, i64)>,
    /// Rows strictly after this (date, rowid) anchor.
    pub after_anchor: Option<(i64, i64)>,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

/// One chat row, before participant attachment.
#[derive(Debug, Clone)]
pub struct ChatRow {
    pub chat_id: i64,
    pub guid: Option<String>,
    pub identifier: Option<String>,
    pub display_name: Option<String>,
    pub service: Option<String>,
    pub last_date: Option<i64>,
}

/// One attachment row, before filesystem resolution.
#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub rowid: i64,
    pub message_rowid: i64,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub transfer_name: Option<String>,
    pub total_bytes: i64,
}

impl Store {
    /// Open a store read-only at the given path.
    pub async fn open(path: &Path, query_timeout: Duration) -> Result<Self> {
        if !path.exists() {
            return Err(Error::StoreUnavailable {
                reason: format!("no store at {}", path.display()),
            });
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            query_timeout,
        })
    }

    /// The store path this handle was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the store handle.
    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn table_columns(&self, pragma: &str) -> Result<Vec<String>> {
        let rows = self.run(sqlx::query(pragma).fetch_all(&self.pool)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect())
    }

    /// Probe which optional columns this store's schema carries.
    ///
    /// A failing probe is fatal: nothing downstream can build queries
    /// without it.
    pub async fn probe_capabilities(&self) -> Result<SchemaCapabilities> {
        let message = self.table_columns("PRAGMA table_info(message)").await?;
        let handle = self.table_columns("PRAGMA table_info(handle)").await?;
        let chat = self.table_columns("PRAGMA table_info(chat)").await?;
        Ok(SchemaCapabilities::from_columns(&message, &handle, &chat))
    }

    /// Largest stored message timestamp, for session scale detection.
    pub async fn max_message_date(&self) -> Result<Option<i64>> {
        let row = self
            .run(sqlx::query("SELECT MAX(date) AS max_date FROM message").fetch_one(&self.pool))
            .await?;
        Ok(row.try_get::<Option<i64>, _>("max_date").ok().flatten())
    }

    /// Fetch message rows matching a query description.
    pub async fn fetch_messages(
        &self,
        caps: &SchemaCapabilities,
        q: &MessageQuery,
    ) -> Result<Vec<RawMessageRow>> {
        let mut select = vec![
            "m.ROWID AS msg_rowid".to_string(),
            "m.guid AS guid".to_string(),
            "m.text AS text".to_string(),
            "m.date AS date".to_string(),
            "COALESCE(m.is_from_me, 0) AS is_from_me".to_string(),
            "COALESCE(m.cache_has_attachments, 0) AS has_attachments".to_string(),
            "h.id AS sender".to_string(),
            "cmj.chat_id AS chat_id".to_string(),
        ];
        select.push(col(caps.attributed_body, "m.attributedBody", "attributed_body"));
        select.push(col(caps.service, "m.service", "service"));
        select.push(col(caps.account, "m.destination_caller_id", "account"));
        select.push(col(caps.subject, "m.subject", "subject"));
        select.push(col(
            caps.associated_message_type,
            "m.associated_message_type",
            "associated_type",
        ));
        select.push(col(
            caps.associated_message_guid,
            "m.associated_message_guid",
            "associated_guid",
        ));
        select.push(col(
            caps.expressive_send_style_id,
            "m.expressive_send_style_id",
            "expressive_effect",
        ));
        select.push(col(
            caps.thread_originator_guid,
            "m.thread_originator_guid",
            "thread_originator_guid",
        ));
        select.push(col(caps.reply_to_guid, "m.reply_to_guid", "reply_to_guid"));
        select.push(col(caps.item_type, "m.item_type", "item_type"));

        let mut sql = format!(
            "SELECT {} FROM message m \
             LEFT JOIN handle h ON h.ROWID = m.handle_id \
             LEFT JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
             WHERE 1=1",
            select.join(", ")
        );

        if q.rowid.is_some() {
            sql.push_str(" AND m.ROWID = ?");
        }
        if q.chat_id.is_some() {
            sql.push_str(" AND cmj.chat_id = ?");
        }
        if let Some(handles) = &q.handles {
            let ph = placeholders(handles.len());
            sql.push_str(&format!(
                " AND (LOWER(h.id) IN ({ph}) OR (m.is_from_me = 1 AND cmj.chat_id IN ( \
                 SELECT chj.chat_id FROM chat_handle_join chj \
                 JOIN handle hh ON hh.ROWID = chj.handle_id \
                 WHERE LOWER(hh.id) IN ({ph}))))"
            ));
        }
        if q.after_raw.is_some() {
            sql.push_str(" AND m.date >= ?");
        }
        if q.before_raw.is_some() {
            sql.push_str(" AND m.date <= ?");
        }
        if q.text_like.is_some() {
            sql.push_str(" AND m.text LIKE ? ESCAPE '\\'");
        }
        if q.from_me.is_some() {
            sql.push_str(" AND m.is_from_me = ?");
        }
        if q.has_attachments.is_some() {
            sql.push_str(" AND COALESCE(m.cache_has_attachments, 0) = ?");
        }
        if q.rich_text_only {
            sql.push_str(" AND m.attributedBody IS NOT NULL AND (m.text IS NULL OR m.text = '')");
        }
        if q.before_anchor.is_some() {
            sql.push_str(" AND (m.date < ? OR (m.date = ? AND m.ROWID < ?))");
        }
        if q.after_anchor.is_some() {
            sql.push_str(" AND (m.date > ? OR (m.date = ? AND m.ROWID > ?))");
        }
        if !q.exclude_rowids.is_empty() {
            sql.push_str(&format!(
                " AND m.ROWID NOT IN ({})",
                placeholders(q.exclude_rowids.len())
            ));
        }

        sql.push_str(match q.order {
            SortOrder::Ascending => " ORDER BY m.date ASC, m.ROWID ASC",
            SortOrder::Descending => " ORDER BY m.date DESC, m.ROWID DESC",
        });
        sql.push_str(&format!(" LIMIT {} OFFSET {}", q.limit.max(0), q.offset.max(0)));

        // Binds must follow the clause order above exactly.
        let mut query = sqlx::query(&sql);
        if let Some(rowid) = q.rowid {
            query = query.bind(rowid);
        }
        if let Some(chat_id) = q.chat_id {
            query = query.bind(chat_id);
        }
        if let Some(handles) = &q.handles {
            for h in handles {
                query = query.bind(h.to_lowercase());
            }
            for h in handles {
                query = query.bind(h.to_lowercase());
            }
        }
        if let Some(after) = q.after_raw {
            query = query.bind(after);
        }
        if let Some(before) = q.before_raw {
            query = query.bind(before);
        }
        if let Some(needle) = &q.text_like {
            query = query.bind(format!("%{}%", escape_like(needle)));
        }
        if let Some(from_me) = q.from_me {
            query = query.bind(i64::from(from_me));
        }
        if let Some(flag) = q.has_attachments {
            query = query.bind(i64::from(flag));
        }
        if let Some((date, rowid)) = q.before_anchor {
            query = query.bind(date).bind(date).bind(rowid);
        }
        if let Some((date, rowid)) = q.after_anchor {
            query = query.bind(date).bind(date).bind(rowid);
        }
        for rowid in &q.exclude_rowids {
            query = query.bind(*rowid);
        }

        let rows = self.run(query.fetch_all(&self.pool)).await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// List chat rows ordered by most recent activity.
    pub async fn fetch_chats(
        &self,
        caps: &SchemaCapabilities,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatRow>> {
        let sql = format!(
            "SELECT c.ROWID AS chat_rowid, c.guid AS guid, c.chat_identifier AS identifier, \
             {}, c.service_name AS service, MAX(m.date) AS last_date \
             FROM chat c \
             LEFT JOIN chat_message_join cmj ON cmj.chat_id = c.ROWID \
             LEFT JOIN message m ON m.ROWID = cmj.message_id \
             GROUP BY c.ROWID \
             ORDER BY (last_date IS NULL), last_date DESC \
             LIMIT {} OFFSET {}",
            col(caps.display_name, "c.display_name", "display_name"),
            limit.max(0),
            offset.max(0),
        );

        let rows = self.run(sqlx::query(&sql).fetch_all(&self.pool)).await?;
        Ok(rows
            .iter()
            .map(|row| ChatRow {
                chat_id: row.try_get("chat_rowid").unwrap_or_default(),
                guid: row.try_get("guid").ok().flatten(),
                identifier: row.try_get("identifier").ok().flatten(),
                display_name: row.try_get("display_name").ok().flatten(),
                service: row.try_get("service").ok().flatten(),
                last_date: row.try_get("last_date").ok().flatten(),
            })
            .collect())
    }

    /// Batch-fetch participant handles for a set of chats.
    pub async fn chat_participants(&self, chat_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut map: HashMap<i64, Vec<String>> = HashMap::new();
        if chat_ids.is_empty() {
            return Ok(map);
        }

        let sql = format!(
            "SELECT chj.chat_id AS chat_id, h.id AS handle \
             FROM handle h \
             JOIN chat_handle_join chj ON chj.handle_id = h.ROWID \
             WHERE chj.chat_id IN ({}) \
             ORDER BY chj.chat_id, h.ROWID",
            placeholders(chat_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in chat_ids {
            query = query.bind(*id);
        }

        let rows = self.run(query.fetch_all(&self.pool)).await?;
        for row in rows {
            let chat_id: i64 = row.try_get("chat_id").unwrap_or_default();
            if let Ok(handle) = row.try_get::<String, _>("handle") {
                map.entry(chat_id).or_default().push(handle);
            }
        }
        Ok(map)
    }

    /// Locate a context anchor: its raw date and owning chat.
    pub async fn fetch_anchor(&self, rowid: i64) -> Result<Option<(Option<i64>, Option<i64>)>> {
        let row = self
            .run(
                sqlx::query(
                    "SELECT m.date AS date, cmj.chat_id AS chat_id FROM message m \
                     LEFT JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
                     WHERE m.ROWID = ? LIMIT 1",
                )
                .bind(rowid)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|row| {
            (
                row.try_get("date").ok().flatten(),
                row.try_get("chat_id").ok().flatten(),
            )
        }))
    }

    /// Attachment rows for a set of messages.
    pub async fn fetch_attachments(&self, message_rowids: &[i64]) -> Result<Vec<AttachmentRow>> {
        if message_rowids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT a.ROWID AS att_rowid, maj.message_id AS message_rowid, \
             a.filename AS filename, a.mime_type AS mime_type, \
             a.transfer_name AS transfer_name, COALESCE(a.total_bytes, 0) AS total_bytes \
             FROM attachment a \
             JOIN message_attachment_join maj ON maj.attachment_id = a.ROWID \
             WHERE maj.message_id IN ({}) \
             ORDER BY maj.message_id, a.ROWID",
            placeholders(message_rowids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in message_rowids {
            query = query.bind(*id);
        }

        let rows = self.run(query.fetch_all(&self.pool)).await?;
        Ok(rows
            .iter()
            .map(|row| AttachmentRow {
                rowid: row.try_get("att_rowid").unwrap_or_default(),
                message_rowid: row.try_get("message_rowid").unwrap_or_default(),
                filename: row.try_get("filename").ok().flatten(),
                mime_type: row.try_get("mime_type").ok().flatten(),
                transfer_name: row.try_get("transfer_name").ok().flatten(),
                total_bytes: row.try_get("total_bytes").unwrap_or_default(),
            })
            .collect())
    }

    // =========================================================================
    // Identity lookups
    // =========================================================================

    /// Exact case-insensitive handle match, with the person-identity group id
    /// when the schema carries one.
    pub async fn exact_handles(
        &self,
        caps: &SchemaCapabilities,
        needle: &str,
    ) -> Result<Vec<(String, Option<String>)>> {
        let mut sql = format!(
            "SELECT h.id AS id, {} FROM handle h WHERE LOWER(h.id) = LOWER(?)",
            col(caps.person_centric_id, "h.person_centric_id", "person_centric_id"),
        );
        if caps.uncanonicalized_id {
            sql.push_str(" OR LOWER(h.uncanonicalized_id) = LOWER(?)");
        }

        let mut query = sqlx::query(&sql).bind(needle);
        if caps.uncanonicalized_id {
            query = query.bind(needle);
        }

        let rows = self.run(query.fetch_all(&self.pool)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = row.try_get::<String, _>("id").ok()?;
                let person = row.try_get("person_centric_id").ok().flatten();
                Some((id, person))
            })
            .collect())
    }

    /// All handles sharing a person-identity group.
    pub async fn handles_for_person(&self, person_centric_id: &str) -> Result<Vec<String>> {
        let rows = self
            .run(
                sqlx::query("SELECT id FROM handle WHERE person_centric_id = ? ORDER BY ROWID")
                    .bind(person_centric_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("id").ok())
            .collect())
    }

    /// Member handles of chats whose display name matches exactly.
    pub async fn handles_for_chat_name(
        &self,
        caps: &SchemaCapabilities,
        name: &str,
    ) -> Result<Vec<String>> {
        if !caps.display_name {
            return Ok(Vec::new());
        }

        let rows = self
            .run(
                sqlx::query(
                    "SELECT DISTINCT h.id AS id FROM handle h \
                     JOIN chat_handle_join chj ON chj.handle_id = h.ROWID \
                     JOIN chat c ON c.ROWID = chj.chat_id \
                     WHERE LOWER(c.display_name) = LOWER(?) \
                     ORDER BY h.id",
                )
                .bind(name)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("id").ok())
            .collect())
    }

    /// Substring handle match, escaped and capped.
    pub async fn handles_like(&self, needle: &str, limit: i64) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT id FROM handle WHERE id LIKE ? ESCAPE '\\' ORDER BY id LIMIT {}",
            limit.max(0)
        );
        let rows = self
            .run(
                sqlx::query(&sql)
                    .bind(format!("%{}%", escape_like(needle)))
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("id").ok())
            .collect())
    }

    async fn run<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::StoreUnavailable {
                reason: format!("query timed out after {:?}", self.query_timeout),
            }),
        }
    }
}

fn col(present: bool, expr: &str, alias: &str) -> String {
    if present {
        format!("{expr} AS {alias}")
    } else {
        format!("NULL AS {alias}")
    }
}

fn placeholders(count: usize) -> String {
    (0..count).map(|_| "?").collect::<Vec<_>>().join(",")
}

/// Escape LIKE wildcards so user input matches literally under `ESCAPE '\'`.
pub(crate) fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn message_from_row(row: &SqliteRow) -> RawMessageRow {
    RawMessageRow {
        rowid: row.try_get("msg_rowid").unwrap_or_default(),
        guid: row
            .try_get::<Option<String>, _>("guid")
            .ok()
            .flatten()
            .unwrap_or_default(),
        is_from_me: row.try_get::<i64, _>("is_from_me").unwrap_or_default() != 0,
        text: row.try_get("text").ok().flatten(),
        attributed_body: row.try_get("attributed_body").ok().flatten(),
        date: row.try_get("date").ok().flatten(),
        sender: row.try_get("sender").ok().flatten(),
        has_attachments: row.try_get::<i64, _>("has_attachments").unwrap_or_default() != 0,
        service: row.try_get("service").ok().flatten(),
        account: row.try_get("account").ok().flatten(),
        subject: row.try_get("subject").ok().flatten(),
        associated_type: row.try_get("associated_type").ok().flatten(),
        associated_guid: row.try_get("associated_guid").ok().flatten(),
        expressive_effect: row.try_get("expressive_effect").ok().flatten(),
        thread_originator_guid: row.try_get("thread_originator_guid").ok().flatten(),
        reply_to_guid: row.try_get("reply_to_guid").ok().flatten(),
        item_type: row.try_get("item_type").ok().flatten(),
        chat_id: row.try_get("chat_id").ok().flatten(),
    }
}
