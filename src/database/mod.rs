pub mod models;


use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub use models::*;

/// Message written onto episodes found mid-pipeline by [`Database::fail_orphaned_episodes`].
pub const ORPHANED_MESSAGE: &str = "Interrupted: process exited before the pipeline finished";

/// SQLite-backed store for episode records, scripts and newsletter sources.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'processing',
                duration REAL,
                segment_count INTEGER,
                total_segments INTEGER,
                current_segment INTEGER,
                source_text_preview TEXT NOT NULL,
                error_message TEXT,
                source_type TEXT NOT NULL DEFAULT 'paste',
                source_newsletter_ids TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_created
                ON episodes(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_episodes_status
                ON episodes(status);

            CREATE TABLE IF NOT EXISTS episode_scripts (
                episode_id TEXT PRIMARY KEY,
                script_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS newsletters (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL,
                received_at TEXT NOT NULL,
                content TEXT NOT NULL,
                content_preview TEXT NOT NULL,
                content_length INTEGER NOT NULL,
                used INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_newsletters_received
                ON newsletters(received_at DESC);

            -- Episodes built from each newsletter
            CREATE TABLE IF NOT EXISTS newsletter_episodes (
                newsletter_id TEXT NOT NULL,
                episode_id TEXT NOT NULL,
                linked_at TEXT NOT NULL,
                PRIMARY KEY (newsletter_id, episode_id),
                FOREIGN KEY (newsletter_id) REFERENCES newsletters(id) ON DELETE CASCADE
            );
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Episode records
    // =========================================================================

    /// Insert or overwrite the full record for an episode.
    pub fn write_episode(&self, meta: &EpisodeMeta) -> Result<()> {
        let conn = self.lock()?;
        write_episode_row(&conn, meta)
    }

    pub fn get_episode(&self, id: &str) -> Result<Option<EpisodeMeta>> {
        let conn = self.lock()?;
        read_episode_row(&conn, id)
    }

    pub fn episode_exists(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM episodes WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Read-merge-write update of one episode record.
    ///
    /// Rejects status changes that move backwards or out of a terminal
    /// status. The read and the write happen under one connection lock.
    pub fn update_episode(&self, id: &str, patch: &EpisodePatch) -> Result<EpisodeMeta> {
        let conn = self.lock()?;
        let mut meta =
            read_episode_row(&conn, id)?.ok_or_else(|| anyhow!("Episode not found: {}", id))?;

        if let Some(next) = patch.status {
            if !meta.status.can_transition_to(next) {
                bail!(
                    "Invalid status transition for episode {}: {} -> {}",
                    id,
                    meta.status,
                    next
                );
            }
        }

        patch.apply(&mut meta);
        write_episode_row(&conn, &meta)?;
        Ok(meta)
    }

    /// All episodes, newest first.
    pub fn list_episodes(&self) -> Result<Vec<EpisodeMeta>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM episodes ORDER BY created_at DESC, id ASC",
            EPISODE_COLUMNS
        ))?;
        let rows = stmt.query_map([], episode_from_row)?;

        let mut episodes = Vec::new();
        for row in rows {
            match row {
                Ok(meta) => episodes.push(meta),
                Err(e) => log::warn!("Skipping unreadable episode row: {}", e),
            }
        }
        Ok(episodes)
    }

    /// Move an episode to `complete` and mark its newsletter sources used,
    /// in one transaction. A source deleted while the episode was being
    /// built is skipped.
    pub fn complete_episode(
        &self,
        id: &str,
        duration: f64,
        segment_count: i64,
        newsletter_ids: &[String],
    ) -> Result<EpisodeMeta> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut meta =
            read_episode_row(&tx, id)?.ok_or_else(|| anyhow!("Episode not found: {}", id))?;
        if !meta.status.can_transition_to(EpisodeStatus::Complete) {
            bail!(
                "Invalid status transition for episode {}: {} -> complete",
                id,
                meta.status
            );
        }

        EpisodePatch {
            status: Some(EpisodeStatus::Complete),
            duration: Some(duration),
            segment_count: Some(segment_count),
            ..Default::default()
        }
        .apply(&mut meta);
        write_episode_row(&tx, &meta)?;

        for newsletter_id in newsletter_ids {
            if !mark_newsletter_used_tx(&tx, newsletter_id, id)? {
                log::warn!(
                    "Newsletter {} was deleted before episode {} completed",
                    newsletter_id,
                    id
                );
            }
        }

        tx.commit()?;
        Ok(meta)
    }

    /// Mark every episode stuck in a non-terminal status as errored.
    ///
    /// Recovery after a crash: no pipeline can be running for these records
    /// once the owning process is gone.
    pub fn fail_orphaned_episodes(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE episodes SET status = 'error', error_message = ?
             WHERE status NOT IN ('complete', 'error')",
            params![ORPHANED_MESSAGE],
        )?;
        if count > 0 {
            log::info!("Marked {} orphaned episodes as errored", count);
        }
        Ok(count)
    }

    // =========================================================================
    // Scripts
    // =========================================================================

    pub fn write_script(&self, episode_id: &str, script: &DialogueScript) -> Result<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(script)?;
        conn.execute(
            "INSERT OR REPLACE INTO episode_scripts (episode_id, script_json, created_at)
             VALUES (?, ?, ?)",
            params![episode_id, json, timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_script(&self, episode_id: &str) -> Result<Option<DialogueScript>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT script_json FROM episode_scripts WHERE episode_id = ?",
                params![episode_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Stored script is not valid JSON")?,
            )),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Newsletter sources
    // =========================================================================

    pub fn insert_newsletter(
        &self,
        id: &str,
        sender: &str,
        subject: &str,
        received_at: DateTime<Utc>,
        content: &str,
    ) -> Result<Newsletter> {
        let conn = self.lock()?;
        let content_length = content.chars().count() as i64;
        conn.execute(
            "INSERT INTO newsletters
                (id, sender, subject, received_at, content, content_preview, content_length, used)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
            params![
                id,
                sender,
                subject,
                timestamp(&received_at),
                content,
                preview(content),
                content_length
            ],
        )?;
        read_newsletter_row(&conn, id)?.ok_or_else(|| anyhow!("Newsletter not found: {}", id))
    }

    pub fn get_newsletter(&self, id: &str) -> Result<Option<Newsletter>> {
        let conn = self.lock()?;
        read_newsletter_row(&conn, id)
    }

    pub fn get_newsletter_content(&self, id: &str) -> Result<Option<NewsletterContent>> {
        let conn = self.lock()?;
        let content = conn
            .query_row(
                "SELECT sender, subject, content FROM newsletters WHERE id = ?",
                params![id],
                |row| {
                    Ok(NewsletterContent {
                        sender: row.get(0)?,
                        subject: row.get(1)?,
                        content: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(content)
    }

    /// All newsletters, most recently received first.
    pub fn list_newsletters(&self) -> Result<Vec<Newsletter>> {
        let conn = self.lock()?;
        let ids: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT id FROM newsletters ORDER BY received_at DESC, id ASC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut newsletters = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(newsletter) = read_newsletter_row(&conn, &id)? {
                newsletters.push(newsletter);
            }
        }
        Ok(newsletters)
    }

    /// Record that `episode_id` was built from this newsletter.
    pub fn mark_newsletter_used(&self, id: &str, episode_id: &str) -> Result<()> {
        let conn = self.lock()?;
        if !mark_newsletter_used_tx(&conn, id, episode_id)? {
            bail!("Newsletter not found: {}", id);
        }
        Ok(())
    }

    pub fn delete_newsletter(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn.execute("DELETE FROM newsletters WHERE id = ?", params![id])?;
        Ok(count > 0)
    }
}

// =============================================================================
// Row helpers
// =============================================================================

const EPISODE_COLUMNS: &str = "id, title, created_at, status, duration, segment_count, \
     total_segments, current_segment, source_text_preview, error_message, source_type, \
     source_newsletter_ids";

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<EpisodeMeta> {
    let created_at: String = row.get(2)?;
    let status: String = row.get(3)?;
    let source_type: String = row.get(10)?;
    let newsletter_ids: Option<String> = row.get(11)?;

    let status = status.parse::<EpisodeStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    let source_newsletter_ids = match newsletter_ids {
        Some(json) => Some(serde_json::from_str::<Vec<String>>(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(EpisodeMeta {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: parse_timestamp(2, &created_at)?,
        status,
        duration: row.get(4)?,
        segment_count: row.get(5)?,
        total_segments: row.get(6)?,
        current_segment: row.get(7)?,
        source_text_preview: row.get(8)?,
        error: row.get(9)?,
        source_type: SourceType::from(source_type),
        source_newsletter_ids,
    })
}

fn read_episode_row(conn: &Connection, id: &str) -> Result<Option<EpisodeMeta>> {
    let meta = conn
        .query_row(
            &format!("SELECT {} FROM episodes WHERE id = ?", EPISODE_COLUMNS),
            params![id],
            episode_from_row,
        )
        .optional()?;
    Ok(meta)
}

fn write_episode_row(conn: &Connection, meta: &EpisodeMeta) -> Result<()> {
    let newsletter_ids = meta
        .source_newsletter_ids
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO episodes
            (id, title, created_at, status, duration, segment_count, total_segments,
             current_segment, source_text_preview, error_message, source_type, source_newsletter_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
            title = ?2, created_at = ?3, status = ?4, duration = ?5, segment_count = ?6,
            total_segments = ?7, current_segment = ?8, source_text_preview = ?9,
            error_message = ?10, source_type = ?11, source_newsletter_ids = ?12",
        params![
            meta.id,
            meta.title,
            timestamp(&meta.created_at),
            meta.status.as_str(),
            meta.duration,
            meta.segment_count,
            meta.total_segments,
            meta.current_segment,
            meta.source_text_preview,
            meta.error,
            meta.source_type.as_str(),
            newsletter_ids,
        ],
    )?;
    Ok(())
}

fn read_newsletter_row(conn: &Connection, id: &str) -> Result<Option<Newsletter>> {
    let newsletter = conn
        .query_row(
            "SELECT id, sender, subject, received_at, content_preview, content_length, used
             FROM newsletters WHERE id = ?",
            params![id],
            |row| {
                let received_at: String = row.get(3)?;
                Ok(Newsletter {
                    id: row.get(0)?,
                    sender: row.get(1)?,
                    subject: row.get(2)?,
                    received_at: parse_timestamp(3, &received_at)?,
                    content_preview: row.get(4)?,
                    content_length: row.get(5)?,
                    used: row.get::<_, i64>(6)? != 0,
                    episode_ids: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut newsletter) = newsletter else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT episode_id FROM newsletter_episodes WHERE newsletter_id = ? ORDER BY linked_at ASC, episode_id ASC",
    )?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    newsletter.episode_ids = rows.collect::<rusqlite::Result<_>>()?;
    Ok(Some(newsletter))
}

/// Returns `false` when no newsletter has this id.
fn mark_newsletter_used_tx(conn: &Connection, id: &str, episode_id: &str) -> Result<bool> {
    let updated = conn.execute("UPDATE newsletters SET used = 1 WHERE id = ?", params![id])?;
    if updated == 0 {
        return Ok(false);
    }
    conn.execute(
        "INSERT OR IGNORE INTO newsletter_episodes (newsletter_id, episode_id, linked_at)
         VALUES (?, ?, ?)",
        params![id, episode_id, timestamp(&Utc::now())],
    )?;
    Ok(true)
}
