//! Relational store: users, filters, notifications, tender cache and the
//! user-action audit log, behind one shared `sqlx` pool.
//!
//! Idempotency and quota accounting live HERE, not in the loop: the
//! `UNIQUE(user_id, tender_number)` constraint makes duplicate
//! deliveries a no-op even under concurrent polls, and
//! `notifications_sent_today` is only ever mutated inside
//! `record_delivered` / `has_quota` transactions.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::SniperError;
use crate::model::{
    ActiveFilter, LawType, Notification, NotificationSource, PurchaseStage, Tender, TenderFilter,
    TenderKind, Tier, User,
};

const TENDER_CACHE_TTL_HOURS: i64 = 24;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id INTEGER NOT NULL UNIQUE,
        username TEXT,
        tier TEXT NOT NULL DEFAULT 'trial',
        monitoring_enabled INTEGER NOT NULL DEFAULT 1,
        notifications_sent_today INTEGER NOT NULL DEFAULT 0,
        last_notification_reset TEXT,
        subscription_expires_at TEXT,
        created_at TEXT
    );

    CREATE TABLE IF NOT EXISTS filters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        keywords TEXT NOT NULL DEFAULT '[]',
        exclude_keywords TEXT NOT NULL DEFAULT '[]',
        price_min REAL,
        price_max REAL,
        regions TEXT NOT NULL DEFAULT '[]',
        tender_types TEXT NOT NULL DEFAULT '[]',
        law_type TEXT NOT NULL DEFAULT 'both',
        purchase_stage TEXT NOT NULL DEFAULT 'submission',
        okpd2_codes TEXT NOT NULL DEFAULT '[]',
        min_deadline_days INTEGER,
        customer_keywords TEXT NOT NULL DEFAULT '[]',
        publication_days INTEGER,
        is_active INTEGER NOT NULL DEFAULT 1,
        ai_intent TEXT,
        created_at TEXT,
        updated_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_filters_user ON filters(user_id);
    CREATE INDEX IF NOT EXISTS idx_filters_active ON filters(is_active);

    CREATE TABLE IF NOT EXISTS notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        filter_id INTEGER NOT NULL,
        filter_name TEXT NOT NULL DEFAULT '',
        tender_number TEXT NOT NULL,
        tender_name TEXT NOT NULL DEFAULT '',
        tender_price REAL,
        tender_url TEXT NOT NULL DEFAULT '',
        tender_region TEXT,
        tender_customer TEXT,
        score INTEGER NOT NULL DEFAULT 0,
        matched_keywords TEXT NOT NULL DEFAULT '[]',
        published_date TEXT,
        submission_deadline TEXT,
        source TEXT NOT NULL DEFAULT 'automonitoring',
        sent_at TEXT,
        external_message_id INTEGER,
        UNIQUE(user_id, tender_number)
    );
    CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);

    CREATE TABLE IF NOT EXISTS tender_cache (
        tender_number TEXT PRIMARY KEY,
        tender_hash TEXT NOT NULL,
        last_seen TEXT,
        times_matched INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS user_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        action_type TEXT NOT NULL,
        action_data TEXT,
        created_at TEXT
    );
";

#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

fn to_json(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".into())
}

fn from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl Db {
    /// Connect and ensure the schema exists. `DATABASE_URL` style, e.g.
    /// `sqlite://sniper.db?mode=rwc` or `sqlite::memory:` in tests.
    pub async fn connect(database_url: &str) -> Result<Db, SniperError> {
        // An in-memory database exists per connection; more than one
        // pooled connection would see different databases.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        // sqlx's query() runs a single statement; apply the schema
        // statement by statement.
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&pool).await?;
            }
        }
        Ok(Db { pool })
    }

    /// Liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<(), SniperError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ── users ────────────────────────────────────────────────────────

    /// Create the user on first contact, refresh mutable fields after.
    pub async fn upsert_user(
        &self,
        external_id: i64,
        username: Option<&str>,
        tier: Tier,
    ) -> Result<i64, SniperError> {
        sqlx::query(
            "INSERT INTO users (external_id, username, tier, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(external_id)
             DO UPDATE SET username = excluded.username, tier = excluded.tier",
        )
        .bind(external_id)
        .bind(username)
        .bind(tier.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("id"))
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>, SniperError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    pub async fn get_user_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<User>, SniperError> {
        let row = sqlx::query("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    pub async fn set_monitoring_enabled(
        &self,
        user_id: i64,
        enabled: bool,
    ) -> Result<(), SniperError> {
        sqlx::query("UPDATE users SET monitoring_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Quota check with the lazy 24-hour reset: once a full day has
    /// passed since the last reset the counter returns to zero,
    /// evaluated here on read.
    pub async fn has_quota(&self, user_id: i64, daily_limit: u32) -> Result<bool, SniperError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT notifications_sent_today, last_notification_reset FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(false);
        };

        let sent_today: i64 = row.get("notifications_sent_today");
        let last_reset: Option<String> = row.get("last_notification_reset");
        let last_reset = last_reset
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));

        let now = Utc::now();
        let window_elapsed = match last_reset {
            Some(reset) => now - reset >= Duration::hours(24),
            None => true,
        };

        if window_elapsed {
            sqlx::query(
                "UPDATE users SET notifications_sent_today = 0, last_notification_reset = ? WHERE id = ?",
            )
            .bind(now.to_rfc3339())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(true);
        }

        tx.commit().await?;
        Ok((sent_today as u32) < daily_limit)
    }

    // ── filters ──────────────────────────────────────────────────────

    pub async fn create_filter(&self, filter: &TenderFilter) -> Result<i64, SniperError> {
        let kinds: Vec<String> = filter
            .tender_kinds
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        let result = sqlx::query(
            "INSERT INTO filters (
                user_id, name, keywords, exclude_keywords, price_min, price_max,
                regions, tender_types, law_type, purchase_stage, okpd2_codes,
                min_deadline_days, customer_keywords, publication_days,
                is_active, ai_intent, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(filter.user_id)
        .bind(&filter.name)
        .bind(to_json(&filter.keywords))
        .bind(to_json(&filter.exclude_keywords))
        .bind(filter.price_min)
        .bind(filter.price_max)
        .bind(to_json(&filter.regions))
        .bind(to_json(&kinds))
        .bind(filter.law_type.as_str())
        .bind(filter.purchase_stage.as_str())
        .bind(to_json(&filter.okpd2_codes))
        .bind(filter.min_deadline_days.map(i64::from))
        .bind(to_json(&filter.customer_keywords))
        .bind(filter.publication_days.map(i64::from))
        .bind(filter.is_active)
        .bind(&filter.ai_intent)
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_filter(&self, filter_id: i64) -> Result<Option<TenderFilter>, SniperError> {
        let row = sqlx::query("SELECT * FROM filters WHERE id = ?")
            .bind(filter_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| filter_from_row(&r)))
    }

    pub async fn get_user_filters(
        &self,
        user_id: i64,
        active_only: bool,
    ) -> Result<Vec<TenderFilter>, SniperError> {
        let query = if active_only {
            "SELECT * FROM filters WHERE user_id = ? AND is_active = 1 ORDER BY created_at DESC"
        } else {
            "SELECT * FROM filters WHERE user_id = ? ORDER BY created_at DESC"
        };
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(filter_from_row).collect())
    }

    /// Every active filter joined with its owner — the monitoring loop's
    /// work list.
    pub async fn get_all_active_filters(&self) -> Result<Vec<ActiveFilter>, SniperError> {
        let rows = sqlx::query(
            "SELECT f.*, u.external_id AS owner_external_id, u.tier AS owner_tier,
                    u.monitoring_enabled AS owner_monitoring
             FROM filters f JOIN users u ON f.user_id = u.id
             WHERE f.is_active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ActiveFilter {
                filter: filter_from_row(row),
                external_id: row.get("owner_external_id"),
                tier: Tier::parse(row.get::<String, _>("owner_tier").as_str()),
                monitoring_enabled: row.get("owner_monitoring"),
            })
            .collect())
    }

    /// Soft-deactivate: filters are never deleted, only switched off.
    pub async fn deactivate_filter(&self, filter_id: i64) -> Result<(), SniperError> {
        sqlx::query("UPDATE filters SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(filter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_filter_intent(
        &self,
        filter_id: i64,
        intent: &str,
    ) -> Result<(), SniperError> {
        sqlx::query("UPDATE filters SET ai_intent = ?, updated_at = ? WHERE id = ?")
            .bind(intent)
            .bind(Utc::now().to_rfc3339())
            .bind(filter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── notifications ────────────────────────────────────────────────

    pub async fn is_already_notified(
        &self,
        user_id: i64,
        tender_number: &str,
    ) -> Result<bool, SniperError> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM notifications WHERE user_id = ? AND tender_number = ?",
        )
        .bind(user_id)
        .bind(tender_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Insert the notification row and bump the daily counter in one
    /// transaction. Returns the new row id, or `None` when the
    /// `(user, tender)` pair already exists — the concurrent-duplicate
    /// case, treated as already delivered.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_delivered(
        &self,
        user_id: i64,
        filter_id: i64,
        filter_name: &str,
        tender: &Tender,
        score: u32,
        matched_keywords: &[String],
        source: NotificationSource,
        external_message_id: Option<i64>,
    ) -> Result<Option<i64>, SniperError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO notifications (
                user_id, filter_id, filter_name, tender_number, tender_name,
                tender_price, tender_url, tender_region, tender_customer,
                score, matched_keywords, published_date, submission_deadline,
                source, sent_at, external_message_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(filter_id)
        .bind(filter_name)
        .bind(&tender.number)
        .bind(&tender.name)
        .bind(tender.price)
        .bind(&tender.url)
        .bind(&tender.customer_region)
        .bind(&tender.customer_name)
        .bind(i64::from(score))
        .bind(to_json(matched_keywords))
        .bind(tender.published_at.map(|d| d.to_rfc3339()))
        .bind(
            tender
                .submission_deadline
                .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
        )
        .bind(source.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(external_message_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Someone else delivered this tender between our idempotency
            // check and the insert. Silent no-op.
            tx.rollback().await.ok();
            tracing::debug!(user = user_id, tender = %tender.number, "duplicate notification ignored");
            return Ok(None);
        }

        sqlx::query(
            "UPDATE users SET notifications_sent_today = notifications_sent_today + 1 WHERE id = ?",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let id = inserted.last_insert_rowid();
        tx.commit().await?;
        Ok(Some(id))
    }

    /// Bulk delete of the user's notification history, optionally only
    /// rows older than the given number of days. Returns rows removed.
    pub async fn clear_history(
        &self,
        user_id: i64,
        older_than_days: Option<u32>,
    ) -> Result<u64, SniperError> {
        let result = match older_than_days {
            Some(days) => {
                let cutoff = Utc::now() - Duration::days(i64::from(days));
                sqlx::query("DELETE FROM notifications WHERE user_id = ? AND sent_at < ?")
                    .bind(user_id)
                    .bind(cutoff.to_rfc3339())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM notifications WHERE user_id = ?")
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    pub async fn list_user_tenders(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<Notification>, SniperError> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY sent_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(notification_from_row).collect())
    }

    // ── tender cache ─────────────────────────────────────────────────

    /// True when the tender was seen within the TTL with identical
    /// content — re-enrichment and re-scoring can be skipped.
    pub async fn is_tender_processed(
        &self,
        tender_number: &str,
        tender_hash: &str,
    ) -> Result<bool, SniperError> {
        let row = sqlx::query(
            "SELECT last_seen FROM tender_cache WHERE tender_number = ? AND tender_hash = ?",
        )
        .bind(tender_number)
        .bind(tender_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(false) };
        let last_seen: Option<String> = row.get("last_seen");
        let fresh = last_seen
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|seen| Utc::now() - seen.with_timezone(&Utc) < Duration::hours(TENDER_CACHE_TTL_HOURS))
            .unwrap_or(false);
        Ok(fresh)
    }

    pub async fn mark_tender_processed(
        &self,
        tender_number: &str,
        tender_hash: &str,
    ) -> Result<(), SniperError> {
        sqlx::query(
            "INSERT INTO tender_cache (tender_number, tender_hash, last_seen, times_matched)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(tender_number) DO UPDATE SET
                tender_hash = excluded.tender_hash,
                last_seen = excluded.last_seen,
                times_matched = times_matched + 1",
        )
        .bind(tender_number)
        .bind(tender_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── audit log ────────────────────────────────────────────────────

    pub async fn log_action(
        &self,
        user_id: i64,
        action_type: &str,
        action_data: Option<&serde_json::Value>,
    ) -> Result<(), SniperError> {
        sqlx::query(
            "INSERT INTO user_actions (user_id, action_type, action_data, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(action_type)
        .bind(action_data.map(|v| v.to_string()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn parse_naive(raw: Option<String>) -> Option<NaiveDateTime> {
    raw.as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        external_id: row.get("external_id"),
        username: row.get("username"),
        tier: Tier::parse(row.get::<String, _>("tier").as_str()),
        monitoring_enabled: row.get("monitoring_enabled"),
        notifications_sent_today: row.get::<i64, _>("notifications_sent_today") as u32,
        last_notification_reset: parse_ts(row.get("last_notification_reset")),
        subscription_expires_at: parse_ts(row.get("subscription_expires_at")),
        created_at: parse_ts(row.get("created_at")),
    }
}

fn filter_from_row(row: &SqliteRow) -> TenderFilter {
    TenderFilter {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        keywords: from_json(row.get::<String, _>("keywords").as_str()),
        exclude_keywords: from_json(row.get::<String, _>("exclude_keywords").as_str()),
        price_min: row.get("price_min"),
        price_max: row.get("price_max"),
        regions: from_json(row.get::<String, _>("regions").as_str()),
        tender_kinds: from_json(row.get::<String, _>("tender_types").as_str())
            .iter()
            .filter_map(|s| TenderKind::parse(s))
            .collect(),
        law_type: LawType::parse(row.get::<String, _>("law_type").as_str()),
        purchase_stage: PurchaseStage::parse(row.get::<String, _>("purchase_stage").as_str()),
        okpd2_codes: from_json(row.get::<String, _>("okpd2_codes").as_str()),
        min_deadline_days: row
            .get::<Option<i64>, _>("min_deadline_days")
            .map(|v| v as u32),
        customer_keywords: from_json(row.get::<String, _>("customer_keywords").as_str()),
        publication_days: row
            .get::<Option<i64>, _>("publication_days")
            .map(|v| v as u32),
        is_active: row.get("is_active"),
        ai_intent: row.get("ai_intent"),
        created_at: parse_ts(row.get("created_at")),
        updated_at: parse_ts(row.get("updated_at")),
    }
}

fn notification_from_row(row: &SqliteRow) -> Notification {
    Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        filter_id: row.get("filter_id"),
        filter_name: row.get("filter_name"),
        tender_number: row.get("tender_number"),
        tender_name: row.get("tender_name"),
        tender_price: row.get("tender_price"),
        tender_url: row.get("tender_url"),
        tender_region: row.get("tender_region"),
        tender_customer: row.get("tender_customer"),
        score: row.get::<i64, _>("score") as u32,
        matched_keywords: from_json(row.get::<String, _>("matched_keywords").as_str()),
        published_date: parse_ts(row.get("published_date")),
        submission_deadline: parse_naive(row.get("submission_deadline")),
        source: NotificationSource::parse(row.get::<String, _>("source").as_str()),
        sent_at: parse_ts(row.get("sent_at")),
        external_message_id: row.get("external_message_id"),
    }
}
