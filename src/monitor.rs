//! The monitoring loop: a long-lived scheduler that wakes every poll
//! interval and fans active filters out to a bounded worker pool.
//!
//! Failure containment is the organising principle here. Every filter is
//! processed inside its own task and every error is caught at the filter
//! boundary — one broken filter, one blocked user or one portal hiccup
//! never stops the heartbeat. Users never block each other: the pool
//! runs filters concurrently and per-user backpressure only pauses that
//! user for the remainder of the cycle.

use chrono::{NaiveDate, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::SendOutcome;
use crate::model::{ActiveFilter, NotificationSource};
use crate::notify::Notifier;
use crate::search::{InstantSearch, SearchOptions};
use crate::sheets::{export_best_effort, SheetsApi};
use crate::store::Db;

/// Tenders under this score are not delivered by the loop.
const MIN_DELIVERY_SCORE: u32 = 60;
/// Per-filter cap during a monitoring poll. The instant-search path uses
/// a larger user-facing cap; monitoring keeps only the cream.
const MONITOR_MAX_TENDERS: usize = 5;
/// Consecutive transient delivery failures before the user is paused
/// for the remainder of the cycle.
const TRANSIENT_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Bounded worker pool size: one work item = one filter.
    pub worker_pool: usize,
    pub spreadsheet_id: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            poll_interval: Duration::from_secs(300),
            worker_pool: 8,
            spreadsheet_id: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MonitorStats {
    pub cycles: AtomicU64,
    pub filters_processed: AtomicU64,
    pub notifications_delivered: AtomicU64,
    pub errors: AtomicU64,
}

pub struct MonitoringLoop {
    db: Db,
    search: Arc<InstantSearch>,
    notifier: Arc<Notifier>,
    sheets: Option<Arc<dyn SheetsApi>>,
    config: MonitorConfig,
    /// Users already sent the "quota exceeded" notice today. One notice
    /// per window, not one per matching tender. Shared across workers.
    quota_notified: Arc<DashMap<i64, NaiveDate>>,
    pub stats: Arc<MonitorStats>,
}

impl MonitoringLoop {
    pub fn new(
        db: Db,
        search: Arc<InstantSearch>,
        notifier: Arc<Notifier>,
        sheets: Option<Arc<dyn SheetsApi>>,
        config: MonitorConfig,
    ) -> MonitoringLoop {
        MonitoringLoop {
            db,
            search,
            notifier,
            sheets,
            config,
            quota_notified: Arc::new(DashMap::new()),
            stats: Arc::new(MonitorStats::default()),
        }
    }

    /// Run forever. Intended to be spawned next to the HTTP server.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_s = self.config.poll_interval.as_secs(),
            "monitoring loop started"
        );
        loop {
            ticker.tick().await;
            self.poll_cycle().await;
        }
    }

    /// One pass over all active filters. Public so tests can drive the
    /// loop without the timer.
    pub async fn poll_cycle(&self) {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let filters = match self.db.get_all_active_filters().await {
            Ok(filters) => filters,
            Err(err) => {
                tracing::error!(error = %err, "could not load active filters");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if filters.is_empty() {
            tracing::debug!("no active filters this cycle");
            return;
        }
        tracing::info!(count = filters.len(), "poll cycle started");

        // Users paused mid-cycle: blocked bot or repeated transient
        // delivery failures. They resume next cycle.
        let paused: Arc<DashSet<i64>> = Arc::new(DashSet::new());
        let permits = Arc::new(Semaphore::new(self.config.worker_pool));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for active in filters {
            let permits = Arc::clone(&permits);
            let paused = Arc::clone(&paused);
            // The loop body is infallible by construction: each filter
            // logs its own failures.
            let this = self.clone_refs();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                this.process_filter(active, &paused).await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "filter task panicked");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn clone_refs(&self) -> MonitorWorker {
        MonitorWorker {
            db: self.db.clone(),
            search: Arc::clone(&self.search),
            notifier: Arc::clone(&self.notifier),
            sheets: self.sheets.clone(),
            spreadsheet_id: self.config.spreadsheet_id.clone(),
            quota_notified: Arc::clone(&self.quota_notified),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Per-task view of the loop's shared state.
struct MonitorWorker {
    db: Db,
    search: Arc<InstantSearch>,
    notifier: Arc<Notifier>,
    sheets: Option<Arc<dyn SheetsApi>>,
    spreadsheet_id: Option<String>,
    quota_notified: Arc<DashMap<i64, NaiveDate>>,
    stats: Arc<MonitorStats>,
}

impl MonitorWorker {
    async fn process_filter(&self, active: ActiveFilter, paused: &DashSet<i64>) {
        let filter = active.filter;
        let user_id = filter.user_id;

        if paused.contains(&user_id) {
            tracing::debug!(filter = filter.id, user = user_id, "user paused this cycle");
            return;
        }

        // The pause flag is observed at the start of each filter's
        // processing; results of in-flight work for a user who pauses
        // mid-poll are simply discarded by the next check.
        let user = match self.db.get_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(filter = filter.id, user = user_id, "filter without user");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, filter = filter.id, "user lookup failed");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if !user.monitoring_enabled {
            tracing::debug!(user = user_id, "monitoring disabled, skipping filter");
            return;
        }

        self.stats.filters_processed.fetch_add(1, Ordering::Relaxed);

        let opts = SearchOptions {
            max_tenders: MONITOR_MAX_TENDERS,
            // AI on the monitoring path is a premium perk; everyone else
            // relies on the deterministic matcher.
            use_ai: user.tier.is_premium(),
            user_id: Some(user_id),
            tier: user.tier,
            expanded_keywords: Vec::new(),
        };

        let outcome = match self.search.search_by_filter(&filter, &opts).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Filter boundary: a failing filter never stops the rest.
                tracing::error!(error = %err, filter = filter.id, "search failed for filter");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let mut consecutive_transient = 0u32;

        // Matches arrive score-descending, so quota exhaustion still
        // delivers the best items first.
        for scored in outcome.matches {
            if scored.match_info.score < MIN_DELIVERY_SCORE {
                continue;
            }
            let tender = &scored.tender;
            let tender_hash = tender.content_hash();

            match self.db.is_already_notified(user_id, &tender.number).await {
                Ok(true) => {
                    self.db
                        .mark_tender_processed(&tender.number, &tender_hash)
                        .await
                        .ok();
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(error = %err, "idempotency check failed");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }

            let daily_limit = user.tier.daily_notifications_limit();
            match self.db.has_quota(user_id, daily_limit).await {
                Ok(true) => {}
                Ok(false) => {
                    self.notify_quota_exceeded(user_id, active.external_id, daily_limit)
                        .await;
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "quota check failed");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }

            let outcome = self
                .notifier
                .deliver_tender(
                    active.external_id,
                    tender,
                    &scored.match_info,
                    &filter.name,
                )
                .await;

            match outcome {
                SendOutcome::Ok(message_id) => {
                    consecutive_transient = 0;
                    match self
                        .db
                        .record_delivered(
                            user_id,
                            filter.id,
                            &filter.name,
                            tender,
                            scored.match_info.score,
                            &scored.match_info.matched_keywords,
                            NotificationSource::Automonitoring,
                            message_id,
                        )
                        .await
                    {
                        Ok(Some(_)) => {
                            self.stats
                                .notifications_delivered
                                .fetch_add(1, Ordering::Relaxed);
                            tracing::info!(
                                user = user_id,
                                tender = %tender.number,
                                score = scored.match_info.score,
                                "notification delivered"
                            );
                            if let (Some(sheets), Some(sheet_id)) =
                                (self.sheets.as_ref(), self.spreadsheet_id.as_deref())
                            {
                                export_best_effort(sheets, sheet_id, &scored, &filter.name, user.tier)
                                    .await;
                            }
                        }
                        Ok(None) => {
                            // A concurrent poll recorded it first.
                            tracing::debug!(tender = %tender.number, "concurrent duplicate, no-op");
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to record delivery");
                            self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    self.db
                        .mark_tender_processed(&tender.number, &tender_hash)
                        .await
                        .ok();
                }
                SendOutcome::UserBlocked => {
                    tracing::warn!(user = user_id, "user blocked the bot, disabling monitoring");
                    if let Err(err) = self.db.set_monitoring_enabled(user_id, false).await {
                        tracing::error!(error = %err, "failed to disable monitoring");
                    }
                    paused.insert(user_id);
                    break;
                }
                SendOutcome::BadRecipient => {
                    tracing::error!(user = user_id, chat = active.external_id, "bad chat id, dropping notification");
                }
                SendOutcome::Transient => {
                    consecutive_transient += 1;
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    if consecutive_transient >= TRANSIENT_FAILURE_LIMIT {
                        tracing::warn!(
                            user = user_id,
                            "repeated transient delivery failures, pausing user for this cycle"
                        );
                        paused.insert(user_id);
                        break;
                    }
                }
                SendOutcome::RateLimited(_) => {
                    // The sender already waited out the vendor delay and
                    // retried; still throttled means this user is done
                    // for the cycle.
                    tracing::warn!(user = user_id, "still rate limited after retries, pausing user");
                    paused.insert(user_id);
                    break;
                }
            }
        }
    }

    /// Send the quota notice at most once per (user, day).
    async fn notify_quota_exceeded(&self, user_id: i64, chat_id: i64, limit: u32) {
        let today = Utc::now().date_naive();
        let already = self
            .quota_notified
            .get(&user_id)
            .map(|d| *d == today)
            .unwrap_or(false);
        if already {
            return;
        }
        self.quota_notified.insert(user_id, today);
        tracing::info!(user = user_id, limit, "daily quota exhausted");
        let outcome = self.notifier.send_quota_exceeded(chat_id, limit).await;
        if !outcome.is_ok() {
            tracing::warn!(user = user_id, ?outcome, "quota notice delivery failed");
        }
    }
}
