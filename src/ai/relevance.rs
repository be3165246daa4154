//! Semantic relevance gate: "would a domain expert consider this tender
//! relevant to this filter's intent?"
//!
//! Deliberately conservative — the prompt instructs the model to reject
//! on doubt and anything under the confidence threshold is overridden to
//! not-relevant. Unavailability is the one exception: quota exhaustion,
//! missing backend and transport errors all fail OPEN, because silently
//! dropping matches loses leads while a false positive merely costs the
//! user a glance.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use super::{extract_json, render, LlmApi, LlmRequest, RELEVANCE_PROMPT};
use crate::model::Tier;
use crate::util::text_hash;

const CACHE_TTL_HOURS: i64 = 24;
const CACHE_CAP: usize = 10_000;
/// When the cache overflows, the oldest fifth goes.
const CACHE_EVICT: usize = CACHE_CAP / 5;

const CONFIDENCE_ACCEPT: u32 = 85;
const CONFIDENCE_RECHECK: u32 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Ai,
    Cache,
    QuotaExceeded,
    Error,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RelevanceVerdict {
    pub is_relevant: bool,
    pub confidence: u32,
    pub reason: String,
    pub source: VerdictSource,
    /// Remaining daily checks, -1 when no user context was supplied.
    pub quota_remaining: i64,
}

#[derive(Clone)]
struct CacheEntry {
    is_relevant: bool,
    confidence: u32,
    reason: String,
    inserted_at: DateTime<Utc>,
}

struct UsageCounter {
    date: NaiveDate,
    count: u32,
}

/// In-process relevance checker with a decision cache and per-user daily
/// quota counters. Both reset on process restart; the datastore remains
/// the source of truth for everything durable.
pub struct RelevanceChecker {
    llm: Option<Arc<dyn LlmApi>>,
    cache: DashMap<String, CacheEntry>,
    usage: DashMap<i64, UsageCounter>,
}

impl RelevanceChecker {
    pub fn new(llm: Option<Arc<dyn LlmApi>>) -> RelevanceChecker {
        RelevanceChecker {
            llm,
            cache: DashMap::new(),
            usage: DashMap::new(),
        }
    }

    /// Whether the user still has AI checks left today.
    pub fn has_quota(&self, user_id: i64, tier: Tier) -> bool {
        let today = Utc::now().date_naive();
        let used = self
            .usage
            .get(&user_id)
            .filter(|c| c.date == today)
            .map(|c| c.count)
            .unwrap_or(0);
        used < tier.ai_daily_limit()
    }

    pub fn quota_remaining(&self, user_id: i64, tier: Tier) -> i64 {
        let today = Utc::now().date_naive();
        let used = self
            .usage
            .get(&user_id)
            .filter(|c| c.date == today)
            .map(|c| c.count)
            .unwrap_or(0);
        i64::from(tier.ai_daily_limit()) - i64::from(used)
    }

    fn increment_usage(&self, user_id: i64) {
        let today = Utc::now().date_naive();
        let mut entry = self.usage.entry(user_id).or_insert(UsageCounter {
            date: today,
            count: 0,
        });
        if entry.date != today {
            entry.date = today;
            entry.count = 0;
        }
        entry.count += 1;
    }

    fn cache_key(tender_name: &str, filter_intent: &str) -> String {
        text_hash(&format!(
            "{}|{}",
            tender_name.trim().to_lowercase(),
            filter_intent.trim().to_lowercase()
        ))
    }

    fn cache_get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.cache.get(key)?;
        if (Utc::now() - entry.inserted_at).num_hours() < CACHE_TTL_HOURS {
            Some(entry.clone())
        } else {
            drop(entry);
            self.cache.remove(key);
            None
        }
    }

    fn cache_put(&self, key: String, entry: CacheEntry) {
        self.cache.insert(key, entry);
        if self.cache.len() > CACHE_CAP {
            let mut stamps: Vec<(String, DateTime<Utc>)> = self
                .cache
                .iter()
                .map(|e| (e.key().clone(), e.value().inserted_at))
                .collect();
            stamps.sort_by_key(|(_, at)| *at);
            for (key, _) in stamps.into_iter().take(CACHE_EVICT) {
                self.cache.remove(&key);
            }
        }
    }

    /// Check one tender against a filter intent.
    pub async fn check(
        &self,
        tender_name: &str,
        tender_description: &str,
        filter_intent: &str,
        filter_keywords: &[String],
        user_id: Option<i64>,
        tier: Tier,
    ) -> RelevanceVerdict {
        if let Some(uid) = user_id {
            if !self.has_quota(uid, tier) {
                tracing::info!(user = uid, tier = tier.as_str(), "AI quota exhausted");
                return RelevanceVerdict {
                    is_relevant: true,
                    confidence: 50,
                    reason: "Квота AI проверок исчерпана, используется keyword matching".into(),
                    source: VerdictSource::QuotaExceeded,
                    quota_remaining: 0,
                };
            }
        }

        let key = Self::cache_key(tender_name, filter_intent);
        if let Some(hit) = self.cache_get(&key) {
            return RelevanceVerdict {
                is_relevant: hit.is_relevant,
                confidence: hit.confidence,
                reason: hit.reason,
                source: VerdictSource::Cache,
                quota_remaining: user_id
                    .map(|uid| self.quota_remaining(uid, tier))
                    .unwrap_or(-1),
            };
        }

        let Some(llm) = self.llm.as_ref() else {
            return RelevanceVerdict {
                is_relevant: true,
                confidence: 50,
                reason: "AI недоступен, используется keyword matching".into(),
                source: VerdictSource::Fallback,
                quota_remaining: -1,
            };
        };

        let description_block = if tender_description.trim().is_empty() {
            String::new()
        } else {
            let capped: String = tender_description.chars().take(500).collect();
            format!("\nОписание: {}", capped)
        };
        let prompt = render(
            RELEVANCE_PROMPT,
            &[
                ("filterIntent", filter_intent),
                ("filterKeywords", &filter_keywords.join(", ")),
                ("tenderName", tender_name),
                ("descriptionBlock", &description_block),
            ],
        );

        let reply = llm
            .complete(LlmRequest {
                system: None,
                user: prompt,
                max_tokens: 150,
                temperature: 0.1,
            })
            .await;

        let reply = match reply {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(error = %err, "AI relevance check failed");
                return RelevanceVerdict {
                    is_relevant: true,
                    confidence: 50,
                    reason: format!("Ошибка AI: {}", err),
                    source: VerdictSource::Error,
                    quota_remaining: -1,
                };
            }
        };

        let (mut is_relevant, confidence, mut reason) = match extract_json(&reply) {
            Some(value) => (
                value["relevant"].as_bool().unwrap_or(false),
                value["confidence"].as_u64().unwrap_or(50).min(100) as u32,
                value["reason"]
                    .as_str()
                    .unwrap_or("Нет объяснения")
                    .to_string(),
            ),
            None => {
                tracing::warn!(reply = %reply.chars().take(100).collect::<String>(), "unparseable AI reply");
                (false, 0, "Не удалось определить релевантность".into())
            }
        };

        // Strict threshold: confident approvals only.
        if confidence < CONFIDENCE_ACCEPT {
            if is_relevant && confidence >= CONFIDENCE_RECHECK {
                reason = format!("Недостаточная уверенность ({}%): {}", confidence, reason);
            }
            is_relevant = false;
        }

        self.cache_put(
            key,
            CacheEntry {
                is_relevant,
                confidence,
                reason: reason.clone(),
                inserted_at: Utc::now(),
            },
        );
        if let Some(uid) = user_id {
            self.increment_usage(uid);
        }

        tracing::debug!(
            relevant = is_relevant,
            confidence,
            "AI relevance verdict"
        );

        RelevanceVerdict {
            is_relevant,
            confidence,
            reason,
            source: VerdictSource::Ai,
            quota_remaining: user_id
                .map(|uid| self.quota_remaining(uid, tier))
                .unwrap_or(-1),
        }
    }
}
