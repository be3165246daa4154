//! Instant search: a one-shot run of the full pipeline for a single
//! filter — RSS fan-out over transliteration variants, cheap RSS-only
//! filtering, pre-scoring, selective card enrichment, final scoring and
//! the optional AI relevance gate.
//!
//! The monitoring loop drives the same path with a small `max_tenders`
//! and AI reserved for premium users.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::task::JoinSet;

use crate::dictionaries::Dictionaries;
use crate::error::SniperError;
use crate::matcher::SmartMatcher;
use crate::model::{ScoredTender, Tender, TenderFilter, TenderKind, Tier};
use crate::portal::{PortalApi, RssQuery};
use crate::ai::relevance::{RelevanceChecker, VerdictSource};
use crate::ai::expander::fallback_intent;
use crate::translit::query_variants;
use crate::util::{root_prefix, word_boundary_match};

/// Tenders below this pre-score are not worth a card fetch.
const MIN_PRESCORE_FOR_ENRICHMENT: u32 = 1;
/// Scores at or above this skip the AI gate entirely.
const AI_SKIP_SCORE: u32 = 85;
/// Session enrichment cache bound; oldest entries leave first.
const ENRICHMENT_CACHE_CAP: usize = 500;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_tenders: usize,
    pub use_ai: bool,
    pub user_id: Option<i64>,
    pub tier: Tier,
    /// Extra terms suggested by the query expander; the user's own
    /// keywords always run first.
    pub expanded_keywords: Vec<String>,
}

impl SearchOptions {
    pub fn new(max_tenders: usize) -> SearchOptions {
        SearchOptions {
            max_tenders,
            use_ai: false,
            user_id: None,
            tier: Tier::Trial,
            expanded_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Score-descending, capped at `max_tenders`.
    pub matches: Vec<ScoredTender>,
    /// Unique tenders seen before scoring.
    pub total_found: usize,
    pub queries: Vec<String>,
    pub ai_rejected: usize,
}

/// Enriched card fields cached for the session, keyed by tender number.
#[derive(Debug, Clone)]
struct EnrichedFields {
    price: Option<f64>,
    submission_deadline: Option<chrono::NaiveDateTime>,
    customer_name: Option<String>,
    customer_region: Option<String>,
    customer_city: Option<String>,
    customer_address: Option<String>,
}

impl EnrichedFields {
    fn capture(tender: &Tender) -> EnrichedFields {
        EnrichedFields {
            price: tender.price,
            submission_deadline: tender.submission_deadline,
            customer_name: tender.customer_name.clone(),
            customer_region: tender.customer_region.clone(),
            customer_city: tender.customer_city.clone(),
            customer_address: tender.customer_address.clone(),
        }
    }

    fn apply(&self, tender: &mut Tender) {
        if self.price.is_some() {
            tender.price = self.price;
        }
        if self.submission_deadline.is_some() {
            tender.submission_deadline = self.submission_deadline;
        }
        tender.customer_name = self.customer_name.clone().or(tender.customer_name.take());
        tender.customer_region = self.customer_region.clone().or(tender.customer_region.take());
        tender.customer_city = self.customer_city.clone().or(tender.customer_city.take());
        tender.customer_address = self
            .customer_address
            .clone()
            .or(tender.customer_address.take());
    }
}

pub struct InstantSearch {
    portal: Arc<dyn PortalApi>,
    matcher: Arc<SmartMatcher>,
    relevance: Arc<RelevanceChecker>,
    dicts: Arc<Dictionaries>,
    enrichment_cache: DashMap<String, EnrichedFields>,
    enrichment_order: Mutex<VecDeque<String>>,
}

impl InstantSearch {
    pub fn new(
        portal: Arc<dyn PortalApi>,
        matcher: Arc<SmartMatcher>,
        relevance: Arc<RelevanceChecker>,
        dicts: Arc<Dictionaries>,
    ) -> InstantSearch {
        InstantSearch {
            portal,
            matcher,
            relevance,
            dicts,
            enrichment_cache: DashMap::new(),
            enrichment_order: Mutex::new(VecDeque::new()),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.enrichment_cache.len()
    }

    /// Run the search for one filter.
    pub async fn search_by_filter(
        &self,
        filter: &TenderFilter,
        opts: &SearchOptions,
    ) -> Result<SearchOutcome, SniperError> {
        if filter.keywords.is_empty() {
            return Err(SniperError::Contract(format!(
                "filter {} has no keywords",
                filter.id
            )));
        }
        let now = Utc::now();
        tracing::info!(filter = %filter.name, "instant search started");

        // The user's keywords plus at most three expander suggestions.
        let mut queries: Vec<String> = filter.keywords.clone();
        queries.extend(
            opts.expanded_keywords
                .iter()
                .filter(|k| !filter.keywords.iter().any(|orig| orig.eq_ignore_ascii_case(k)))
                .take(3)
                .cloned(),
        );

        let (fetched, failed_calls) = self.fetch_variants(filter, &queries, opts.max_tenders).await;
        if fetched.is_empty() && failed_calls > 0 {
            // Every variant call failed: surface the error instead of a
            // silently empty report.
            return Err(SniperError::Network(
                "портал закупок недоступен, повторите поиск позже".into(),
            ));
        }
        let candidates = self.rss_level_filter(filter, fetched, now);
        let total_found = candidates.len();
        tracing::info!(filter = %filter.name, total_found, "RSS candidates after cheap filters");

        // Pre-score without regions (RSS rows rarely carry one), enrich
        // only what survives, then re-score with the full filter.
        let prescore_filter = filter.without_regions();
        let mut to_enrich: Vec<Tender> = Vec::new();
        let mut skipped = 0usize;
        for mut tender in candidates {
            if let Some(cached) = self.enrichment_cache.get(&tender.number) {
                cached.apply(&mut tender);
                // Cached rows are already enriched: run the full filter.
                if self.matcher.match_tender(&tender, filter, now).is_some() {
                    to_enrich.push(tender);
                } else {
                    skipped += 1;
                }
                continue;
            }
            let pre = self
                .matcher
                .match_tender(&tender, &prescore_filter, now)
                .map(|m| m.score)
                .unwrap_or(0);
            if pre < MIN_PRESCORE_FOR_ENRICHMENT {
                skipped += 1;
                continue;
            }
            to_enrich.push(tender);
        }
        if skipped > 0 {
            tracing::debug!(skipped, "dropped below pre-score threshold");
        }

        let enriched = self.enrich_all(to_enrich).await;

        let mut matches: Vec<ScoredTender> = Vec::new();
        for tender in enriched {
            let Some(match_info) = self.matcher.match_tender(&tender, filter, now) else {
                continue;
            };
            matches.push(ScoredTender { tender, match_info });
        }

        let ai_rejected = if opts.use_ai {
            self.apply_ai_gate(filter, &mut matches, opts).await
        } else {
            for scored in matches.iter_mut() {
                scored.match_info.ai_skipped = true;
            }
            0
        };

        matches.sort_by(|a, b| b.match_info.score.cmp(&a.match_info.score));
        matches.truncate(opts.max_tenders);

        tracing::info!(
            filter = %filter.name,
            matches = matches.len(),
            ai_rejected,
            "instant search finished"
        );

        Ok(SearchOutcome {
            matches,
            total_found,
            queries,
            ai_rejected,
        })
    }

    /// One portal call per transliteration variant, at most two variants
    /// per keyword, variants fetched concurrently.
    async fn fetch_variants(
        &self,
        filter: &TenderFilter,
        queries: &[String],
        max_tenders: usize,
    ) -> (Vec<Tender>, usize) {
        // With exactly one kind the portal filters server-side; any mix
        // is filtered client-side instead.
        let kind_for_rss = match filter.tender_kinds.as_slice() {
            [kind] => Some(*kind),
            _ => None,
        };
        let per_variant = ((max_tenders * 3) / 2) as u32;

        let mut collected: Vec<Tender> = Vec::new();
        let mut failed_calls = 0usize;
        for keyword in queries {
            let mut set: JoinSet<Result<Vec<Tender>, crate::portal::PortalError>> = JoinSet::new();
            for variant in query_variants(keyword) {
                let portal = Arc::clone(&self.portal);
                let query = RssQuery {
                    keyword: variant,
                    price_min: filter.price_min,
                    price_max: filter.price_max,
                    regions: filter.regions.clone(),
                    max_results: per_variant,
                    tender_kind: kind_for_rss,
                    law_type: filter.law_type,
                    purchase_stage: filter.purchase_stage,
                    okpd2_codes: filter.okpd2_codes.clone(),
                };
                set.spawn(async move { portal.search_rss(&query).await });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(mut tenders)) => {
                        // The portal rounds page sizes up; hold the line
                        // at max_tenders x 1.5 per variant ourselves.
                        tenders.truncate(per_variant as usize);
                        collected.extend(tenders);
                    }
                    Ok(Err(err)) => {
                        failed_calls += 1;
                        tracing::warn!(keyword = %keyword, error = %err, "RSS variant failed")
                    }
                    Err(err) => {
                        failed_calls += 1;
                        tracing::error!(error = %err, "RSS fetch task panicked")
                    }
                }
            }
        }
        // Every positive keyword gets its RSS sweep; the per-variant cap
        // and the final truncate bound the work, not keyword skipping.
        (collected, failed_calls)
    }

    /// Cheap filters applied on RSS data alone: dedupe, exclude
    /// keywords, keyword presence (the feed is noisy), deadline sanity
    /// and customer-name keywords.
    fn rss_level_filter(
        &self,
        filter: &TenderFilter,
        tenders: Vec<Tender>,
        now: chrono::DateTime<Utc>,
    ) -> Vec<Tender> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept = Vec::new();
        let now_naive = now.naive_utc();

        'tender: for tender in tenders {
            if tender.number.is_empty() || !seen.insert(tender.number.clone()) {
                continue;
            }
            let text = tender.searchable_text();

            for exclude in &filter.exclude_keywords {
                if word_boundary_match(exclude, &text) {
                    continue 'tender;
                }
            }

            if !self.contains_any_keyword(&filter.keywords, &text) {
                tracing::debug!(tender = %tender.number, "RSS item does not contain filter keywords");
                continue;
            }

            if let Some(days_left) = tender.days_to_deadline(now_naive) {
                if days_left < 0 {
                    // Expired tenders are noise only when hunting live
                    // ones; `archive` wants them and `any` spans both.
                    if filter.purchase_stage == crate::model::PurchaseStage::Submission {
                        continue;
                    }
                } else if let Some(min_days) = filter.min_deadline_days {
                    if days_left < i64::from(min_days) {
                        continue;
                    }
                }
            }

            if !filter.customer_keywords.is_empty() {
                if let Some(customer) = tender.customer_name.as_deref() {
                    let customer_lower = customer.to_lowercase();
                    if !filter
                        .customer_keywords
                        .iter()
                        .any(|kw| customer_lower.contains(&kw.to_lowercase()))
                    {
                        continue;
                    }
                }
            }

            kept.push(tender);
        }
        kept
    }

    /// The RSS feed may return items that never mention the search
    /// keyword. Require at least one keyword, its transliteration, its
    /// morphological root or a dictionary synonym to be present.
    fn contains_any_keyword(&self, keywords: &[String], text: &str) -> bool {
        for keyword in keywords {
            let lower = keyword.trim().to_lowercase();
            if lower.chars().count() < 2 || self.dicts.is_stop_word(&lower) {
                continue;
            }
            if text.contains(&lower) {
                return true;
            }
            for variant in query_variants(&lower).into_iter().skip(1) {
                if text.contains(&variant.to_lowercase()) {
                    return true;
                }
            }
            if lower.chars().count() >= 5 && !lower.is_ascii() {
                if text.contains(&root_prefix(&lower)) {
                    return true;
                }
            }
            if self
                .dicts
                .synonyms_for(&lower)
                .iter()
                .any(|s| text.contains(&s.to_lowercase()))
            {
                return true;
            }
        }
        false
    }

    async fn enrich_all(&self, tenders: Vec<Tender>) -> Vec<Tender> {
        let mut enriched = Vec::with_capacity(tenders.len());
        for tender in tenders {
            if self.enrichment_cache.contains_key(&tender.number) {
                enriched.push(tender);
                continue;
            }
            let result = self.portal.enrich_from_card(&tender).await;
            self.cache_enrichment(&result);
            enriched.push(result);
        }
        enriched
    }

    fn cache_enrichment(&self, tender: &Tender) {
        if tender.number.is_empty() {
            return;
        }
        self.enrichment_cache
            .insert(tender.number.clone(), EnrichedFields::capture(tender));
        let mut order = self.enrichment_order.lock().expect("cache order lock");
        order.push_back(tender.number.clone());
        while order.len() > ENRICHMENT_CACHE_CAP {
            if let Some(oldest) = order.pop_front() {
                self.enrichment_cache.remove(&oldest);
            }
        }
    }

    /// AI relevance gate over scored matches. Returns the number of
    /// rejections. High scores bypass the gate; quota exhaustion lets
    /// the remainder through unchecked.
    async fn apply_ai_gate(
        &self,
        filter: &TenderFilter,
        matches: &mut Vec<ScoredTender>,
        opts: &SearchOptions,
    ) -> usize {
        let intent = filter
            .ai_intent
            .clone()
            .filter(|i| !i.trim().is_empty())
            .unwrap_or_else(|| fallback_intent(&filter.name, &filter.keywords));

        let mut kept: Vec<ScoredTender> = Vec::with_capacity(matches.len());
        let mut rejected = 0usize;
        let mut quota_hit = false;
        let drained: Vec<ScoredTender> = std::mem::take(matches);

        for mut scored in drained {
            if quota_hit || scored.match_info.score >= AI_SKIP_SCORE {
                scored.match_info.ai_skipped = true;
                kept.push(scored);
                continue;
            }

            let verdict = self
                .relevance
                .check(
                    &scored.tender.name,
                    &scored.tender.description,
                    &intent,
                    &filter.keywords,
                    opts.user_id,
                    opts.tier,
                )
                .await;

            if verdict.source == VerdictSource::QuotaExceeded {
                quota_hit = true;
                scored.match_info.ai_skipped = true;
                kept.push(scored);
                continue;
            }

            if verdict.is_relevant {
                scored.match_info.ai_verified = verdict.source == VerdictSource::Ai;
                scored.match_info.ai_skipped = verdict.source != VerdictSource::Ai;
                scored.match_info.ai_confidence = Some(verdict.confidence);
                scored.match_info.ai_reason = Some(verdict.reason);
                kept.push(scored);
            } else {
                tracing::debug!(
                    tender = %scored.tender.number,
                    confidence = verdict.confidence,
                    reason = %verdict.reason,
                    "AI gate rejected tender"
                );
                rejected += 1;
            }
        }

        *matches = kept;
        rejected
    }
}
