//! Deterministic relevance scoring of tenders against user filters.
//!
//! The matcher either hard-rejects a tender (returns `None`) or produces
//! an explainable score in [0, 100] with the matched keywords and the
//! reasons behind every point awarded. The same `(tender, filter, now)`
//! input always yields the same output for a given dictionary version.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::dictionaries::Dictionaries;
use crate::model::{PurchaseStage, Tender, TenderFilter, TenderKind, TenderMatch};
use crate::util::{root_prefix, word_boundary_match};

const SCORE_COMPOUND: i32 = 35;
const SCORE_DIRECT: i32 = 25;
const SCORE_ROOT: i32 = 18;
const SCORE_SYNONYM: i32 = 20;
const SCORE_BRAND: i32 = 22;
const SCORE_ABBREVIATION: i32 = 22;

pub struct SmartMatcher {
    dicts: Arc<Dictionaries>,
}

impl SmartMatcher {
    pub fn new(dicts: Arc<Dictionaries>) -> SmartMatcher {
        SmartMatcher { dicts }
    }

    /// Score one tender against one filter. `None` means hard reject.
    pub fn match_tender(
        &self,
        tender: &Tender,
        filter: &TenderFilter,
        now: DateTime<Utc>,
    ) -> Option<TenderMatch> {
        let text = tender.searchable_text();
        let name_lower = tender.name.to_lowercase();

        // Hard filters. Any hit rejects the tender outright.
        if let Some(pattern) = self.dicts.find_negative_pattern(&text) {
            tracing::debug!(tender = %tender.number, pattern, "rejected by negative pattern");
            return None;
        }

        for exclude in &filter.exclude_keywords {
            if word_boundary_match(exclude, &text) {
                tracing::debug!(tender = %tender.number, keyword = %exclude, "rejected by exclude keyword");
                return None;
            }
        }

        if let Some(price) = tender.price {
            if let Some(min) = filter.price_min {
                if price < min {
                    return None;
                }
            }
            if let Some(max) = filter.price_max {
                if price > max {
                    return None;
                }
            }
        }

        // Region is a hard filter only when the tender side is known;
        // RSS rows without a region are left for post-enrichment scoring.
        if !filter.regions.is_empty() {
            if let Some(region) = tender
                .customer_region
                .as_deref()
                .filter(|r| !r.trim().is_empty())
            {
                let region_lower = region.to_lowercase();
                let matched = filter
                    .regions
                    .iter()
                    .any(|r| region_lower.contains(&r.to_lowercase()));
                if !matched {
                    tracing::debug!(tender = %tender.number, region = %region, "rejected by region");
                    return None;
                }
            }
        }

        if filter.tender_kinds == [TenderKind::Goods] && self.dicts.looks_like_service(&name_lower)
        {
            tracing::debug!(tender = %tender.number, "rejected: service tender in goods-only filter");
            return None;
        }

        let now_naive = now.naive_utc();
        if let Some(deadline) = tender.submission_deadline {
            match filter.purchase_stage {
                PurchaseStage::Submission if deadline < now_naive => return None,
                PurchaseStage::Archive if deadline >= now_naive => return None,
                _ => {}
            }
        }

        if let (Some(limit), Some(published)) = (filter.publication_days, tender.published_at) {
            if (now - published).num_days() > i64::from(limit) {
                return None;
            }
        }

        // Keyword preparation: peel compound phrases off, then drop
        // stop-words from what remains.
        let (compounds, meaningful) = self.prepare_keywords(&filter.keywords);
        let total_criteria = compounds.len() + meaningful.len();
        if total_criteria == 0 {
            tracing::debug!(filter = filter.id, "no meaningful criteria after stop-word filtering");
            return None;
        }

        let mut score: i32 = 0;
        let mut matched_keywords: Vec<String> = Vec::new();
        let mut reasons: Vec<String> = Vec::new();

        for phrase in &compounds {
            let mut hit = false;
            if text.contains(phrase.as_str()) {
                score += SCORE_COMPOUND;
                reasons.push(format!("Составная фраза: {}", phrase));
                hit = true;
            }
            if let Some(synonym) = self
                .dicts
                .compound_synonyms(phrase)
                .iter()
                .find(|s| text.contains(&s.to_lowercase()))
            {
                score += SCORE_COMPOUND;
                reasons.push(format!("Синоним фразы «{}»: {}", phrase, synonym));
                hit = true;
            }
            if hit {
                matched_keywords.push(format!("📌 {}", phrase));
            }
        }

        for keyword in &meaningful {
            if let Some((points, label, reason)) = self.match_keyword(keyword, &text) {
                score += points;
                matched_keywords.push(label);
                reasons.push(reason);
            }
        }

        if matched_keywords.is_empty() {
            return None;
        }

        // Coverage adjustment: spread-out filters that barely match get
        // dampened, dense matches get amplified.
        let ratio = matched_keywords.len() as f64 / total_criteria as f64;
        if total_criteria >= 3 && ratio < 0.3 {
            score -= score * 3 / 10;
        } else if ratio >= 0.7 {
            score += score * 2 / 10;
        }

        // Price centrality: the closer to the middle of the band, the
        // better the fit.
        if let (Some(min), Some(max), Some(price)) =
            (filter.price_min, filter.price_max, tender.price)
        {
            if max > min {
                let mid = (min + max) / 2.0;
                let bonus = ((1.0 - 2.0 * (price - mid).abs() / (max - min)) * 20.0).round() as i32;
                let bonus = bonus.clamp(0, 20);
                if bonus > 0 {
                    score += bonus;
                    reasons.push(format!("Цена в целевом диапазоне (+{})", bonus));
                }
            }
        }

        if let Some(published) = tender.published_at {
            let days_old = (now - published).num_days();
            if days_old == 0 {
                score += 10;
                reasons.push("Опубликован сегодня".into());
            } else if (1..=3).contains(&days_old) {
                score += 5;
                reasons.push("Опубликован недавно".into());
            }
        }

        let score = score.clamp(0, 100) as u32;

        Some(TenderMatch {
            score,
            matched_keywords,
            reasons,
            red_flags: detect_red_flags(tender, now),
            ai_verified: false,
            ai_skipped: false,
            ai_confidence: None,
            ai_reason: None,
        })
    }

    /// Split filter keywords into compound phrases and meaningful single
    /// keys, dropping stop-words. Falls back to word extraction when the
    /// filter consists entirely of phrases built from stop-words.
    fn prepare_keywords(&self, keywords: &[String]) -> (Vec<String>, Vec<String>) {
        let mut compounds = Vec::new();
        let mut remaining = Vec::new();

        for keyword in keywords {
            let lower = keyword.trim().to_lowercase();
            if lower.is_empty() {
                continue;
            }
            if self.dicts.is_compound_phrase(&lower) {
                compounds.push(lower);
            } else if let Some(phrase) = self.dicts.compound_phrase_within(&lower) {
                compounds.push(phrase.to_string());
                let leftover = lower.replace(phrase, " ");
                for word in leftover.split_whitespace() {
                    if word.chars().count() >= 3 && !self.dicts.is_stop_word(word) {
                        remaining.push(word.to_string());
                    }
                }
            } else {
                remaining.push(lower);
            }
        }

        let mut meaningful: Vec<String> = remaining
            .into_iter()
            .filter(|k| !self.dicts.is_stop_word(k))
            .collect();

        if meaningful.is_empty() && compounds.is_empty() {
            for keyword in keywords {
                for word in keyword.split([',', ' ']) {
                    let word = word.trim().to_lowercase();
                    if word.chars().count() >= 3 && !self.dicts.is_stop_word(&word) {
                        meaningful.push(word);
                    }
                }
            }
        }

        (compounds, meaningful)
    }

    /// Match a single prepared key against the tender text, trying the
    /// cheapest strategies first. Returns (points, matched label, reason).
    fn match_keyword(&self, keyword: &str, text: &str) -> Option<(i32, String, String)> {
        if word_boundary_match(keyword, text) {
            return Some((
                SCORE_DIRECT,
                keyword.to_string(),
                format!("Ключевое слово: {}", keyword),
            ));
        }

        if keyword.chars().count() >= 5 {
            let root = root_prefix(keyword);
            if word_boundary_match(&root, text) {
                return Some((
                    SCORE_ROOT,
                    format!("{} (частичное)", keyword),
                    format!("Корень слова: {}*", root),
                ));
            }
        }

        if let Some(synonym) = self
            .dicts
            .synonyms_for(keyword)
            .iter()
            .find(|s| word_boundary_match(s, text))
        {
            return Some((
                SCORE_SYNONYM,
                format!("{} (синоним: {})", keyword, synonym),
                format!("Синоним: {} → {}", synonym, keyword),
            ));
        }

        if let Some(brand) = self
            .dicts
            .brands_for(keyword)
            .iter()
            .find(|b| word_boundary_match(b, text))
        {
            return Some((
                SCORE_BRAND,
                format!("{} (бренд: {})", keyword, brand),
                format!("Бренд: {} → {}", brand, keyword),
            ));
        }

        if let Some(expansion) = self
            .dicts
            .abbreviations_for(keyword)
            .iter()
            .find(|a| word_boundary_match(a, text))
        {
            return Some((
                SCORE_ABBREVIATION,
                format!("{} (аббр: {})", keyword, expansion),
                format!("Аббревиатура: {} → {}", expansion, keyword),
            ));
        }

        None
    }
}

/// Warnings worth surfacing next to a match: deadlines about to close,
/// unusually large contracts, missing price data.
pub fn detect_red_flags(tender: &Tender, now: DateTime<Utc>) -> Vec<String> {
    let mut flags = Vec::new();
    if let Some(days) = tender.days_to_deadline(now.naive_utc()) {
        if (0..3).contains(&days) {
            flags.push("Срочная подача: менее 3 дней".to_string());
        }
    }
    match tender.price {
        Some(price) if price >= 50_000_000.0 => {
            flags.push("Крупный контракт: проверьте обеспечение".to_string());
        }
        None => flags.push("Цена не указана".to_string()),
        _ => {}
    }
    flags
}
