//! Premium AI enrichment: tender summarisation and documentation
//! extraction. Both operations report whether AI actually ran so callers
//! can label the output, and both degrade to deterministic fallbacks
//! built from known fields.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{extract_json, render, LlmApi, LlmRequest, EXTRACT_PROMPT, SUMMARIZE_PROMPT};
use crate::model::{Tender, Tier};
use crate::util::text_hash;

const SUMMARY_CACHE_TTL_DAYS: i64 = 7;
const SUMMARY_CACHE_CAP: usize = 1000;
const MAX_INPUT_CHARS: usize = 15_000;

/// Structured documentation fields pulled from tender paperwork.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenderDocumentation {
    #[serde(default)]
    pub items: Vec<DocumentationItem>,
    pub trading_platform: Option<String>,
    pub submission_deadline: Option<String>,
    pub delivery_terms: Option<String>,
    pub license_requirements: Option<String>,
    pub payment_terms: Option<String>,
    pub contract_security: Option<String>,
    pub quality_standards: Option<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentationItem {
    pub name: String,
    pub quantity: Option<String>,
    pub specs: Option<String>,
}

struct CachedSummary {
    summary: String,
    created_at: DateTime<Utc>,
}

/// Summariser + documentation extractor, gated on the premium tier.
pub struct AiEnrichment {
    llm: Option<Arc<dyn LlmApi>>,
    summary_cache: DashMap<String, CachedSummary>,
}

impl AiEnrichment {
    pub fn new(llm: Option<Arc<dyn LlmApi>>) -> AiEnrichment {
        AiEnrichment {
            llm,
            summary_cache: DashMap::new(),
        }
    }

    /// Short fixed-format summary of the tender text. Returns the text
    /// and whether AI produced it.
    pub async fn summarize(&self, text: &str, tender: &Tender, tier: Tier) -> (String, bool) {
        if !tier.is_premium() {
            return (locked_feature_message("резюме тендера"), false);
        }

        let cache_key = text_hash(text);
        if let Some(entry) = self.summary_cache.get(&cache_key) {
            if (Utc::now() - entry.created_at).num_days() < SUMMARY_CACHE_TTL_DAYS {
                return (entry.summary.clone(), true);
            }
        }

        let Some(llm) = self.llm.as_ref() else {
            return (fallback_summary(tender), false);
        };

        let capped: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let mut context = Vec::new();
        if let Some(price) = tender.price {
            context.push(format!("Начальная цена: {:.0} ₽", price));
        }
        if let Some(deadline) = tender.submission_deadline {
            context.push(format!("Срок подачи: {}", deadline.format("%d.%m.%Y %H:%M")));
        }
        if let Some(customer) = &tender.customer_name {
            context.push(format!("Заказчик: {}", customer));
        }

        let user = format!(
            "Проанализируй этот тендер и создай краткое резюме:\n\n{}\n\nОПИСАНИЕ ТЕНДЕРА:\n{}",
            context.join("\n"),
            capped
        );

        match llm
            .complete(LlmRequest {
                system: Some(SUMMARIZE_PROMPT.to_string()),
                user,
                max_tokens: 500,
                temperature: 0.2,
            })
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => {
                let summary = summary.trim().to_string();
                self.cache_summary(cache_key, summary.clone());
                (summary, true)
            }
            Ok(_) => (fallback_summary(tender), false),
            Err(err) => {
                tracing::warn!(error = %err, tender = %tender.number, "AI summary failed");
                (fallback_summary(tender), false)
            }
        }
    }

    /// Structured extraction from documentation text. Returns the object
    /// and whether AI produced it.
    pub async fn extract_documentation(
        &self,
        text: &str,
        tender: &Tender,
        tier: Tier,
    ) -> (TenderDocumentation, bool) {
        if !tier.is_premium() {
            return (fallback_extraction(text), false);
        }
        let Some(llm) = self.llm.as_ref() else {
            return (fallback_extraction(text), false);
        };

        let capped: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let prompt = render(EXTRACT_PROMPT, &[("documentText", capped.as_str())]);

        let reply = match llm
            .complete(LlmRequest {
                system: None,
                user: prompt,
                max_tokens: 1200,
                temperature: 0.1,
            })
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, tender = %tender.number, "AI extraction failed");
                return (fallback_extraction(text), false);
            }
        };

        match extract_json(&reply).and_then(|v| serde_json::from_value(v).ok()) {
            Some(doc) => (doc, true),
            None => {
                tracing::warn!(tender = %tender.number, "AI extraction reply was not valid JSON");
                (fallback_extraction(&capped), false)
            }
        }
    }

    fn cache_summary(&self, key: String, summary: String) {
        self.summary_cache.insert(
            key,
            CachedSummary {
                summary,
                created_at: Utc::now(),
            },
        );
        if self.summary_cache.len() > SUMMARY_CACHE_CAP {
            let mut stamps: Vec<(String, DateTime<Utc>)> = self
                .summary_cache
                .iter()
                .map(|e| (e.key().clone(), e.value().created_at))
                .collect();
            stamps.sort_by_key(|(_, at)| *at);
            for (key, _) in stamps.into_iter().take(SUMMARY_CACHE_CAP / 10) {
                self.summary_cache.remove(&key);
            }
        }
    }
}

fn locked_feature_message(feature: &str) -> String {
    format!(
        "🔒 Функция «{}» доступна на тарифе Премиум.\nОбновите подписку, чтобы включить AI-анализ.",
        feature
    )
}

/// Deterministic five-line summary from whatever fields we have.
pub fn fallback_summary(tender: &Tender) -> String {
    let name: String = tender.name.chars().take(200).collect();
    let price = tender
        .price
        .map(|p| format!("{:.0} ₽", p))
        .unwrap_or_else(|| "Не указана".into());
    let deadline = tender
        .submission_deadline
        .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| "Не указаны".into());

    format!(
        "📋 СУТЬ: {}\n💰 БЮДЖЕТ: {}\n📅 СРОКИ: {}\n⚠️ ТРЕБОВАНИЯ: См. документацию тендера\n🚩 РИСКИ: Требуется детальный анализ",
        name, price, deadline
    )
}

static DEADLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:срок[аи]?\s+подачи|подача заявок)[^\d]{0,30}(\d{2}\.\d{2}\.\d{4}(?:\s+\d{2}:\d{2})?)").unwrap());
static SECURITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"обеспечени[ея][^.\n]{0,120}").unwrap());
static PAYMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:порядок|срок[и]?|услови[я])\s+оплаты[^.\n]{0,120}").unwrap());

/// Regex-based partial extraction used when AI is unavailable.
pub fn fallback_extraction(text: &str) -> TenderDocumentation {
    let lower = text.to_lowercase();
    let summary: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(200)
        .collect();

    TenderDocumentation {
        submission_deadline: DEADLINE_RE.captures(&lower).map(|c| c[1].to_string()),
        contract_security: SECURITY_RE.find(&lower).map(|m| m.as_str().trim().to_string()),
        payment_terms: PAYMENT_RE.find(&lower).map(|m| m.as_str().trim().to_string()),
        summary: if summary.is_empty() { None } else { Some(summary) },
        ..TenderDocumentation::default()
    }
}
