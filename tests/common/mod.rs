//! Shared fixtures for the integration tests: canned tenders, filter
//! builders and recording fakes for the portal, chat and LLM
//! collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tender_sniper::ai::relevance::RelevanceChecker;
use tender_sniper::ai::{LlmApi, LlmRequest};
use tender_sniper::dictionaries::Dictionaries;
use tender_sniper::error::{SendOutcome, SniperError};
use tender_sniper::matcher::SmartMatcher;
use tender_sniper::model::{LawType, PurchaseStage, Tender, TenderFilter, Tier};
use tender_sniper::notify::ChatApi;
use tender_sniper::portal::{PortalApi, PortalError, RssQuery};
use tender_sniper::search::InstantSearch;
use tender_sniper::store::Db;

/// A filter with sensible defaults; tweak fields per test.
pub fn filter(keywords: &[&str]) -> TenderFilter {
    TenderFilter {
        id: 1,
        user_id: 1,
        name: "IT оборудование".into(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        exclude_keywords: Vec::new(),
        price_min: None,
        price_max: None,
        regions: Vec::new(),
        tender_kinds: Vec::new(),
        law_type: LawType::Both,
        purchase_stage: PurchaseStage::Submission,
        okpd2_codes: Vec::new(),
        min_deadline_days: None,
        customer_keywords: Vec::new(),
        publication_days: None,
        is_active: true,
        ai_intent: None,
        created_at: None,
        updated_at: None,
    }
}

/// A tender published now with a one-week submission window.
pub fn tender(number: &str, name: &str) -> Tender {
    Tender {
        number: number.into(),
        name: name.into(),
        url: format!(
            "https://zakupki.gov.ru/epz/order/notice/ea44/view/common-info.html?regNumber={}",
            number
        ),
        description: String::new(),
        published_at: Some(Utc::now()),
        price: None,
        customer_name: None,
        customer_region: None,
        customer_city: None,
        customer_address: None,
        submission_deadline: Some((Utc::now() + Duration::days(7)).naive_utc()),
    }
}

/// Portal fake: returns the same canned tenders for every RSS query and
/// records how many calls were made. Enrichment is a lookup table by
/// tender number.
pub struct FakePortal {
    pub tenders: Mutex<Vec<Tender>>,
    pub enriched: Mutex<Vec<Tender>>,
    pub search_calls: Mutex<u32>,
    pub fail_with: Mutex<Option<String>>,
}

impl FakePortal {
    pub fn with_tenders(tenders: Vec<Tender>) -> Arc<FakePortal> {
        Arc::new(FakePortal {
            tenders: Mutex::new(tenders),
            enriched: Mutex::new(Vec::new()),
            search_calls: Mutex::new(0),
            fail_with: Mutex::new(None),
        })
    }

    pub fn set_enrichment(&self, tender: Tender) {
        self.enriched.lock().unwrap().push(tender);
    }
}

#[async_trait]
impl PortalApi for FakePortal {
    async fn search_rss(&self, _query: &RssQuery) -> Result<Vec<Tender>, PortalError> {
        *self.search_calls.lock().unwrap() += 1;
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(PortalError::Network(message));
        }
        Ok(self.tenders.lock().unwrap().clone())
    }

    async fn enrich_from_card(&self, tender: &Tender) -> Tender {
        self.enriched
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.number == tender.number)
            .cloned()
            .unwrap_or_else(|| tender.clone())
    }
}

/// Chat fake: records every message and pops scripted outcomes, falling
/// back to success.
pub struct FakeChat {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub outcomes: Mutex<VecDeque<SendOutcome>>,
    next_message_id: Mutex<i64>,
}

impl FakeChat {
    pub fn ok() -> Arc<FakeChat> {
        Arc::new(FakeChat {
            sent: Mutex::new(Vec::new()),
            outcomes: Mutex::new(VecDeque::new()),
            next_message_id: Mutex::new(1),
        })
    }

    pub fn script(&self, outcomes: Vec<SendOutcome>) {
        *self.outcomes.lock().unwrap() = outcomes.into();
    }

    pub fn messages(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn send_message(&self, chat_id: i64, html_text: &str) -> SendOutcome {
        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            if !outcome.is_ok() {
                return outcome;
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id, html_text.to_string()));
        let mut id = self.next_message_id.lock().unwrap();
        *id += 1;
        SendOutcome::Ok(Some(*id))
    }

    async fn send_document(&self, chat_id: i64, _bytes: Vec<u8>, filename: &str) -> SendOutcome {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id, format!("document:{}", filename)));
        SendOutcome::Ok(None)
    }
}

/// LLM fake replaying scripted replies; repeats the last reply when the
/// script runs dry.
pub struct FakeLlm {
    pub replies: Mutex<VecDeque<String>>,
    pub last: Mutex<String>,
    pub calls: Mutex<u32>,
}

impl FakeLlm {
    pub fn always(reply: &str) -> Arc<FakeLlm> {
        Arc::new(FakeLlm {
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(reply.to_string()),
            calls: Mutex::new(0),
        })
    }

    pub fn scripted(replies: Vec<&str>) -> Arc<FakeLlm> {
        Arc::new(FakeLlm {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(replies.last().map(|s| s.to_string()).unwrap_or_default()),
            calls: Mutex::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmApi for FakeLlm {
    async fn complete(&self, _request: LlmRequest) -> Result<String, SniperError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        Ok(self.last.lock().unwrap().clone())
    }
}

/// LLM fake that always fails with a network error.
pub struct FailingLlm;

#[async_trait]
impl LlmApi for FailingLlm {
    async fn complete(&self, _request: LlmRequest) -> Result<String, SniperError> {
        Err(SniperError::Network("llm unavailable".into()))
    }
}

pub fn matcher() -> Arc<SmartMatcher> {
    Arc::new(SmartMatcher::new(Arc::new(Dictionaries::embedded())))
}

/// Wire an `InstantSearch` over fakes.
pub fn search_over(portal: Arc<FakePortal>, llm: Option<Arc<dyn LlmApi>>) -> Arc<InstantSearch> {
    Arc::new(InstantSearch::new(
        portal,
        matcher(),
        Arc::new(RelevanceChecker::new(llm)),
        Arc::new(Dictionaries::embedded()),
    ))
}

pub async fn memory_db() -> Db {
    Db::connect("sqlite::memory:").await.expect("in-memory db")
}

/// Create a user and return its internal id.
pub async fn seed_user(db: &Db, external_id: i64, tier: Tier) -> i64 {
    db.upsert_user(external_id, Some("tester"), tier)
        .await
        .expect("user created")
}
