//! Portal client for zakupki.gov.ru: parameterised RSS queries plus
//! tender-card enrichment.
//!
//! The portal's RSS result set is treated as non-exhaustive and noisy —
//! the feed can return items that do not contain the search keyword at
//! all. Every downstream stage re-verifies keyword presence; this module
//! only does I/O and parsing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::model::{LawType, PurchaseStage, Tender, TenderKind};

pub mod card;
pub mod rss;

/// Outbound concurrency cap towards the portal. The portal throttles
/// aggressive clients with connection resets, so the cap is deliberately
/// conservative.
const MAX_CONCURRENT_REQUESTS: usize = 8;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("portal network error: {0}")]
    Network(String),

    #[error("portal feed parse error: {0}")]
    Parse(String),

    /// HTTP 429 or a connection-reset storm: the portal is rate
    /// limiting us.
    #[error("portal rate limit: {0}")]
    Quota(String),
}

impl PortalError {
    fn retryable(&self) -> bool {
        matches!(self, PortalError::Network(_) | PortalError::Quota(_))
    }
}

/// One parameterised RSS search: a single keyword variant with the
/// filter's non-keyword constraints. At most one tender kind per call —
/// mixed-kind filters are issued as multiple calls or filtered
/// client-side.
#[derive(Debug, Clone)]
pub struct RssQuery {
    pub keyword: String,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub regions: Vec<String>,
    pub max_results: u32,
    pub tender_kind: Option<TenderKind>,
    pub law_type: LawType,
    pub purchase_stage: PurchaseStage,
    pub okpd2_codes: Vec<String>,
}

impl RssQuery {
    pub fn for_keyword(keyword: &str) -> RssQuery {
        RssQuery {
            keyword: keyword.to_string(),
            price_min: None,
            price_max: None,
            regions: Vec::new(),
            max_results: 20,
            tender_kind: None,
            law_type: LawType::Both,
            purchase_stage: PurchaseStage::Submission,
            okpd2_codes: Vec::new(),
        }
    }
}

/// Narrow interface the pipeline consumes. The production implementation
/// talks HTTP; tests substitute canned feeds.
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn search_rss(&self, query: &RssQuery) -> Result<Vec<Tender>, PortalError>;

    /// Enrich a tender from its HTML card. On failure the input is
    /// returned unmodified and a warning is recorded.
    async fn enrich_from_card(&self, tender: &Tender) -> Tender;
}

/// HTTP client for the production portal.
pub struct ZakupkiClient {
    client: reqwest::Client,
    base_url: String,
    permits: Arc<Semaphore>,
}

impl ZakupkiClient {
    pub fn new(proxy_url: Option<&str>) -> anyhow::Result<ZakupkiClient> {
        Self::with_base_url("https://zakupki.gov.ru", proxy_url)
    }

    pub fn with_base_url(base_url: &str, proxy_url: Option<&str>) -> anyhow::Result<ZakupkiClient> {
        let mut builder = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            );
        if let Some(proxy) = proxy_url.filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
            tracing::info!("portal client using outbound proxy");
        }
        Ok(ZakupkiClient {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    /// GET with the concurrency cap and retry policy applied. Transient
    /// failures and portal throttling retry up to three times with
    /// exponential backoff before surfacing.
    async fn get_with_retries(&self, url: &str) -> Result<String, PortalError> {
        let mut last_err = PortalError::Network("no attempts made".into());
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::debug!(url, attempt, delay_ms = delay.as_millis() as u64, "portal retry");
                tokio::time::sleep(delay).await;
            }
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(err) if err.retryable() => {
                    tracing::warn!(url, attempt, error = %err, "portal request failed");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    async fn get_once(&self, url: &str) -> Result<String, PortalError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PortalError::Network(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PortalError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PortalError::Quota("HTTP 429".into()));
        }
        if !response.status().is_success() {
            return Err(PortalError::Network(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        response
            .text()
            .await
            .map_err(|e| PortalError::Network(e.to_string()))
    }
}

#[async_trait]
impl PortalApi for ZakupkiClient {
    async fn search_rss(&self, query: &RssQuery) -> Result<Vec<Tender>, PortalError> {
        let url = rss::build_search_url(&self.base_url, query);
        tracing::debug!(keyword = %query.keyword, "portal RSS search");
        let body = self.get_with_retries(&url).await?;
        rss::parse_feed(&body)
    }

    async fn enrich_from_card(&self, tender: &Tender) -> Tender {
        let url = card::card_url(&self.base_url, tender);
        match self.get_with_retries(&url).await {
            Ok(body) => card::apply_card(tender, &body),
            Err(err) => {
                tracing::warn!(tender = %tender.number, error = %err, "card enrichment failed; keeping RSS fields");
                tender.clone()
            }
        }
    }
}
