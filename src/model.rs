//! Core domain types: users, filters, tenders, notifications.
//!
//! Procurement stage, tender type, law type, subscription tier and
//! notification source are closed enumerations and are modelled as such;
//! the datastore serialises them as their wire strings.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription tier. Derived caps (filters, daily notifications, AI
/// checks) hang off the tier rather than being stored per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trial,
    Basic,
    Premium,
    Admin,
}

impl Tier {
    pub fn parse(s: &str) -> Tier {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Tier::Basic,
            "premium" => Tier::Premium,
            "admin" => Tier::Admin,
            _ => Tier::Trial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Trial => "trial",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Admin => "admin",
        }
    }

    /// Maximum number of filters a user may keep.
    pub fn filters_limit(&self) -> u32 {
        match self {
            Tier::Trial => 3,
            Tier::Basic => 10,
            Tier::Premium => 50,
            Tier::Admin => 100,
        }
    }

    /// Daily cap on outbound tender notifications.
    pub fn daily_notifications_limit(&self) -> u32 {
        match self {
            Tier::Trial => 10,
            Tier::Basic => 50,
            Tier::Premium => 500,
            Tier::Admin => 10_000,
        }
    }

    /// Daily cap on AI relevance checks.
    pub fn ai_daily_limit(&self) -> u32 {
        match self {
            Tier::Trial => 20,
            Tier::Basic => 100,
            Tier::Premium => 10_000,
            Tier::Admin => 100_000,
        }
    }

    pub fn is_premium(&self) -> bool {
        matches!(self, Tier::Premium | Tier::Admin)
    }
}

/// Procurement law the filter targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LawType {
    Fz44,
    Fz223,
    Both,
}

impl LawType {
    pub fn parse(s: &str) -> LawType {
        match s.trim().to_ascii_lowercase().as_str() {
            "44-fz" | "fz44" | "44" => LawType::Fz44,
            "223-fz" | "fz223" | "223" => LawType::Fz223,
            _ => LawType::Both,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LawType::Fz44 => "fz44",
            LawType::Fz223 => "fz223",
            LawType::Both => "both",
        }
    }
}

/// Purchase stage the filter targets. Defaults to `Submission` — tenders
/// currently accepting applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStage {
    Submission,
    Archive,
    Any,
}

impl PurchaseStage {
    pub fn parse(s: &str) -> PurchaseStage {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => PurchaseStage::Archive,
            "any" | "all" => PurchaseStage::Any,
            _ => PurchaseStage::Submission,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStage::Submission => "submission",
            PurchaseStage::Archive => "archive",
            PurchaseStage::Any => "any",
        }
    }
}

/// Kind of procurement object. The portal speaks Russian here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenderKind {
    Goods,
    Services,
    Works,
}

impl TenderKind {
    pub fn parse(s: &str) -> Option<TenderKind> {
        match s.trim().to_lowercase().as_str() {
            "товары" | "goods" => Some(TenderKind::Goods),
            "услуги" | "services" => Some(TenderKind::Services),
            "работы" | "works" => Some(TenderKind::Works),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TenderKind::Goods => "goods",
            TenderKind::Services => "services",
            TenderKind::Works => "works",
        }
    }

    /// Portal-facing label used in RSS queries.
    pub fn portal_label(&self) -> &'static str {
        match self {
            TenderKind::Goods => "товары",
            TenderKind::Services => "услуги",
            TenderKind::Works => "работы",
        }
    }
}

/// Where a notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
    Automonitoring,
    InstantSearch,
}

impl NotificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSource::Automonitoring => "automonitoring",
            NotificationSource::InstantSearch => "instant_search",
        }
    }

    pub fn parse(s: &str) -> NotificationSource {
        match s {
            "instant_search" => NotificationSource::InstantSearch,
            _ => NotificationSource::Automonitoring,
        }
    }
}

/// A registered user of the service, identified by their external chat id.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    /// Chat-side identity (Telegram id).
    pub external_id: i64,
    pub username: Option<String>,
    pub tier: Tier,
    pub monitoring_enabled: bool,
    pub notifications_sent_today: u32,
    pub last_notification_reset: Option<DateTime<Utc>>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A persistent user-defined search specification.
#[derive(Debug, Clone)]
pub struct TenderFilter {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    /// Positive keywords. Must be non-empty for an active filter.
    pub keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    /// Official region names, matched case-insensitively as substrings.
    pub regions: Vec<String>,
    pub tender_kinds: Vec<TenderKind>,
    pub law_type: LawType,
    pub purchase_stage: PurchaseStage,
    pub okpd2_codes: Vec<String>,
    pub min_deadline_days: Option<u32>,
    pub customer_keywords: Vec<String>,
    /// Maximum age in days of discovered tenders. None = portal default.
    pub publication_days: Option<u32>,
    pub is_active: bool,
    /// Cached natural-language intent used by the AI relevance gate.
    /// Regenerated whenever name/keywords/exclusions change.
    pub ai_intent: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TenderFilter {
    /// A copy with regions cleared, used for pre-scoring RSS-only data
    /// where the region is not yet known.
    pub fn without_regions(&self) -> TenderFilter {
        TenderFilter {
            regions: Vec::new(),
            ..self.clone()
        }
    }
}

/// An active filter joined with its owner, as the monitoring loop sees it.
#[derive(Debug, Clone)]
pub struct ActiveFilter {
    pub filter: TenderFilter,
    pub external_id: i64,
    pub tier: Tier,
    pub monitoring_enabled: bool,
}

/// A procurement notice. RSS supplies the stable fields; the rest comes
/// from the tender card and may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tender {
    /// Portal registration id, globally unique.
    pub number: String,
    pub name: String,
    pub url: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub price: Option<f64>,
    pub customer_name: Option<String>,
    pub customer_region: Option<String>,
    pub customer_city: Option<String>,
    pub customer_address: Option<String>,
    /// Application deadline in portal-local time.
    pub submission_deadline: Option<NaiveDateTime>,
}

impl Tender {
    /// Lowercased concatenation of the fields used for keyword matching.
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(
            self.name.len() + self.description.len() + 32,
        );
        text.push_str(&self.name);
        text.push(' ');
        text.push_str(&self.description);
        if let Some(customer) = &self.customer_name {
            text.push(' ');
            text.push_str(customer);
        }
        text.to_lowercase()
    }

    /// Days left until the submission deadline, negative when overdue.
    pub fn days_to_deadline(&self, now: NaiveDateTime) -> Option<i64> {
        self.submission_deadline
            .map(|d| (d - now).num_days())
    }

    /// Content hash over the fields used in scoring; a tender cache hit
    /// implies these are byte-equal.
    pub fn content_hash(&self) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = ahash::AHasher::default();
        self.name.hash(&mut hasher);
        self.description.hash(&mut hasher);
        self.price.map(|p| p.to_bits()).hash(&mut hasher);
        self.customer_name.hash(&mut hasher);
        self.customer_region.hash(&mut hasher);
        self.submission_deadline
            .map(|d| d.and_utc().timestamp())
            .hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Result of scoring one tender against one filter. `None` from the
/// matcher means a hard reject; this struct only exists for matches.
#[derive(Debug, Clone, Serialize)]
pub struct TenderMatch {
    pub score: u32,
    pub matched_keywords: Vec<String>,
    pub reasons: Vec<String>,
    pub red_flags: Vec<String>,
    /// True when the AI gate confirmed the match.
    #[serde(default)]
    pub ai_verified: bool,
    /// True when the AI gate was bypassed (score >= 85 or AI disabled).
    #[serde(default)]
    pub ai_skipped: bool,
    pub ai_confidence: Option<u32>,
    pub ai_reason: Option<String>,
}

/// A scored tender as it travels through the pipeline.
#[derive(Debug, Clone)]
pub struct ScoredTender {
    pub tender: Tender,
    pub match_info: TenderMatch,
}

/// Immutable notification row, keyed by `(user_id, tender_number)`.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub filter_id: i64,
    pub filter_name: String,
    pub tender_number: String,
    pub tender_name: String,
    pub tender_price: Option<f64>,
    pub tender_url: String,
    pub tender_region: Option<String>,
    pub tender_customer: Option<String>,
    pub score: u32,
    pub matched_keywords: Vec<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub submission_deadline: Option<NaiveDateTime>,
    pub source: NotificationSource,
    pub sent_at: Option<DateTime<Utc>>,
    pub external_message_id: Option<i64>,
}
