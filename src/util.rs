//! Utility helpers shared across the service: word-boundary keyword
//! matching with a memoised regex cache, portal date parsing and stable
//! text hashing for the in-process caches.

use ahash::AHasher;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A memoising cache around compiled keyword regexes. Every keyword in
/// every active filter is matched against every discovered tender, so
/// recompilation on the hot path would dominate the matcher budget.
static RE_CACHE: Lazy<DashMap<u64, Arc<Regex>>> = Lazy::new(DashMap::new);

fn cached_regex(pattern: &str) -> Option<Arc<Regex>> {
    let mut hasher = AHasher::default();
    pattern.hash(&mut hasher);
    let key = hasher.finish();
    if let Some(existing) = RE_CACHE.get(&key) {
        return Some(existing.clone());
    }
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .ok()?;
    let arc = Arc::new(re);
    RE_CACHE.insert(key, arc.clone());
    Some(arc)
}

/// Word-boundary keyword check against lowercased text.
///
/// Short keywords (< 4 chars) are anchored on both sides to avoid false
/// positives inside inflected morphology ("пк" must not match inside
/// "операционный"). Longer keywords are anchored only on the left,
/// permitting Russian morphological suffixes ("linux" matches
/// "linux-система").
pub fn word_boundary_match(keyword: &str, text: &str) -> bool {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    let pattern = if keyword.chars().count() < 4 {
        format!(r"\b{}\b", regex::escape(&keyword))
    } else {
        format!(r"\b{}", regex::escape(&keyword))
    };
    match cached_regex(&pattern) {
        Some(re) => re.is_match(text),
        None => false,
    }
}

/// The root prefix used for fuzzy morphological matching: the first
/// `max(5, len - 2)` characters of the keyword.
pub fn root_prefix(keyword: &str) -> String {
    let chars: Vec<char> = keyword.chars().collect();
    let take = chars.len().saturating_sub(2).max(5).min(chars.len());
    chars[..take].iter().collect()
}

/// Stable in-process hash of a string, hex-encoded. Used as the key for
/// the AI relevance and summary caches.
pub fn text_hash(text: &str) -> String {
    let mut hasher = AHasher::default();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Parse an RSS `pubDate` (RFC 2822) or an ISO timestamp.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date_part: String = raw.chars().take(10).collect();
    if let Ok(date) = NaiveDate::parse_from_str(&date_part, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }
    None
}

/// Parse a portal deadline. The card shows "DD.MM.YYYY HH:MM" or a bare
/// date; RSS descriptions occasionally carry ISO dates.
pub fn parse_deadline(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let head: String = raw.chars().take(16).collect();
    for fmt in ["%d.%m.%Y %H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&head, fmt) {
            return Some(dt);
        }
    }
    let date_part: String = raw.chars().take(10).collect();
    for fmt in ["%d.%m.%Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(&date_part, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Extract a price from portal text like "1 500 000,00 ₽".
pub fn parse_price(raw: &str) -> Option<f64> {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '0'..='9' | '.' => cleaned.push(c),
            ',' => cleaned.push('.'),
            _ => {}
        }
    }
    // Thousand separators leave more than one dot; keep only the last.
    if cleaned.matches('.').count() > 1 {
        let last = cleaned.rfind('.').unwrap();
        let (head, tail) = cleaned.split_at(last);
        cleaned = format!("{}{}", head.replace('.', ""), tail);
    }
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keyword_requires_both_boundaries() {
        assert!(word_boundary_match("пк", "поставка пк для офиса"));
        assert!(word_boundary_match("пк", "пк"));
        assert!(!word_boundary_match("пк", "операционный"));
        assert!(!word_boundary_match("пк", "выпкат"));
    }

    #[test]
    fn long_keyword_allows_suffixes() {
        assert!(word_boundary_match("linux", "установка linux-систем"));
        assert!(word_boundary_match("компьютер", "поставка компьютеров"));
        assert!(!word_boundary_match("компьютер", "поставка телекомпьютеров"));
    }

    #[test]
    fn root_prefix_keeps_at_least_five_chars() {
        assert_eq!(root_prefix("компьютер"), "компьют");
        assert_eq!(root_prefix("сервер"), "серве");
        assert_eq!(root_prefix("принтеры"), "принте");
    }

    #[test]
    fn parses_rfc2822_published_date() {
        let dt = parse_published("Tue, 05 Mar 2024 10:30:00 GMT");
        assert!(dt.is_some());
    }

    #[test]
    fn parses_portal_deadline_formats() {
        assert!(parse_deadline("20.11.2024 10:00").is_some());
        assert!(parse_deadline("20.11.2024").is_some());
        assert!(parse_deadline("2024-11-20").is_some());
        assert!(parse_deadline("").is_none());
        assert!(parse_deadline("не указан").is_none());
    }

    #[test]
    fn parses_portal_price_text() {
        assert_eq!(parse_price("1 500 000,00 ₽"), Some(1_500_000.0));
        assert_eq!(parse_price("850 000,00"), Some(850_000.0));
        assert_eq!(parse_price("нет данных"), None);
    }
}
