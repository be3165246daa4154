//! Tender-card enrichment: price, submission deadline, customer and its
//! location, scraped from the notice's common-info page.
//!
//! The card markup names its fields, so extraction walks title/value
//! pairs instead of relying on positional selectors. Selectors here are
//! the ones the portal has served for years but are still best-effort:
//! a missing field leaves the RSS value in place.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::model::Tender;
use crate::util::{parse_deadline, parse_price};

/// Card URL for a tender. The RSS link already points at the card; a
/// bare registration number falls back to the 44-FZ notice template.
pub fn card_url(base_url: &str, tender: &Tender) -> String {
    if tender.url.contains("common-info") {
        return tender.url.clone();
    }
    format!(
        "{}/epz/order/notice/ea44/view/common-info.html?regNumber={}",
        base_url, tender.number
    )
}

static CITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:г|город)\.?\s+([А-ЯЁа-яё-]+)").unwrap());

struct CardFields {
    price: Option<f64>,
    deadline: Option<String>,
    customer: Option<String>,
    address: Option<String>,
}

/// Merge card fields into the tender. Pure function over the fetched
/// HTML so it can be tested without a network.
pub fn apply_card(tender: &Tender, html: &str) -> Tender {
    let fields = extract_fields(html);
    let mut enriched = tender.clone();

    if let Some(price) = fields.price {
        enriched.price = Some(price);
    }
    if let Some(deadline) = fields.deadline.as_deref().and_then(parse_deadline) {
        enriched.submission_deadline = Some(deadline);
    }
    if fields.customer.is_some() {
        enriched.customer_name = fields.customer;
    }
    if let Some(address) = fields.address {
        let (region, city) = split_address(&address);
        if region.is_some() {
            enriched.customer_region = region;
        }
        if city.is_some() {
            enriched.customer_city = city;
        }
        enriched.customer_address = Some(address);
    }
    enriched
}

fn extract_fields(html: &str) -> CardFields {
    let doc = Html::parse_document(html);

    let price_sel = Selector::parse(".price-block__value").unwrap();
    let price = doc
        .select(&price_sel)
        .next()
        .map(element_text)
        .and_then(|t| parse_price(&t));

    // The card lays fields out as title/value span pairs in two different
    // skins; collect both into one map.
    let mut labelled: Vec<(String, String)> = Vec::new();
    for (title_sel, value_sel) in [
        ("span.cardMainInfo__title", "span.cardMainInfo__content"),
        ("span.section__title", "span.section__info"),
    ] {
        let titles = Selector::parse(title_sel).unwrap();
        let values = Selector::parse(value_sel).unwrap();
        let title_texts: Vec<String> = doc.select(&titles).map(element_text).collect();
        let value_texts: Vec<String> = doc.select(&values).map(element_text).collect();
        for (title, value) in title_texts.into_iter().zip(value_texts) {
            labelled.push((title.to_lowercase(), value));
        }
    }

    let find = |needle: &str| -> Option<String> {
        labelled
            .iter()
            .find(|(title, _)| title.contains(needle))
            .map(|(_, value)| value.clone())
            .filter(|v| !v.is_empty())
    };

    CardFields {
        price,
        deadline: find("окончания срока подачи").or_else(|| find("окончание подачи")),
        customer: find("осуществляющая закупку")
            .or_else(|| find("заказчик"))
            .or_else(|| find("организация")),
        address: find("место нахождения").or_else(|| find("почтовый адрес")),
    }
}

fn element_text(el: scraper::ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull the federal subject and city out of a postal address line.
fn split_address(address: &str) -> (Option<String>, Option<String>) {
    let region = address
        .split(',')
        .map(str::trim)
        .find(|part| {
            let lower = part.to_lowercase();
            lower.contains("область")
                || lower.contains("край")
                || lower.contains("республика")
                || lower.contains("округ")
                || lower.contains("москва")
                || lower.contains("санкт-петербург")
                || lower.contains("севастополь")
        })
        .map(|s| s.to_string());

    let city = CITY_RE
        .captures(address)
        .map(|c| format!("г. {}", &c[1]));

    (region, city)
}
