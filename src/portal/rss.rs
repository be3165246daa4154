//! Extended-search RSS: URL construction and feed parsing.
//!
//! The portal serves RSS 2.0 from
//! `/epz/order/extendedsearch/results/rss`. Each `<item>` carries the
//! tender title, a link into the notice card, an RFC 2822 `pubDate` and
//! an HTML description with the registration number and starting price.
//! The exact set of region codes is not documented; the table below
//! covers the federal subjects users actually filter on, everything else
//! is enforced client-side after enrichment.

use once_cell::sync::Lazy;
use regex::Regex;
use rss::Channel;
use url::Url;

use super::{PortalError, RssQuery};
use crate::model::{LawType, PurchaseStage, Tender, TenderKind};
use crate::util::{parse_price, parse_published};

/// Region name -> portal region code, for the query string. Matching is
/// case-insensitive on the lowercased official name.
static REGION_CODES: &[(&str, &str)] = &[
    ("москва", "77"),
    ("санкт-петербург", "78"),
    ("московская область", "50"),
    ("ленинградская область", "47"),
    ("новосибирская область", "54"),
    ("свердловская область", "66"),
    ("краснодарский край", "23"),
    ("красноярский край", "24"),
    ("татарстан", "16"),
    ("нижегородская область", "52"),
    ("ростовская область", "61"),
    ("челябинская область", "74"),
    ("самарская область", "63"),
    ("башкортостан", "02"),
    ("пермский край", "59"),
];

pub fn build_search_url(base_url: &str, query: &RssQuery) -> String {
    let mut url = Url::parse(&format!(
        "{}/epz/order/extendedsearch/results/rss",
        base_url
    ))
    .expect("base url is valid");

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("searchString", &query.keyword);
        params.append_pair("morphology", "on");
        params.append_pair("sortBy", "UPDATE_DATE");
        params.append_pair("sortDirection", "false");
        params.append_pair("pageNumber", "1");
        params.append_pair("recordsPerPage", records_per_page(query.max_results));
        params.append_pair("currencyIdGeneral", "-1");

        if let Some(min) = query.price_min {
            params.append_pair("priceFromGeneral", &format!("{}", min as i64));
        }
        if let Some(max) = query.price_max {
            params.append_pair("priceToGeneral", &format!("{}", max as i64));
        }

        match query.law_type {
            LawType::Fz44 => {
                params.append_pair("fz44", "on");
            }
            LawType::Fz223 => {
                params.append_pair("fz223", "on");
            }
            LawType::Both => {
                params.append_pair("fz44", "on");
                params.append_pair("fz223", "on");
            }
        }

        // Portal stage flags: af = accepting applications, ca = commission
        // at work, pc = completed.
        match query.purchase_stage {
            PurchaseStage::Submission => {
                params.append_pair("af", "on");
            }
            PurchaseStage::Archive => {
                params.append_pair("pc", "on");
            }
            PurchaseStage::Any => {
                params.append_pair("af", "on");
                params.append_pair("ca", "on");
                params.append_pair("pc", "on");
            }
        }

        if let Some(kind) = query.tender_kind {
            params.append_pair("tenderType", kind.portal_label());
        }

        if !query.okpd2_codes.is_empty() {
            params.append_pair("okpd2IdsCodes", &query.okpd2_codes.join(","));
        }

        let codes: Vec<&str> = query
            .regions
            .iter()
            .filter_map(|region| region_code(region))
            .collect();
        if !codes.is_empty() {
            params.append_pair("customerPlaceCodes", &codes.join(","));
        }
    }

    url.to_string()
}

fn records_per_page(max_results: u32) -> &'static str {
    match max_results {
        0..=10 => "_10",
        11..=20 => "_20",
        _ => "_50",
    }
}

fn region_code(region: &str) -> Option<&'static str> {
    let lower = region.trim().to_lowercase();
    REGION_CODES
        .iter()
        .find(|(name, _)| lower.contains(name))
        .map(|(_, code)| *code)
}

static REG_NUMBER_IN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"regNumber=(\d+)").unwrap());
static REG_NUMBER_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"№\s*(\d{11,19})").unwrap());
static PRICE_IN_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:Начальная[^:<]*цена[^:<]*|НМЦК)[:\s]*([\d\s\u{00a0}]+(?:[.,]\d+)?)").unwrap()
});
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

pub fn parse_feed(body: &str) -> Result<Vec<Tender>, PortalError> {
    let channel = Channel::read_from(body.as_bytes())
        .map_err(|e| PortalError::Parse(format!("malformed RSS: {}", e)))?;

    let mut tenders = Vec::with_capacity(channel.items().len());
    for item in channel.items() {
        match parse_item(item) {
            Some(tender) => tenders.push(tender),
            // Individual malformed items are skipped; the rest of the
            // feed continues.
            None => tracing::debug!(
                title = item.title().unwrap_or(""),
                "skipping RSS item without registration number"
            ),
        }
    }
    Ok(tenders)
}

fn parse_item(item: &rss::Item) -> Option<Tender> {
    let link = item.link().unwrap_or("").to_string();
    let raw_description = item.description().unwrap_or("");

    let number = REG_NUMBER_IN_LINK
        .captures(&link)
        .or_else(|| REG_NUMBER_IN_TEXT.captures(raw_description))
        .map(|c| c[1].to_string())?;

    let price = PRICE_IN_DESCRIPTION
        .captures(raw_description)
        .and_then(|c| parse_price(&c[1]));

    let description = HTML_TAG.replace_all(raw_description, " ");
    let description = description.split_whitespace().collect::<Vec<_>>().join(" ");

    Some(Tender {
        number,
        name: item.title().unwrap_or("").trim().to_string(),
        url: link,
        description,
        published_at: item.pub_date().and_then(parse_published),
        ..Tender::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0"><channel>
<title>Результаты поиска</title>
<link>https://zakupki.gov.ru</link>
<description>extendedsearch</description>
<item>
  <title>Поставка компьютеров для нужд учреждения</title>
  <link>https://zakupki.gov.ru/epz/order/notice/ea44/view/common-info.html?regNumber=0372300075624000001</link>
  <pubDate>Tue, 05 Mar 2024 10:30:00 GMT</pubDate>
  <description>&lt;b&gt;№ 0372300075624000001&lt;/b&gt;&lt;br&gt;Начальная цена: 1 500 000,00&lt;br&gt;Заказчик: ГБУ Центр</description>
</item>
<item>
  <title>Сломанный элемент без номера</title>
  <link>https://zakupki.gov.ru/somewhere</link>
  <description>нет данных</description>
</item>
</channel></rss>"#;

    #[test]
    fn parses_items_and_skips_broken_ones() {
        let tenders = parse_feed(FEED).unwrap();
        assert_eq!(tenders.len(), 1);
        let t = &tenders[0];
        assert_eq!(t.number, "0372300075624000001");
        assert_eq!(t.name, "Поставка компьютеров для нужд учреждения");
        assert_eq!(t.price, Some(1_500_000.0));
        assert!(t.published_at.is_some());
        assert!(t.description.contains("Заказчик"));
    }

    #[test]
    fn malformed_feed_is_a_parse_error() {
        assert!(matches!(
            parse_feed("это не xml"),
            Err(PortalError::Parse(_))
        ));
    }

    #[test]
    fn search_url_carries_filter_parameters() {
        let mut query = RssQuery::for_keyword("компьютер");
        query.price_min = Some(100_000.0);
        query.price_max = Some(5_000_000.0);
        query.regions = vec!["Москва".into()];
        query.law_type = LawType::Fz44;
        query.tender_kind = Some(TenderKind::Goods);

        let url = build_search_url("https://zakupki.gov.ru", &query);
        assert!(url.contains("searchString="));
        assert!(url.contains("priceFromGeneral=100000"));
        assert!(url.contains("priceToGeneral=5000000"));
        assert!(url.contains("fz44=on"));
        assert!(!url.contains("fz223=on"));
        assert!(url.contains("af=on"));
        assert!(url.contains("customerPlaceCodes=77"));
        assert!(url.contains("morphology=on"));
    }

    #[test]
    fn archive_stage_flips_stage_flags() {
        let mut query = RssQuery::for_keyword("сервер");
        query.purchase_stage = PurchaseStage::Archive;
        let url = build_search_url("https://zakupki.gov.ru", &query);
        assert!(url.contains("pc=on"));
        assert!(!url.contains("af=on"));
    }
}
