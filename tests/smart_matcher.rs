//! Scoring-engine behaviour: hard rejects, bonuses, boundary rules.

mod common;

use chrono::{Duration, Utc};
use common::{filter, matcher, tender};
use tender_sniper::model::{PurchaseStage, TenderKind};

#[test]
fn simple_match_scores_above_delivery_threshold() {
    let m = matcher();
    let mut f = filter(&["компьютер"]);
    f.regions = vec!["Москва".into()];
    f.price_min = Some(100_000.0);
    f.price_max = Some(5_000_000.0);

    let mut t = tender("1", "Поставка компьютеров");
    t.price = Some(2_500_000.0);
    t.customer_region = Some("Москва".into());

    let result = m.match_tender(&t, &f, Utc::now()).expect("match");
    assert!(result.score >= 60, "score was {}", result.score);
    assert!(result.matched_keywords.contains(&"компьютер".to_string()));
}

#[test]
fn exclude_keyword_hard_rejects_regardless_of_score() {
    let m = matcher();
    let mut f = filter(&["компьютер"]);
    f.exclude_keywords = vec!["Dell".into()];

    let t = tender("2", "Поставка компьютеров Dell");
    assert!(m.match_tender(&t, &f, Utc::now()).is_none());

    // Same tender without the brand passes.
    let t = tender("3", "Поставка компьютеров");
    assert!(m.match_tender(&t, &f, Utc::now()).is_some());
}

#[test]
fn compound_phrase_synonym_scores_high() {
    let m = matcher();
    let f = filter(&["служба каталогов"]);
    let t = tender("4", "Закупка Active Directory");

    let result = m.match_tender(&t, &f, Utc::now()).expect("compound match");
    assert!(result.score >= 35, "score was {}", result.score);
    assert!(result
        .matched_keywords
        .iter()
        .any(|k| k.contains("служба каталогов")));
}

#[test]
fn negative_pattern_overrides_keyword_hit() {
    let m = matcher();
    let f = filter(&["служба"]);
    let t = tender("5", "Военная служба по контракту");
    assert!(m.match_tender(&t, &f, Utc::now()).is_none());
}

#[test]
fn price_bounds_are_inclusive() {
    let m = matcher();
    let mut f = filter(&["компьютер"]);
    f.price_min = Some(100_000.0);
    f.price_max = Some(5_000_000.0);

    let mut on_min = tender("6", "Поставка компьютеров");
    on_min.price = Some(100_000.0);
    assert!(m.match_tender(&on_min, &f, Utc::now()).is_some());

    let mut on_max = tender("7", "Поставка компьютеров");
    on_max.price = Some(5_000_000.0);
    assert!(m.match_tender(&on_max, &f, Utc::now()).is_some());

    let mut below = tender("8", "Поставка компьютеров");
    below.price = Some(99_999.0);
    assert!(m.match_tender(&below, &f, Utc::now()).is_none());

    let mut above = tender("9", "Поставка компьютеров");
    above.price = Some(5_000_001.0);
    assert!(m.match_tender(&above, &f, Utc::now()).is_none());
}

#[test]
fn score_is_always_within_bounds() {
    let m = matcher();
    let mut f = filter(&["компьютер", "ноутбук", "сервер", "принтер"]);
    f.price_min = Some(1_000.0);
    f.price_max = Some(10_000_000.0);

    let mut t = tender("10", "Поставка компьютеров, ноутбуков, серверов и принтеров");
    t.price = Some(5_000_000.0);

    let result = m.match_tender(&t, &f, Utc::now()).expect("match");
    assert!(result.score <= 100);

    // A marginal match stays non-negative even with penalties applied.
    let mut weak = filter(&["компьютер", "ноутбук", "сервер", "принтер", "сканер"]);
    weak.price_min = None;
    weak.price_max = None;
    let barely = tender("11", "Поставка сканеров");
    if let Some(result) = m.match_tender(&barely, &weak, Utc::now()) {
        assert!(result.score <= 100);
    }
}

#[test]
fn short_keyword_matches_only_on_word_boundaries() {
    let m = matcher();
    let f = filter(&["пк"]);

    let hit = tender("12", "Поставка ПК");
    assert!(m.match_tender(&hit, &f, Utc::now()).is_some());

    let miss = tender("13", "Операционный контроль");
    assert!(m.match_tender(&miss, &f, Utc::now()).is_none());
}

#[test]
fn recency_bonus_applies_today_and_fades() {
    let m = matcher();
    let f = filter(&["компьютер"]);
    let now = Utc::now();

    let mut today = tender("14", "Поставка компьютеров");
    today.published_at = Some(now);
    let mut recent = today.clone();
    recent.number = "15".into();
    recent.published_at = Some(now - Duration::days(2));
    let mut old = today.clone();
    old.number = "16".into();
    old.published_at = Some(now - Duration::days(4));

    let score_today = m.match_tender(&today, &f, now).unwrap().score;
    let score_recent = m.match_tender(&recent, &f, now).unwrap().score;
    let score_old = m.match_tender(&old, &f, now).unwrap().score;

    assert_eq!(score_today - score_old, 10);
    assert_eq!(score_recent - score_old, 5);
}

#[test]
fn submission_stage_rejects_expired_archive_accepts_them() {
    let m = matcher();
    let now = Utc::now();

    let mut expired = tender("17", "Поставка компьютеров");
    expired.submission_deadline = Some((now - Duration::days(3)).naive_utc());

    let f = filter(&["компьютер"]);
    assert!(m.match_tender(&expired, &f, now).is_none());

    let mut archive = filter(&["компьютер"]);
    archive.purchase_stage = PurchaseStage::Archive;
    assert!(m.match_tender(&expired, &archive, now).is_some());

    // And the partition holds the other way: live tenders are not
    // "archive" material.
    let live = tender("18", "Поставка компьютеров");
    assert!(m.match_tender(&live, &archive, now).is_none());
    assert!(m.match_tender(&live, &f, now).is_some());
}

#[test]
fn unknown_region_is_not_rejected() {
    let m = matcher();
    let mut f = filter(&["компьютер"]);
    f.regions = vec!["Москва".into()];

    // Region unknown until enrichment: decision deferred.
    let unknown = tender("19", "Поставка компьютеров");
    assert!(m.match_tender(&unknown, &f, Utc::now()).is_some());

    let mut wrong = tender("20", "Поставка компьютеров");
    wrong.customer_region = Some("Санкт-Петербург".into());
    assert!(m.match_tender(&wrong, &f, Utc::now()).is_none());

    let mut right = tender("21", "Поставка компьютеров");
    right.customer_region = Some("г. Москва и область".into());
    assert!(m.match_tender(&right, &f, Utc::now()).is_some());
}

#[test]
fn goods_only_filter_rejects_service_tenders() {
    let m = matcher();
    let mut f = filter(&["картридж"]);
    f.tender_kinds = vec![TenderKind::Goods];

    let service = tender("22", "Заправка картриджей для принтеров");
    assert!(m.match_tender(&service, &f, Utc::now()).is_none());

    let goods = tender("23", "Поставка картриджей");
    assert!(m.match_tender(&goods, &f, Utc::now()).is_some());

    // With services allowed the same tender is fine.
    let mut both = filter(&["картридж"]);
    both.tender_kinds = vec![TenderKind::Goods, TenderKind::Services];
    let service = tender("24", "Заправка картриджей для принтеров");
    assert!(m.match_tender(&service, &both, Utc::now()).is_some());
}

#[test]
fn publication_age_limit_rejects_stale_tenders() {
    let m = matcher();
    let mut f = filter(&["компьютер"]);
    f.publication_days = Some(7);
    let now = Utc::now();

    let mut fresh = tender("25", "Поставка компьютеров");
    fresh.published_at = Some(now - Duration::days(5));
    assert!(m.match_tender(&fresh, &f, now).is_some());

    let mut stale = tender("26", "Поставка компьютеров");
    stale.published_at = Some(now - Duration::days(10));
    assert!(m.match_tender(&stale, &f, now).is_none());
}

#[test]
fn brand_transliteration_matches_both_directions() {
    let m = matcher();

    let latin_filter = filter(&["cisco"]);
    let cyrillic_text = tender("27", "Поставка коммутаторов Циско");
    assert!(m.match_tender(&cyrillic_text, &latin_filter, Utc::now()).is_some());

    let cyrillic_filter = filter(&["циско"]);
    let latin_text = tender("28", "Поставка коммутаторов Cisco");
    assert!(m.match_tender(&latin_text, &cyrillic_filter, Utc::now()).is_some());
}

#[test]
fn coverage_ratio_amplifies_dense_matches() {
    let m = matcher();

    // One of four keywords matched, total >= 3: penalised.
    let sparse = filter(&["компьютер", "xeon", "радиостанция", "экскаватор"]);
    let t = tender("29", "Поставка компьютеров");
    let sparse_score = m.match_tender(&t, &sparse, Utc::now()).unwrap().score;

    // The same hit as the only keyword: amplified.
    let dense = filter(&["компьютер"]);
    let dense_score = m.match_tender(&t, &dense, Utc::now()).unwrap().score;

    assert!(dense_score > sparse_score);
}

#[test]
fn red_flags_mark_tight_deadlines() {
    let m = matcher();
    let f = filter(&["компьютер"]);
    let now = Utc::now();

    let mut urgent = tender("30", "Поставка компьютеров");
    urgent.submission_deadline = Some((now + Duration::days(1)).naive_utc());
    urgent.price = Some(500_000.0);

    let result = m.match_tender(&urgent, &f, now).unwrap();
    assert!(result
        .red_flags
        .iter()
        .any(|flag| flag.contains("менее 3 дней")));
}
