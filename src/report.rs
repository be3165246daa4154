//! Standalone HTML report for search results: inline CSS, inline JS,
//! no external fetches at view time. Cards carry `data-` attributes the
//! embedded script uses for client-side search, region/source filtering
//! and sorting.

use chrono::{DateTime, Utc};

use crate::model::{ScoredTender, TenderFilter};
use crate::notify::format_price;

/// Minimal HTML escaping for text interpolated into the document.
fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn score_class(score: u32) -> &'static str {
    match score {
        70.. => "score-high",
        40..=69 => "score-medium",
        _ => "score-low",
    }
}

fn score_emoji(score: u32) -> &'static str {
    match score {
        80.. => "🔥",
        70..=79 => "✨",
        50..=69 => "📌",
        _ => "ℹ️",
    }
}

/// Render the full report document.
pub fn generate_report(
    matches: &[ScoredTender],
    filter: &TenderFilter,
    generated_at: DateTime<Utc>,
) -> String {
    let high = matches.iter().filter(|m| m.match_info.score >= 70).count();
    let medium = matches
        .iter()
        .filter(|m| (40..70).contains(&m.match_info.score))
        .count();

    let mut cards = String::new();
    for (i, scored) in matches.iter().enumerate() {
        cards.push_str(&render_card(i + 1, scored, &filter.name));
    }
    if cards.is_empty() {
        cards = "<p class=\"hint\">Тендеров с достаточным уровнем совпадения не найдено. \
                 Попробуйте изменить критерии поиска.</p>"
            .to_string();
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="ru">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Результаты поиска: {filter_name}</title>
<style>
* {{ margin: 0; padding: 0; box-sizing: border-box; }}
body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
       line-height: 1.6; color: #333; background: #f5f7fa; padding: 20px; }}
.container {{ max-width: 1200px; margin: 0 auto; background: white; padding: 40px;
             border-radius: 12px; box-shadow: 0 2px 20px rgba(0,0,0,0.1); }}
.header {{ border-bottom: 3px solid #4CAF50; padding-bottom: 20px; margin-bottom: 30px; }}
h1 {{ color: #2c3e50; font-size: 32px; margin-bottom: 10px; }}
.summary {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
           gap: 20px; margin: 30px 0; }}
.summary-card {{ background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white;
                padding: 20px; border-radius: 8px; text-align: center; }}
.summary-card h3 {{ font-size: 36px; margin-bottom: 5px; }}
.summary-card p {{ opacity: 0.9; font-size: 14px; }}
.controls {{ display: flex; flex-wrap: wrap; gap: 12px; margin: 20px 0; }}
.filter-select, .search-input {{ padding: 8px 12px; border: 1px solid #ced4da;
             border-radius: 6px; font-size: 14px; }}
.search-input {{ flex: 1; min-width: 200px; }}
.tender-card {{ background: white; border: 1px solid #e1e8ed; border-radius: 8px;
               padding: 25px; margin-bottom: 20px; }}
.tender-header {{ display: flex; justify-content: space-between; align-items: center;
                 margin-bottom: 15px; }}
.tender-number {{ font-size: 14px; color: #6c757d; font-family: 'Courier New', monospace; }}
.score-badge {{ padding: 6px 12px; border-radius: 20px; font-weight: bold; font-size: 14px; }}
.score-high {{ background: #d4edda; color: #155724; }}
.score-medium {{ background: #fff3cd; color: #856404; }}
.score-low {{ background: #f8d7da; color: #721c24; }}
.tender-title {{ color: #2c3e50; font-size: 20px; margin-bottom: 15px; line-height: 1.4; }}
.tender-details {{ color: #555; margin-bottom: 15px; display: grid;
                  grid-template-columns: repeat(auto-fit, minmax(250px, 1fr)); gap: 8px 20px; }}
.tender-details p {{ margin: 4px 0; font-size: 14px; }}
.match-reasons {{ background: #f8f9fa; padding: 15px; border-radius: 6px; margin: 15px 0;
                 font-size: 14px; }}
.red-flags {{ background: #fff5f5; border-left: 4px solid #dc3545; padding: 10px 15px;
             margin: 10px 0; font-size: 14px; color: #721c24; }}
.btn-primary {{ display: inline-block; background: #4CAF50; color: white; padding: 10px 20px;
               border-radius: 6px; text-decoration: none; font-weight: 500; }}
.hint {{ color: #6c757d; font-size: 14px; font-style: italic; }}
.footer {{ margin-top: 40px; padding-top: 20px; border-top: 1px solid #e1e8ed;
          text-align: center; color: #6c757d; font-size: 14px; }}
</style>
</head>
<body>
<div class="container">
  <div class="header">
    <h1>🎯 {filter_name}</h1>
    <p>Поисковый запрос: <strong>{query}</strong></p>
    <p>Сгенерировано: {generated}</p>
  </div>

  <div class="summary">
    <div class="summary-card"><h3>{total}</h3><p>Всего найдено</p></div>
    <div class="summary-card"><h3>{high}</h3><p>Отличные совпадения (&ge;70)</p></div>
    <div class="summary-card"><h3>{medium}</h3><p>Хорошие совпадения (40-69)</p></div>
  </div>

  <div class="controls">
    <input type="text" id="searchInput" class="search-input" placeholder="Поиск по названию...">
    <select id="regionFilter" class="filter-select"><option value="">Все регионы</option></select>
    <select id="sortBy" class="filter-select">
      <option value="score-desc">По релевантности</option>
      <option value="date-desc">Сначала новые</option>
      <option value="date-asc">Сначала старые</option>
      <option value="price-desc">По убыванию цены</option>
      <option value="price-asc">По возрастанию цены</option>
    </select>
  </div>

  <h2 style="margin: 30px 0 20px; color: #2c3e50;">📋 Найденные тендеры</h2>
  <div id="tenderList">
{cards}
  </div>

  <div class="footer">
    <p>Сгенерировано Tender Sniper</p>
    <p>Данные актуальны на момент генерации отчета</p>
  </div>
</div>
<script>
(function() {{
  const list = document.getElementById('tenderList');
  const cards = Array.from(list.querySelectorAll('.tender-card'));
  const searchInput = document.getElementById('searchInput');
  const regionFilter = document.getElementById('regionFilter');
  const sortBySelect = document.getElementById('sortBy');

  const regions = new Set();
  cards.forEach(card => {{
    const region = card.dataset.region;
    if (region) regions.add(region);
  }});
  Array.from(regions).sort().forEach(region => {{
    const option = document.createElement('option');
    option.value = region;
    option.textContent = region;
    regionFilter.appendChild(option);
  }});

  function apply() {{
    const term = searchInput.value.toLowerCase();
    const region = regionFilter.value;

    cards.forEach(card => {{
      const matchesTerm = !term || card.dataset.name.includes(term);
      const matchesRegion = !region || card.dataset.region === region;
      card.style.display = matchesTerm && matchesRegion ? '' : 'none';
    }});

    const [key, dir] = sortBySelect.value.split('-');
    const sorted = cards.slice().sort((a, b) => {{
      let va, vb;
      if (key === 'price') {{ va = parseFloat(a.dataset.price) || 0; vb = parseFloat(b.dataset.price) || 0; }}
      else if (key === 'date') {{ va = a.dataset.date; vb = b.dataset.date; }}
      else {{ va = parseInt(a.dataset.score); vb = parseInt(b.dataset.score); }}
      if (va < vb) return dir === 'asc' ? -1 : 1;
      if (va > vb) return dir === 'asc' ? 1 : -1;
      return 0;
    }});
    sorted.forEach(card => list.appendChild(card));
  }}

  searchInput.addEventListener('input', apply);
  regionFilter.addEventListener('change', apply);
  sortBySelect.addEventListener('change', apply);
}})();
</script>
</body>
</html>
"#,
        filter_name = escape_html(&filter.name),
        query = escape_html(&filter.keywords.join(", ")),
        generated = generated_at.format("%d.%m.%Y %H:%M"),
        total = matches.len(),
        high = high,
        medium = medium,
        cards = cards,
    )
}

fn render_card(index: usize, scored: &ScoredTender, filter_name: &str) -> String {
    let tender = &scored.tender;
    let info = &scored.match_info;

    let reasons = if info.reasons.is_empty() {
        "• Найдено по ключевым словам".to_string()
    } else {
        info.reasons
            .iter()
            .map(|r| format!("• {}", escape_html(r)))
            .collect::<Vec<_>>()
            .join("<br>")
    };

    let red_flags = if info.red_flags.is_empty() {
        String::new()
    } else {
        format!(
            "<div class=\"red-flags\">🚩 {}</div>",
            escape_html(&info.red_flags.join("; "))
        )
    };

    let location = match (tender.customer_city.as_deref(), tender.customer_region.as_deref()) {
        (Some(city), Some(region)) if !region.to_lowercase().contains(
            city.trim_start_matches("г. ").to_lowercase().as_str(),
        ) =>
        {
            format!("{}, {}", city, region)
        }
        (_, Some(region)) => region.to_string(),
        (Some(city), None) => city.to_string(),
        (None, None) => "Н/Д".to_string(),
    };

    let published = tender
        .published_at
        .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| "Н/Д".into());
    let deadline = tender
        .submission_deadline
        .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| "Н/Д".into());

    format!(
        r#"<div class="tender-card"
     data-name="{name_lower}"
     data-price="{price_raw}"
     data-region="{region_attr}"
     data-filter="{filter_attr}"
     data-score="{score}"
     data-date="{date_attr}">
  <div class="tender-header">
    <span class="tender-number">{index}. №{number}</span>
    <span class="score-badge {score_class}">{score_emoji} {score}/100</span>
  </div>
  <h3 class="tender-title">{name}</h3>
  <div class="tender-details">
    <p><strong>💰 НМЦК:</strong> {price}</p>
    <p><strong>📅 Размещено:</strong> {published}</p>
    <p><strong>⏰ Окончание подачи:</strong> {deadline}</p>
    <p><strong>🏢 Заказчик:</strong> {customer}</p>
    <p><strong>📍 Регион:</strong> {location}</p>
  </div>
  <div class="match-reasons"><strong>Причины совпадения:</strong><br>{reasons}</div>
  {red_flags}
  <div class="tender-actions">
    <a href="{url}" target="_blank" class="btn-primary">Открыть на zakupki.gov.ru</a>
  </div>
</div>
"#,
        name_lower = escape_html(&tender.name.to_lowercase()),
        price_raw = tender.price.unwrap_or(0.0),
        region_attr = escape_html(tender.customer_region.as_deref().unwrap_or("")),
        filter_attr = escape_html(filter_name),
        score = info.score,
        date_attr = tender
            .published_at
            .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default(),
        index = index,
        number = escape_html(&tender.number),
        score_class = score_class(info.score),
        score_emoji = score_emoji(info.score),
        name = escape_html(&tender.name),
        price = format_price(tender.price),
        published = published,
        deadline = deadline,
        customer = escape_html(tender.customer_name.as_deref().unwrap_or("Н/Д")),
        location = escape_html(&location),
        reasons = reasons,
        red_flags = red_flags,
        url = escape_html(&tender.url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LawType, PurchaseStage, Tender, TenderMatch};

    fn sample_filter() -> TenderFilter {
        TenderFilter {
            id: 7,
            user_id: 1,
            name: "IT оборудование".into(),
            keywords: vec!["компьютер".into()],
            exclude_keywords: vec![],
            price_min: None,
            price_max: None,
            regions: vec![],
            tender_kinds: vec![],
            law_type: LawType::Both,
            purchase_stage: PurchaseStage::Submission,
            okpd2_codes: vec![],
            min_deadline_days: None,
            customer_keywords: vec![],
            publication_days: None,
            is_active: true,
            ai_intent: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn sample_match(score: u32) -> ScoredTender {
        ScoredTender {
            tender: Tender {
                number: "0123456789012".into(),
                name: "Поставка компьютеров <script>".into(),
                url: "https://zakupki.gov.ru/x?regNumber=1".into(),
                price: Some(2_500_000.0),
                customer_region: Some("Москва".into()),
                ..Tender::default()
            },
            match_info: TenderMatch {
                score,
                matched_keywords: vec!["компьютер".into()],
                reasons: vec!["Ключевое слово: компьютер".into()],
                red_flags: vec![],
                ai_verified: false,
                ai_skipped: true,
                ai_confidence: None,
                ai_reason: None,
            },
        }
    }

    #[test]
    fn report_is_self_contained_and_escaped() {
        let report = generate_report(&[sample_match(72)], &sample_filter(), Utc::now());
        assert!(report.contains("<!DOCTYPE html>"));
        assert!(report.contains("<style>"));
        assert!(report.contains("<script>"));
        // no external fetches
        assert!(!report.contains("http-equiv=\"refresh\""));
        assert!(!report.contains("src=\"http"));
        assert!(!report.contains("href=\"http://cdn"));
        // user content is escaped
        assert!(report.contains("&lt;script&gt;"));
        assert!(report.contains("0123456789012"));
    }

    #[test]
    fn summary_counts_split_high_and_medium() {
        let matches = vec![sample_match(85), sample_match(55), sample_match(30)];
        let report = generate_report(&matches, &sample_filter(), Utc::now());
        assert!(report.contains("<h3>3</h3><p>Всего найдено</p>"));
        assert!(report.contains("<h3>1</h3><p>Отличные совпадения"));
        assert!(report.contains("<h3>1</h3><p>Хорошие совпадения"));
    }

    #[test]
    fn empty_result_renders_hint() {
        let report = generate_report(&[], &sample_filter(), Utc::now());
        assert!(report.contains("Попробуйте изменить критерии"));
    }

    #[test]
    fn hundred_tender_report_stays_under_size_target() {
        let matches: Vec<ScoredTender> = (0..100).map(|_| sample_match(60)).collect();
        let report = generate_report(&matches, &sample_filter(), Utc::now());
        assert!(report.len() <= 2 * 1024 * 1024);
    }
}
