//! Best-effort export of delivered notifications to an external
//! spreadsheet. A failed export is logged and forgotten — it must never
//! stall or fail the notification pipeline.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SniperError;
use crate::model::{ScoredTender, Tier};
use crate::notify::format_price;

const SHEETS_TIMEOUT: Duration = Duration::from_secs(15);

/// Column set for the export sheet. AI columns are appended for premium
/// users only.
pub const BASE_COLUMNS: &[&str] = &[
    "Ссылка",
    "Название",
    "Заказчик",
    "Регион",
    "Срок подачи",
    "Цена",
    "Фильтр",
    "Score",
    "Красные флаги",
];
pub const AI_COLUMNS: &[&str] = &["AI уверенность", "AI обоснование"];

/// Spreadsheet collaborator interface.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn ensure_headers(
        &self,
        spreadsheet_id: &str,
        columns: &[&str],
        sheet_name: &str,
    ) -> Result<(), SniperError>;

    async fn append_row(
        &self,
        spreadsheet_id: &str,
        row: &[String],
        sheet_name: &str,
    ) -> Result<(), SniperError>;
}

/// Google Sheets values API implementation. Expects an OAuth bearer
/// token with spreadsheet scope; token refresh is the operator's
/// concern.
pub struct GoogleSheetsApi {
    client: reqwest::Client,
    access_token: String,
}

impl GoogleSheetsApi {
    pub fn new(access_token: &str) -> anyhow::Result<GoogleSheetsApi> {
        Ok(GoogleSheetsApi {
            client: reqwest::Client::builder().timeout(SHEETS_TIMEOUT).build()?,
            access_token: access_token.to_string(),
        })
    }

    async fn append(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), SniperError> {
        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}:append?valueInputOption=USER_ENTERED",
            spreadsheet_id, range
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "values": values }))
            .send()
            .await
            .map_err(|e| SniperError::Network(format!("sheets append: {}", e)))?;

        if !response.status().is_success() {
            return Err(SniperError::Network(format!(
                "sheets append returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsApi {
    async fn ensure_headers(
        &self,
        spreadsheet_id: &str,
        columns: &[&str],
        sheet_name: &str,
    ) -> Result<(), SniperError> {
        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}!A1:Z1",
            spreadsheet_id, sheet_name
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| SniperError::Network(format!("sheets read: {}", e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SniperError::Parse(format!("sheets read: {}", e)))?;

        let has_headers = body["values"]
            .as_array()
            .map(|rows| !rows.is_empty())
            .unwrap_or(false);
        if has_headers {
            return Ok(());
        }

        let header_row: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.append(spreadsheet_id, &format!("{}!A1", sheet_name), vec![header_row])
            .await
    }

    async fn append_row(
        &self,
        spreadsheet_id: &str,
        row: &[String],
        sheet_name: &str,
    ) -> Result<(), SniperError> {
        self.append(
            spreadsheet_id,
            &format!("{}!A1", sheet_name),
            vec![row.to_vec()],
        )
        .await
    }
}

/// Row values for one delivered tender, matching `BASE_COLUMNS` (+
/// `AI_COLUMNS` on premium).
pub fn export_row(scored: &ScoredTender, filter_name: &str, tier: Tier) -> Vec<String> {
    let tender = &scored.tender;
    let info = &scored.match_info;
    let mut row = vec![
        tender.url.clone(),
        tender.name.clone(),
        tender.customer_name.clone().unwrap_or_default(),
        tender.customer_region.clone().unwrap_or_default(),
        tender
            .submission_deadline
            .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
            .unwrap_or_default(),
        format_price(tender.price),
        filter_name.to_string(),
        info.score.to_string(),
        info.red_flags.join("; "),
    ];
    if tier.is_premium() {
        row.push(
            info.ai_confidence
                .map(|c| format!("{}%", c))
                .unwrap_or_default(),
        );
        row.push(info.ai_reason.clone().unwrap_or_default());
    }
    row
}

/// Fire-and-forget export used by the monitoring loop.
pub async fn export_best_effort(
    sheets: &Arc<dyn SheetsApi>,
    spreadsheet_id: &str,
    scored: &ScoredTender,
    filter_name: &str,
    tier: Tier,
) {
    let mut columns: Vec<&str> = BASE_COLUMNS.to_vec();
    if tier.is_premium() {
        columns.extend_from_slice(AI_COLUMNS);
    }
    if let Err(err) = sheets
        .ensure_headers(spreadsheet_id, &columns, "Тендеры")
        .await
    {
        tracing::warn!(error = %err, "sheets header check failed");
        return;
    }
    let row = export_row(scored, filter_name, tier);
    if let Err(err) = sheets.append_row(spreadsheet_id, &row, "Тендеры").await {
        tracing::warn!(error = %err, tender = %scored.tender.number, "sheets export failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Tender, TenderMatch};

    fn scored() -> ScoredTender {
        ScoredTender {
            tender: Tender {
                number: "1".into(),
                name: "Поставка ПК".into(),
                url: "https://zakupki.gov.ru/1".into(),
                price: Some(100_000.0),
                ..Tender::default()
            },
            match_info: TenderMatch {
                score: 64,
                matched_keywords: vec![],
                reasons: vec![],
                red_flags: vec!["Цена не указана".into()],
                ai_verified: true,
                ai_skipped: false,
                ai_confidence: Some(91),
                ai_reason: Some("профильный тендер".into()),
            },
        }
    }

    #[test]
    fn base_row_matches_column_count() {
        let row = export_row(&scored(), "IT", Tier::Basic);
        assert_eq!(row.len(), BASE_COLUMNS.len());
        assert_eq!(row[7], "64");
    }

    #[test]
    fn premium_row_appends_ai_columns() {
        let row = export_row(&scored(), "IT", Tier::Premium);
        assert_eq!(row.len(), BASE_COLUMNS.len() + AI_COLUMNS.len());
        assert_eq!(row[9], "91%");
    }
}
