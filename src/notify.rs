//! Notification delivery through the chat collaborator.
//!
//! The sender translates the vendor's error surface into the small
//! `SendOutcome` taxonomy the monitoring loop acts on, formats tender
//! messages and retries transient failures. It never touches
//! `notifications_sent_today` — the store owns that counter.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SendOutcome;
use crate::model::{Tender, TenderMatch};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Chat collaborator interface. Production talks to the Telegram Bot
/// API; tests substitute a recording fake.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, chat_id: i64, html_text: &str) -> SendOutcome;
    async fn send_document(&self, chat_id: i64, bytes: Vec<u8>, filename: &str) -> SendOutcome;
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    result: Option<TelegramMessage>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<TelegramParameters>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramParameters {
    retry_after: Option<u64>,
}

/// Telegram Bot API client.
pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(bot_token: &str) -> anyhow::Result<TelegramApi> {
        Self::with_base_url(bot_token, "https://api.telegram.org")
    }

    pub fn with_base_url(bot_token: &str, base_url: &str) -> anyhow::Result<TelegramApi> {
        Ok(TelegramApi {
            client: reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?,
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), bot_token),
        })
    }

    fn classify(status: reqwest::StatusCode, body: &TelegramResponse) -> SendOutcome {
        if body.ok {
            return SendOutcome::Ok(body.result.as_ref().map(|m| m.message_id));
        }
        match body.error_code.unwrap_or(status.as_u16()) {
            403 => SendOutcome::UserBlocked,
            400 => SendOutcome::BadRecipient,
            429 => {
                let delay = body
                    .parameters
                    .as_ref()
                    .and_then(|p| p.retry_after)
                    .unwrap_or(5);
                SendOutcome::RateLimited(Duration::from_secs(delay))
            }
            _ => SendOutcome::Transient,
        }
    }
}

#[async_trait]
impl ChatApi for TelegramApi {
    async fn send_message(&self, chat_id: i64, html_text: &str) -> SendOutcome {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": html_text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                match resp.json::<TelegramResponse>().await {
                    Ok(body) => Self::classify(status, &body),
                    Err(err) => {
                        tracing::warn!(error = %err, "unparseable chat API response");
                        SendOutcome::Transient
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "chat send failed");
                SendOutcome::Transient
            }
        }
    }

    async fn send_document(&self, chat_id: i64, bytes: Vec<u8>, filename: &str) -> SendOutcome {
        let part = match reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()).mime_str("text/html") {
            Ok(part) => part,
            Err(err) => {
                tracing::error!(error = %err, "failed to build document part");
                return SendOutcome::BadRecipient;
            }
        };
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        let response = self
            .client
            .post(format!("{}/sendDocument", self.base_url))
            .multipart(form)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                match resp.json::<TelegramResponse>().await {
                    Ok(body) => Self::classify(status, &body),
                    Err(_) => SendOutcome::Transient,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "document send failed");
                SendOutcome::Transient
            }
        }
    }
}

/// High-level sender: formatting plus the retry policy over `ChatApi`.
pub struct Notifier {
    chat: Arc<dyn ChatApi>,
}

impl Notifier {
    pub fn new(chat: Arc<dyn ChatApi>) -> Notifier {
        Notifier { chat }
    }

    /// Deliver one tender notification. Transient failures retry up to
    /// three times with backoff; a rate-limit waits out the vendor's
    /// delay before retrying.
    pub async fn deliver_tender(
        &self,
        chat_id: i64,
        tender: &Tender,
        match_info: &TenderMatch,
        filter_name: &str,
    ) -> SendOutcome {
        let message = format_tender_message(tender, match_info, filter_name);
        self.send_with_retries(chat_id, &message).await
    }

    /// One-time system notice when the user's daily quota is exhausted.
    pub async fn send_quota_exceeded(&self, chat_id: i64, current_limit: u32) -> SendOutcome {
        let message = format!(
            "⚠️ <b>Достигнут лимит уведомлений</b>\n\n\
             Вы получили максимальное количество уведомлений сегодня: <b>{}</b>\n\n\
             Для увеличения лимита рассмотрите повышение тарифа.\n\
             Мониторинг продолжится завтра автоматически.",
            current_limit
        );
        self.send_with_retries(chat_id, &message).await
    }

    pub async fn send_report(&self, chat_id: i64, html: String, filename: &str) -> SendOutcome {
        self.chat
            .send_document(chat_id, html.into_bytes(), filename)
            .await
    }

    async fn send_with_retries(&self, chat_id: i64, message: &str) -> SendOutcome {
        let mut outcome = SendOutcome::Transient;
        for attempt in 0..MAX_RETRIES {
            outcome = self.chat.send_message(chat_id, message).await;
            match &outcome {
                SendOutcome::Ok(_)
                | SendOutcome::UserBlocked
                | SendOutcome::BadRecipient => return outcome,
                SendOutcome::RateLimited(delay) => {
                    tracing::info!(chat = chat_id, delay_s = delay.as_secs(), "chat rate limit, waiting");
                    tokio::time::sleep(*delay).await;
                }
                SendOutcome::Transient => {
                    tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
                }
            }
        }
        outcome
    }
}

fn score_emoji(score: u32) -> &'static str {
    match score {
        80.. => "🔥",
        60..=79 => "✨",
        _ => "📌",
    }
}

pub fn format_price(price: Option<f64>) -> String {
    match price {
        Some(p) => {
            // 2 500 000 ₽ — thousands separated by spaces.
            let whole = p.round() as i64;
            let digits: Vec<char> = whole.abs().to_string().chars().collect();
            let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
            for (i, c) in digits.iter().enumerate() {
                if i > 0 && (digits.len() - i) % 3 == 0 {
                    grouped.push(' ');
                }
                grouped.push(*c);
            }
            let sign = if whole < 0 { "-" } else { "" };
            format!("{}{} ₽", sign, grouped)
        }
        None => "Не указана".into(),
    }
}

/// HTML message shown in the chat for one matched tender.
pub fn format_tender_message(
    tender: &Tender,
    match_info: &TenderMatch,
    filter_name: &str,
) -> String {
    let mut name: String = tender.name.chars().take(200).collect();
    if name.len() < tender.name.len() {
        name.push('…');
    }

    let published = tender
        .published_at
        .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| "Неизвестна".into());

    let keywords = if match_info.matched_keywords.is_empty() {
        "Базовый фильтр".to_string()
    } else {
        match_info
            .matched_keywords
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut message = format!(
        "{emoji} <b>Новый тендер!</b>\n\n\
         <b>Название:</b> {name}\n\n\
         <b>📊 Релевантность:</b> {score}/100\n\
         <b>🎯 Фильтр:</b> {filter}\n\n\
         <b>💰 Цена:</b> {price}\n\
         <b>📅 Опубликован:</b> {published}\n\
         <b>📍 Регион:</b> {region}\n\
         <b>🏢 Заказчик:</b> {customer}\n\n\
         <b>🔑 Совпадения:</b> {keywords}",
        emoji = score_emoji(match_info.score),
        name = name,
        score = match_info.score,
        filter = filter_name,
        price = format_price(tender.price),
        published = published,
        region = tender.customer_region.as_deref().unwrap_or("Не указан"),
        customer = tender
            .customer_name
            .as_deref()
            .map(|c| c.chars().take(100).collect::<String>())
            .unwrap_or_else(|| "Не указан".into()),
        keywords = keywords,
    );

    if !match_info.red_flags.is_empty() {
        message.push_str(&format!("\n<b>🚩 Флаги:</b> {}", match_info.red_flags.join("; ")));
    }
    message.push_str(&format!("\n\n<b>№</b> {}\n{}", tender.number, tender.url));
    message
}
