use std::collections::HashSet;
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Service configuration, read once at startup from the environment.
/// Missing required settings are fatal.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token used by the notification sender.
    pub bot_token: String,
    /// `sqlite://...` connection string for the shared pool.
    pub database_url: String,
    /// LLM key; without it every AI stage degrades to its fallback.
    pub openai_api_key: Option<String>,
    pub poll_interval: Duration,
    pub max_tenders_per_poll: u32,
    pub proxy_url: Option<String>,
    pub admin_user_id: Option<i64>,
    /// Access allowlist for the chat front-end (consumed there, carried
    /// here so one process sees one config).
    pub allowed_users: Option<HashSet<i64>>,
    pub port: u16,
    /// Optional override path for the matching dictionaries JSON.
    pub dictionaries_path: Option<String>,
    /// Kill switch for all LLM calls regardless of key presence.
    pub ai_disabled: bool,
    pub spreadsheet_id: Option<String>,
    pub sheets_token: Option<String>,
    pub worker_pool: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bot_token = env::var("BOT_TOKEN")
            .map_err(|_| anyhow!("BOT_TOKEN is required"))?;
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow!("DATABASE_URL is required"))?;

        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|v| !v.trim().is_empty());

        let poll_interval = Duration::from_secs(
            parse_optional_u64("POLL_INTERVAL_SECONDS")?.unwrap_or(300),
        );
        let max_tenders_per_poll =
            parse_optional_u64("MAX_TENDERS_PER_POLL")?.unwrap_or(100) as u32;

        let proxy_url = env::var("PROXY_URL").ok().filter(|v| !v.trim().is_empty());
        let admin_user_id = parse_optional_i64("ADMIN_USER_ID")?;

        let allowed_users = env::var("ALLOWED_USERS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<i64>()
                            .map_err(|_| anyhow!("ALLOWED_USERS must be comma-separated ids"))
                    })
                    .collect::<Result<HashSet<_>>>()
            })
            .transpose()?
            .filter(|set| !set.is_empty());

        let port = parse_optional_u64("PORT")?.unwrap_or(8080) as u16;
        let dictionaries_path = env::var("SNIPER_DICTIONARIES").ok();
        let ai_disabled = parse_bool_env("SNIPER_AI_DISABLED")?.unwrap_or(false);
        let spreadsheet_id = env::var("SNIPER_SPREADSHEET_ID").ok().filter(|v| !v.is_empty());
        let sheets_token = env::var("SNIPER_SHEETS_TOKEN").ok().filter(|v| !v.is_empty());
        let worker_pool = parse_optional_u64("SNIPER_WORKER_POOL")?.unwrap_or(8) as usize;

        Ok(Self {
            bot_token,
            database_url,
            openai_api_key,
            poll_interval,
            max_tenders_per_poll,
            proxy_url,
            admin_user_id,
            allowed_users,
            port,
            dictionaries_path,
            ai_disabled,
            spreadsheet_id,
            sheets_token,
            worker_pool,
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_i64(var: &str) -> Result<Option<i64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be an integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const ALL_VARS: &[&str] = &[
        "BOT_TOKEN",
        "DATABASE_URL",
        "OPENAI_API_KEY",
        "POLL_INTERVAL_SECONDS",
        "MAX_TENDERS_PER_POLL",
        "PROXY_URL",
        "ADMIN_USER_ID",
        "ALLOWED_USERS",
        "PORT",
        "SNIPER_DICTIONARIES",
        "SNIPER_AI_DISABLED",
        "SNIPER_SPREADSHEET_ID",
        "SNIPER_SHEETS_TOKEN",
        "SNIPER_WORKER_POOL",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_settings_are_fatal() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert!(AppConfig::from_env().is_err());

        std::env::set_var("BOT_TOKEN", "123:abc");
        assert!(AppConfig::from_env().is_err());

        std::env::set_var("DATABASE_URL", "sqlite::memory:");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(300));
        assert_eq!(cfg.max_tenders_per_poll, 100);
        assert_eq!(cfg.port, 8080);
        assert!(cfg.openai_api_key.is_none());
        assert!(!cfg.ai_disabled);
        clear_env();
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("BOT_TOKEN", "123:abc");
        std::env::set_var("DATABASE_URL", "sqlite://sniper.db");
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("POLL_INTERVAL_SECONDS", "60");
        std::env::set_var("MAX_TENDERS_PER_POLL", "25");
        std::env::set_var("PROXY_URL", "http://proxy:3128");
        std::env::set_var("ADMIN_USER_ID", "42");
        std::env::set_var("ALLOWED_USERS", "1, 2, 3");
        std::env::set_var("PORT", "9090");
        std::env::set_var("SNIPER_AI_DISABLED", "true");
        std::env::set_var("SNIPER_WORKER_POOL", "4");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.max_tenders_per_poll, 25);
        assert_eq!(cfg.proxy_url.as_deref(), Some("http://proxy:3128"));
        assert_eq!(cfg.admin_user_id, Some(42));
        assert_eq!(cfg.port, 9090);
        assert!(cfg.ai_disabled);
        assert_eq!(cfg.worker_pool, 4);
        let allowed = cfg.allowed_users.unwrap();
        assert!(allowed.contains(&1) && allowed.contains(&2) && allowed.contains(&3));

        clear_env();
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("BOT_TOKEN", "123:abc");
        std::env::set_var("DATABASE_URL", "sqlite::memory:");
        std::env::set_var("POLL_INTERVAL_SECONDS", "not-a-number");
        assert!(AppConfig::from_env().is_err());
        clear_env();
    }
}
