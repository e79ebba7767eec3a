//! Environment configuration for DocSign API

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;
use docsign_core::EngineConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub database_url: String,
    /// Credits granted to an initiator the first time the API sees them
    pub default_credits: u32,
    /// Required in `X-API-Key` on operator endpoints; unset leaves them open
    pub api_key: Option<String>,
    pub engine: EngineConfig,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests never touch the process environment
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match get("PORT") {
            Some(p) => p.parse().with_context(|| format!("invalid PORT {:?}", p))?,
            None => 3001,
        };

        let database_url = get("DATABASE_URL").unwrap_or_else(|| {
            let data_dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("docsign-api");
            std::fs::create_dir_all(&data_dir).ok();
            format!("sqlite:{}/docsign.db?mode=rwc", data_dir.display())
        });

        let mut engine = EngineConfig::default();
        if let Some(base) = get("SIGNING_LINK_BASE") {
            engine.signing_link_base = base;
        }
        if let Some(secs) = get("OTP_EMAIL_TTL_SECS") {
            let secs: i64 = secs
                .parse()
                .with_context(|| format!("invalid OTP_EMAIL_TTL_SECS {:?}", secs))?;
            engine.email_otp_ttl = Duration::seconds(secs);
        }
        if let Some(secs) = get("OTP_SMS_TTL_SECS") {
            let secs: i64 = secs
                .parse()
                .with_context(|| format!("invalid OTP_SMS_TTL_SECS {:?}", secs))?;
            engine.sms_otp_ttl = Duration::seconds(secs);
        }

        let default_credits = match get("DEFAULT_CREDITS") {
            Some(c) => c
                .parse()
                .with_context(|| format!("invalid DEFAULT_CREDITS {:?}", c))?,
            None => 0,
        };

        let api_key = get("DOCSIGN_API_KEY").filter(|k| !k.trim().is_empty());

        Ok(Self {
            port,
            database_url,
            default_credits,
            api_key,
            engine,
        })
    }

    /// Private in-memory database, used by tests
    pub fn in_memory() -> Self {
        Self {
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            default_credits: 0,
            api_key: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Get platform-specific data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
