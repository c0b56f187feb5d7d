// assistant-service/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub gemini_key: String,
    pub gemini_base_url: String,
    pub chat_model: String,
    pub verifier_model: String,
    pub user_identification_url: String,
    /// SQLite file backing the key-value store. `None` keeps everything in process.
    pub store_path: Option<String>,
    pub word_delay_ms: u64,
    pub action_timeout_seconds: u64,
    pub verifier_timeout_ms: u64,
    pub max_tool_iterations: u32,
    pub thread_ttl_seconds: u64,
    pub monthly_quota_credits: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let gemini_key = env::var("GEMINI_KEY")
            .context("GEMINI_KEY environment variable not set. Please set it in your .env file")?;
        let user_identification_url = env::var("USER_IDENTIFICATION_URL")
            .context("USER_IDENTIFICATION_URL environment variable not set")?;

        let store_path = env::var("STORE_PATH").ok().filter(|p| !p.trim().is_empty());

        Ok(Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            api_port: env::var("API_PORT").unwrap_or_else(|_| "8080".into()).parse()?,
            gemini_key,
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into()),
            verifier_model: env::var("VERIFIER_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash-lite".into()),
            user_identification_url,
            store_path,
            word_delay_ms: env::var("WORD_DELAY_MS")
                .unwrap_or_else(|_| "40".into())
                .parse()?,
            action_timeout_seconds: env::var("ACTION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            verifier_timeout_ms: env::var("VERIFIER_TIMEOUT_MS")
                .unwrap_or_else(|_| "1500".into())
                .parse()?,
            max_tool_iterations: env::var("MAX_TOOL_ITERATIONS")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            thread_ttl_seconds: env::var("THREAD_TTL_SECS")
                .unwrap_or_else(|_| "600".into())
                .parse()?,
            monthly_quota_credits: env::var("MONTHLY_QUOTA_CREDITS")
                .unwrap_or_else(|_| crate::quota::MONTHLY_QUOTA_CREDITS.to_string())
                .parse()?,
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Gemini Base URL: {}", self.gemini_base_url);
        info!("- Gemini Key: {}", mask_secret(&self.gemini_key));
        info!("- Chat Model: {}", self.chat_model);
        info!("- Verifier Model: {}", self.verifier_model);
        info!("- Identity URL: {}", self.user_identification_url);
        info!("- Store: {}", self.store_path.as_deref().unwrap_or("in-memory"));
        info!("- Word Delay: {}ms", self.word_delay_ms);
        info!("- Action Timeout: {}s", self.action_timeout_seconds);
        info!("- Verifier Timeout: {}ms", self.verifier_timeout_ms);
        info!("- Max Tool Iterations: {}", self.max_tool_iterations);
        info!("- Thread TTL: {}s", self.thread_ttl_seconds);
        info!("- Monthly Quota: {} credits", self.monthly_quota_credits);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    /// The subset of configuration the session engine reads on every session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            chat_model: self.chat_model.clone(),
            word_delay: Duration::from_millis(self.word_delay_ms),
            max_tool_iterations: self.max_tool_iterations,
            thread_ttl: Duration::from_secs(self.thread_ttl_seconds),
            monthly_quota_credits: self.monthly_quota_credits,
        }
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_seconds)
    }

    pub fn verifier_timeout(&self) -> Duration {
        Duration::from_millis(self.verifier_timeout_ms)
    }
}

/// Per-session tunables, detached from the process environment.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub chat_model: String,
    pub word_delay: Duration,
    pub max_tool_iterations: u32,
    pub thread_ttl: Duration,
    pub monthly_quota_credits: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            chat_model: "gemini-2.0-flash".to_string(),
            word_delay: Duration::from_millis(40),
            max_tool_iterations: 10,
            thread_ttl: Duration::from_secs(600),
            monthly_quota_credits: crate::quota::MONTHLY_QUOTA_CREDITS,
        }
    }
}

fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &secret[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            api_host: "127.0.0.1".to_string(),
            api_port: 8080,
            gemini_key: "test-key-123456".to_string(),
            gemini_base_url: "http://127.0.0.1:9999".to_string(),
            chat_model: "gemini-2.0-flash".to_string(),
            verifier_model: "gemini-2.0-flash-lite".to_string(),
            user_identification_url: "http://127.0.0.1:9998/identify".to_string(),
            store_path: None,
            word_delay_ms: 40,
            action_timeout_seconds: 10,
            verifier_timeout_ms: 1500,
            max_tool_iterations: 10,
            thread_ttl_seconds: 600,
            monthly_quota_credits: 80_000_000,
        }
    }

    // ===== API Address Tests =====

    #[test]
    fn test_api_addr_parsing() {
        let config = create_test_config();
        let addr = config.api_addr().unwrap();

        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_api_addr_with_zero_address() {
        let mut config = create_test_config();
        config.api_host = "0.0.0.0".to_string();
        config.api_port = 5000;

        let addr = config.api_addr().unwrap();
        assert_eq!(addr.port(), 5000);
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
    }

    #[test]
    fn test_api_addr_rejects_garbage_host() {
        let mut config = create_test_config();
        config.api_host = "not a host".to_string();
        assert!(config.api_addr().is_err());
    }

    // ===== Session Settings Tests =====

    #[test]
    fn test_session_settings_carry_timings() {
        let settings = create_test_config().session_settings();

        assert_eq!(settings.word_delay, Duration::from_millis(40));
        assert_eq!(settings.thread_ttl, Duration::from_secs(600));
        assert_eq!(settings.max_tool_iterations, 10);
        assert_eq!(settings.monthly_quota_credits, 80_000_000);
    }

    #[test]
    fn test_default_session_settings_match_service_defaults() {
        let defaults = SessionSettings::default();
        let from_config = create_test_config().session_settings();

        assert_eq!(defaults.chat_model, from_config.chat_model);
        assert_eq!(defaults.max_tool_iterations, from_config.max_tool_iterations);
        assert_eq!(defaults.thread_ttl, from_config.thread_ttl);
    }

    #[test]
    fn test_timeouts() {
        let config = create_test_config();
        assert_eq!(config.action_timeout(), Duration::from_secs(10));
        assert_eq!(config.verifier_timeout(), Duration::from_millis(1500));
        assert!(config.verifier_timeout() < config.action_timeout());
    }

    // ===== Secret Masking Tests =====

    #[test]
    fn test_mask_secret_hides_tail() {
        assert_eq!(mask_secret("abcdefgh"), "abcd****");
        assert_eq!(mask_secret("abc"), "****");
    }
}
