use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "tenk-pipeline admin@example.com";

#[derive(Clone, Debug)]
pub struct Config {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub sec_user_agent: String,
    pub poll_interval: Duration,
    pub db_path: PathBuf,
    pub max_section_words: usize,
    pub rate_limit_delay: Duration,
    /// Watchlist as (ticker, CIK) pairs, processed in order.
    pub watchlist: Vec<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let llm_api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
        let llm_base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());
        let llm_model = std::env::var("LLM_MODEL")
            .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string());
        let sec_user_agent =
            std::env::var("SEC_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());

        let poll_interval = std::env::var("POLL_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let db_path =
            PathBuf::from(std::env::var("DB_PATH").unwrap_or_else(|_| "tenk_db".to_string()));

        let max_section_words = std::env::var("MAX_SECTION_WORDS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(6000);

        // SEC allows 10 req/sec; 120ms spacing keeps us safely under.
        let rate_limit_delay = std::env::var("RATE_LIMIT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(120));

        let watchlist = match std::env::var("WATCHLIST") {
            Ok(raw) => parse_watchlist(&raw)?,
            Err(_) => default_watchlist(),
        };

        Ok(Self {
            llm_api_key,
            llm_base_url,
            llm_model,
            sec_user_agent,
            poll_interval,
            db_path,
            max_section_words,
            rate_limit_delay,
            watchlist,
        })
    }

    /// Collects configuration errors instead of failing on the first one,
    /// so an operator sees everything wrong with the environment at once.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.llm_api_key.is_empty() {
            errors.push("LLM_API_KEY is not set".to_string());
        }
        if self.sec_user_agent.is_empty() || self.sec_user_agent == DEFAULT_USER_AGENT {
            errors.push("SEC_USER_AGENT should be set to your name and email".to_string());
        }
        if self.watchlist.is_empty() {
            errors.push("WATCHLIST is empty".to_string());
        }
        errors
    }
}

/// Parses "AAPL:320193,MSFT:789019" into (ticker, CIK) pairs.
fn parse_watchlist(raw: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (ticker, cik) = part
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid WATCHLIST entry (expected TICKER:CIK): {}", part))?;
        let cik = cik.trim();
        if cik.is_empty() || !cik.chars().all(|c| c.is_ascii_digit()) {
            return Err(anyhow!("invalid CIK in WATCHLIST entry: {}", part));
        }
        entries.push((ticker.trim().to_uppercase(), cik.to_string()));
    }
    Ok(entries)
}

fn default_watchlist() -> Vec<(String, String)> {
    vec![
        ("AAPL".to_string(), "320193".to_string()),
        ("MSFT".to_string(), "789019".to_string()),
        ("GOOGL".to_string(), "1652044".to_string()),
        ("NVDA".to_string(), "1045810".to_string()),
        ("META".to_string(), "1326801".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watchlist() {
        let entries = parse_watchlist("aapl:320193, MSFT:789019").unwrap();
        assert_eq!(
            entries,
            vec![
                ("AAPL".to_string(), "320193".to_string()),
                ("MSFT".to_string(), "789019".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_watchlist_rejects_missing_cik() {
        assert!(parse_watchlist("AAPL").is_err());
        assert!(parse_watchlist("AAPL:32x193").is_err());
    }
}
