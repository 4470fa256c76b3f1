use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_WELCOME: &str =
    "Hi there! I'm your shopping assistant. Ask me about products, orders, returns or anything on this page.";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub access_key: Option<String>,
    pub website_id: Option<String>,
    pub store_url: Url,
    pub db_path: PathBuf,
    pub port: u16,
    pub http_timeout_secs: u64,
    pub auto_submit_delay: Duration,
    pub recording_limit: Duration,
    pub welcome_message: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store_url = get("VOICERO_STORE_URL").unwrap_or_else(|| "http://127.0.0.1:9292".into());
        let store_url = Url::parse(&store_url)
            .with_context(|| format!("VOICERO_STORE_URL is not a valid URL: {}", store_url))?;

        let db_path = match get("VOICERO_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home_dir = get("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home_dir).join(".voicero").join("widget.db")
            }
        };

        Ok(Self {
            api_url: get("VOICERO_API_URL").unwrap_or_else(|| "https://www.voicero.ai".into()),
            access_key: get("VOICERO_ACCESS_KEY"),
            website_id: get("VOICERO_WEBSITE_ID"),
            store_url,
            db_path,
            port: parse_or(get("VOICERO_PORT"), "VOICERO_PORT", 3000)?,
            http_timeout_secs: parse_or(get("VOICERO_HTTP_TIMEOUT_SECS"), "VOICERO_HTTP_TIMEOUT_SECS", 30)?,
            auto_submit_delay: Duration::from_millis(parse_or(
                get("VOICERO_AUTO_SUBMIT_DELAY_MS"),
                "VOICERO_AUTO_SUBMIT_DELAY_MS",
                1000,
            )?),
            recording_limit: Duration::from_secs(parse_or(
                get("VOICERO_RECORDING_LIMIT_SECS"),
                "VOICERO_RECORDING_LIMIT_SECS",
                30,
            )?),
            welcome_message: get("VOICERO_WELCOME_MESSAGE").unwrap_or_else(|| DEFAULT_WELCOME.into()),
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .parse()
            .with_context(|| format!("invalid {}: {}", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[("HOME", "/home/shop")]).unwrap();
        assert_eq!(cfg.api_url, "https://www.voicero.ai");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.recording_limit, Duration::from_secs(30));
        assert_eq!(cfg.db_path, PathBuf::from("/home/shop/.voicero/widget.db"));
        assert!(cfg.access_key.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("VOICERO_STORE_URL", "https://shop.example"),
            ("VOICERO_WEBSITE_ID", "site-1"),
            ("VOICERO_AUTO_SUBMIT_DELAY_MS", "0"),
            ("VOICERO_ACCESS_KEY", "  "),
        ])
        .unwrap();
        assert_eq!(cfg.store_url.as_str(), "https://shop.example/");
        assert_eq!(cfg.website_id.as_deref(), Some("site-1"));
        assert_eq!(cfg.auto_submit_delay, Duration::ZERO);
        assert!(cfg.access_key.is_none());
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(config(&[("VOICERO_PORT", "eighty")]).is_err());
        assert!(config(&[("VOICERO_STORE_URL", "not a url")]).is_err());
    }
}
