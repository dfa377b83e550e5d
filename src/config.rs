//! Runtime configuration shared by the HTTP client, credentials and pipeline.

use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.spotify.com/api/token";

/// Restricts search results to tracks playable in the token owner's country.
pub const MARKET_FROM_TOKEN: &str = "from_token";

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub api_base: String,
    pub accounts_url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub market: String,
    /// Tag records buffered between the walker thread and the matcher.
    pub channel_capacity: usize,
    /// Tracks between progress lines in log-only mode.
    pub progress_interval: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            market: MARKET_FROM_TOKEN.to_string(),
            channel_capacity: 64,
            progress_interval: 100,
        }
    }
}

impl LoaderConfig {
    /// Builds an API URL from a path such as `/search`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_trims_trailing_slash() {
        let config = LoaderConfig {
            api_base: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.api_url("/me/tracks"), "http://localhost:8080/v1/me/tracks");
    }

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.api_url("/search"), "https://api.spotify.com/v1/search");
        assert_eq!(config.market, "from_token");
        assert_eq!(config.progress_interval, 100);
    }
}
