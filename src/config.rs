use serde::Deserialize;
use std::time::Duration;

/// Default SUNAT search page.
pub const DEFAULT_PORTAL_URL: &str =
    "https://e-consultaruc.sunat.gob.pe/cl-ti-itmrconsruc/FrameCriterioBusquedaWeb.jsp";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub portal_url: String,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    /// Key the rate limiter on forwarding headers instead of the socket peer.
    /// Only safe behind a reverse proxy that overwrites them.
    pub trust_proxy_headers: bool,
    pub max_concurrent_browsers: usize,
    pub browser_queue_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
    pub results_timeout_secs: u64,
    pub chrome_executable: Option<String>,
    pub browser_headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            cache_ttl_secs: 86_400,
            cache_max_entries: 10_000,
            rate_limit_max_requests: 15,
            rate_limit_window_secs: 60,
            trust_proxy_headers: false,
            max_concurrent_browsers: 4,
            browser_queue_timeout_secs: 30,
            navigation_timeout_secs: 30,
            results_timeout_secs: 10,
            chrome_executable: None,
            browser_headless: true,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// Unset variables fall back to [`Config::default`]; set-but-invalid ones are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            port: parse_or(var("PORT"), defaults.port, "PORT must be a valid number between 1-65535")?,
            portal_url: match var("SUNAT_PORTAL_URL") {
                Some(raw) => {
                    let parsed = url::Url::parse(raw.trim()).map_err(|e| {
                        anyhow::anyhow!("SUNAT_PORTAL_URL is not a valid URL: {}", e)
                    })?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        anyhow::bail!("SUNAT_PORTAL_URL must start with http:// or https://");
                    }
                    parsed.to_string()
                }
                None => defaults.portal_url,
            },
            cache_ttl_secs: parse_or(
                var("CACHE_TTL_SECS"),
                defaults.cache_ttl_secs,
                "CACHE_TTL_SECS must be a positive number of seconds",
            )?,
            cache_max_entries: parse_or(
                var("CACHE_MAX_ENTRIES"),
                defaults.cache_max_entries,
                "CACHE_MAX_ENTRIES must be a positive number",
            )?,
            rate_limit_max_requests: parse_or(
                var("RATE_LIMIT_MAX_REQUESTS"),
                defaults.rate_limit_max_requests,
                "RATE_LIMIT_MAX_REQUESTS must be a positive number",
            )?,
            rate_limit_window_secs: parse_or(
                var("RATE_LIMIT_WINDOW_SECS"),
                defaults.rate_limit_window_secs,
                "RATE_LIMIT_WINDOW_SECS must be a positive number of seconds",
            )?,
            trust_proxy_headers: parse_flag(
                var("TRUST_PROXY_HEADERS"),
                defaults.trust_proxy_headers,
                "TRUST_PROXY_HEADERS must be true or false",
            )?,
            max_concurrent_browsers: parse_or(
                var("MAX_CONCURRENT_BROWSERS"),
                defaults.max_concurrent_browsers,
                "MAX_CONCURRENT_BROWSERS must be a positive number",
            )?,
            browser_queue_timeout_secs: parse_or(
                var("BROWSER_QUEUE_TIMEOUT_SECS"),
                defaults.browser_queue_timeout_secs,
                "BROWSER_QUEUE_TIMEOUT_SECS must be a positive number of seconds",
            )?,
            navigation_timeout_secs: parse_or(
                var("NAVIGATION_TIMEOUT_SECS"),
                defaults.navigation_timeout_secs,
                "NAVIGATION_TIMEOUT_SECS must be a positive number of seconds",
            )?,
            results_timeout_secs: parse_or(
                var("RESULTS_TIMEOUT_SECS"),
                defaults.results_timeout_secs,
                "RESULTS_TIMEOUT_SECS must be a positive number of seconds",
            )?,
            chrome_executable: var("CHROME_EXECUTABLE"),
            browser_headless: parse_flag(
                var("BROWSER_HEADLESS"),
                defaults.browser_headless,
                "BROWSER_HEADLESS must be true or false",
            )?,
        };

        for (name, value) in [
            ("CACHE_TTL_SECS", config.cache_ttl_secs),
            ("RATE_LIMIT_MAX_REQUESTS", u64::from(config.rate_limit_max_requests)),
            ("RATE_LIMIT_WINDOW_SECS", config.rate_limit_window_secs),
            ("MAX_CONCURRENT_BROWSERS", config.max_concurrent_browsers as u64),
            ("RESULTS_TIMEOUT_SECS", config.results_timeout_secs),
            ("NAVIGATION_TIMEOUT_SECS", config.navigation_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} cannot be zero", name);
            }
        }

        tracing::debug!("Portal URL: {}", config.portal_url);
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "Rate limit: {} requests / {}s, browser slots: {}",
            config.rate_limit_max_requests,
            config.rate_limit_window_secs,
            config.max_concurrent_browsers
        );
        if config.trust_proxy_headers {
            tracing::warn!("Rate limiter trusts X-Forwarded-For / X-Real-IP / Forwarded headers");
        }

        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn browser_queue_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_queue_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn results_timeout(&self) -> Duration {
        Duration::from_secs(self.results_timeout_secs)
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T, msg: &str) -> anyhow::Result<T> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| anyhow::anyhow!("{}", msg)),
        None => Ok(default),
    }
}

fn parse_flag(raw: Option<String>, default: bool, msg: &str) -> anyhow::Result<bool> {
    match raw {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => anyhow::bail!("{}", msg),
        },
        None => Ok(default),
    }
}
