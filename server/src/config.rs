use std::time::Duration;

/// Runtime settings, read from the environment with fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Live games untouched for this long are evicted from memory.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Evicted games stay in the session cache this long for fast reloads.
    pub cache_ttl: Duration,
    /// Unmatched matchmaking entries expire after this long.
    pub queue_ttl: Duration,
    pub default_rating: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            idle_timeout: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
            cache_ttl: Duration::from_secs(2 * 60 * 60),
            queue_ttl: Duration::from_secs(15 * 60),
            default_rating: 1500,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            idle_timeout: secs("GAMMON_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            sweep_interval: secs("GAMMON_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            cache_ttl: secs("GAMMON_CACHE_TTL_SECS", defaults.cache_ttl),
            queue_ttl: secs("GAMMON_QUEUE_TTL_SECS", defaults.queue_ttl),
            default_rating: lookup("GAMMON_DEFAULT_RATING")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_rating),
        }
    }
}
