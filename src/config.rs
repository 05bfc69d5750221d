use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cli::{Args, is_http_url};
use crate::lookup::DEFAULT_BASE_URL;
use crate::prefs::Prefs;

/// Runtime configuration for a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum TTL (hops)
    pub max_ttl: u8,
    /// Per-probe timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Echo payload size in bytes
    pub payload_size: usize,
    /// Set the Don't Fragment flag on probes
    pub dont_fragment: bool,
    /// Timeout for each enrichment request
    #[serde(with = "duration_serde")]
    pub lookup_timeout: Duration,
    /// Base URL of the ipinfo-compatible lookup service
    pub lookup_base_url: String,
    /// Optional ipinfo.io API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_ttl: 30,
            timeout: Duration::from_millis(100),
            payload_size: 32,
            dont_fragment: true,
            lookup_timeout: Duration::from_secs(5),
            lookup_base_url: DEFAULT_BASE_URL.to_string(),
            lookup_token: None,
        }
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            max_ttl: args.max_hops,
            timeout: args.timeout_duration(),
            payload_size: args.payload_size,
            dont_fragment: !args.no_df,
            lookup_timeout: args.lookup_timeout_duration(),
            lookup_base_url: args
                .lookup_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            lookup_token: args.token.clone(),
        }
    }
}

impl Config {
    /// Fill lookup settings not given on the command line.
    ///
    /// Token precedence: CLI flag > `env_token` (IPINFO_TOKEN) > preferences file.
    /// The base URL from preferences only applies when `--lookup-url` was not given.
    pub fn with_prefs(mut self, args: &Args, prefs: &Prefs, env_token: Option<String>) -> Self {
        if self.lookup_token.is_none() {
            self.lookup_token = env_token
                .filter(|t| !t.is_empty())
                .or_else(|| prefs.ipinfo_token.clone());
        }
        if args.lookup_url.is_none()
            && let Some(ref url) = prefs.lookup_base_url
        {
            if is_http_url(url) {
                self.lookup_base_url = url.clone();
            } else {
                log::warn!("Ignoring lookup_base_url from preferences, not http(s): {}", url);
            }
        }
        self
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
