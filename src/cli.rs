use clap::{ArgAction, Parser};
use std::time::Duration;

/// Upper bound for `--lookup-timeout`, in seconds
pub const MAX_LOOKUP_TIMEOUT_SECS: f64 = 300.0;

/// True if `url` uses a scheme the lookup client can talk to
pub fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Traceroute that annotates every hop with ipinfo.io metadata
#[derive(Parser, Debug, Clone)]
#[command(name = "hoptrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host to trace (IP address or hostname)
    pub target: Option<String>,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-hops", default_value = "30")]
    pub max_hops: u8,

    /// Probe timeout in milliseconds
    #[arg(long = "timeout", default_value = "100")]
    pub timeout_ms: u64,

    /// Echo payload size in bytes
    #[arg(long = "psize", default_value = "32")]
    pub payload_size: usize,

    /// Allow probes to be fragmented (clears the DF flag)
    #[arg(long = "no-df")]
    pub no_df: bool,

    /// Lookup request timeout in seconds
    #[arg(long = "lookup-timeout", default_value = "5")]
    pub lookup_timeout: f64,

    /// Base URL of the ipinfo-compatible lookup service
    #[arg(long = "lookup-url")]
    pub lookup_url: Option<String>,

    /// ipinfo.io API token (falls back to IPINFO_TOKEN)
    #[arg(long = "token")]
    pub token: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Get probe timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get lookup timeout as Duration
    /// Out-of-range values are clamped; `validate` rejects them first
    pub fn lookup_timeout_duration(&self) -> Duration {
        let secs = self.lookup_timeout.clamp(0.0, MAX_LOOKUP_TIMEOUT_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(5))
    }

    /// Log filter implied by -v flags
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref target) = self.target
            && target.trim().is_empty()
        {
            return Err("Target cannot be empty".into());
        }

        if self.max_hops == 0 {
            return Err("Max hops must be at least 1".into());
        }

        // Upper bound to keep a worst-case trace short
        const MAX_SAFE_TTL: u8 = 64;
        if self.max_hops > MAX_SAFE_TTL {
            return Err(format!("Max hops cannot exceed {}", MAX_SAFE_TTL));
        }

        if self.timeout_ms == 0 {
            return Err("Timeout must be positive".into());
        }

        const MIN_PAYLOAD: usize = 8;
        const MAX_PAYLOAD: usize = 1400;
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&self.payload_size) {
            return Err(format!(
                "Payload size must be between {} and {} bytes",
                MIN_PAYLOAD, MAX_PAYLOAD
            ));
        }

        if !self.lookup_timeout.is_finite() || self.lookup_timeout <= 0.0 {
            return Err("Lookup timeout must be positive".into());
        }
        if self.lookup_timeout > MAX_LOOKUP_TIMEOUT_SECS {
            return Err(format!(
                "Lookup timeout cannot exceed {} seconds",
                MAX_LOOKUP_TIMEOUT_SECS
            ));
        }

        if let Some(ref url) = self.lookup_url
            && !is_http_url(url)
        {
            return Err(format!("Lookup URL must start with http:// or https://: {}", url));
        }

        Ok(())
    }
}
