//! Hop enrichment via ipinfo.io
//!
//! Fetches `{base}/{ip}/json` and keeps the six fields shown in trace output.

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use super::sanitize_display;
use crate::config::Config;
use crate::error::TraceError;

/// Default lookup endpoint
pub const DEFAULT_BASE_URL: &str = "http://ipinfo.io";

/// Subset of the ipinfo.io response used for hop descriptors.
///
/// Any other keys in the response (`loc`, `postal`, `timezone`, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub org: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl IpInfo {
    /// Present, non-empty values in display order:
    /// address, hostname, organization, country, region, city
    pub fn fields(&self) -> Vec<&str> {
        [
            &self.ip,
            &self.hostname,
            &self.org,
            &self.country,
            &self.region,
            &self.city,
        ]
        .into_iter()
        .filter_map(|value| value.as_deref())
        .filter(|value| !value.is_empty())
        .collect()
    }

    fn sanitized(self) -> Self {
        let clean = |value: Option<String>| value.map(|s| sanitize_display(&s));
        Self {
            ip: clean(self.ip),
            hostname: clean(self.hostname),
            org: clean(self.org),
            country: clean(self.country),
            region: clean(self.region),
            city: clean(self.city),
        }
    }
}

/// Source of per-hop metadata
pub trait HopEnricher {
    /// Fetch metadata for a responding address (blocking)
    fn lookup(&self, ip: IpAddr) -> Result<IpInfo, TraceError>;
}

impl<T: HopEnricher + ?Sized> HopEnricher for &T {
    fn lookup(&self, ip: IpAddr) -> Result<IpInfo, TraceError> {
        (**self).lookup(ip)
    }
}

/// ipinfo.io client with a per-IP cache
pub struct IpInfoLookup {
    client: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
    cache: RwLock<HashMap<IpAddr, IpInfo>>,
}

impl IpInfoLookup {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(format!("hoptrace/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.lookup_base_url,
            config.lookup_token.clone(),
            config.lookup_timeout,
        )
    }

    /// Request URL for an address (without the token query)
    pub fn url_for(&self, ip: IpAddr) -> String {
        format!("{}/{}/json", self.base_url, ip)
    }

    /// Perform the actual HTTP request
    fn fetch(&self, ip: IpAddr) -> Result<IpInfo, TraceError> {
        let mut request = self.client.get(self.url_for(ip));
        if let Some(ref token) = self.token {
            request = request.query(&[("token", token)]);
        }

        let response = request
            .send()
            .map_err(|source| TraceError::Http { ip, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TraceError::Status { ip, status });
        }

        let body = response
            .text()
            .map_err(|source| TraceError::Http { ip, source })?;
        let info: IpInfo =
            serde_json::from_str(&body).map_err(|source| TraceError::Decode { ip, source })?;

        Ok(info.sanitized())
    }
}

impl HopEnricher for IpInfoLookup {
    fn lookup(&self, ip: IpAddr) -> Result<IpInfo, TraceError> {
        // Check cache first
        if let Some(info) = self.cache.read().get(&ip) {
            return Ok(info.clone());
        }

        log::debug!("looking up {}", self.url_for(ip));
        let info = self.fetch(ip)?;

        // Failures are not cached; the trace stops on the first one anyway
        self.cache.write().insert(ip, info.clone());
        Ok(info)
    }
}
