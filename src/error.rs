use std::net::IpAddr;
use thiserror::Error;

/// Errors that end a trace early
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("lookup request for {ip} failed: {source}")]
    Http {
        ip: IpAddr,
        #[source]
        source: reqwest::Error,
    },
    #[error("lookup for {ip} returned HTTP {status}")]
    Status {
        ip: IpAddr,
        status: reqwest::StatusCode,
    },
    #[error("malformed lookup response for {ip}: {source}")]
    Decode {
        ip: IpAddr,
        #[source]
        source: serde_json::Error,
    },
}

impl TraceError {
    /// Address whose lookup failed
    pub fn ip(&self) -> IpAddr {
        match self {
            Self::Http { ip, .. } | Self::Status { ip, .. } | Self::Decode { ip, .. } => *ip,
        }
    }
}
