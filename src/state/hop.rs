use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Classification of a single echo probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeOutcome {
    /// A router on the path dropped the probe (ICMP Time Exceeded)
    HopLimitExceeded(IpAddr),
    /// No matching reply before the probe timeout
    TimedOut,
    /// The destination answered (ICMP Echo Reply)
    Reached(IpAddr),
    /// Anything else: unreachable, unresolvable target, socket error
    OtherFailure,
}

/// Outcome discriminant without the responder address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeStatus {
    HopLimitExceeded,
    TimedOut,
    Reached,
    OtherFailure,
}

impl ProbeOutcome {
    pub fn status(&self) -> ProbeStatus {
        match self {
            Self::HopLimitExceeded(_) => ProbeStatus::HopLimitExceeded,
            Self::TimedOut => ProbeStatus::TimedOut,
            Self::Reached(_) => ProbeStatus::Reached,
            Self::OtherFailure => ProbeStatus::OtherFailure,
        }
    }

    /// Address that answered, present only for Time Exceeded and Echo Reply
    pub fn responder(&self) -> Option<IpAddr> {
        match self {
            Self::HopLimitExceeded(ip) | Self::Reached(ip) => Some(*ip),
            Self::TimedOut | Self::OtherFailure => None,
        }
    }
}

/// Result of one probe at a given TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ttl: u8,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn new(ttl: u8, outcome: ProbeOutcome) -> Self {
        Self { ttl, outcome }
    }

    pub fn status(&self) -> ProbeStatus {
        self.outcome.status()
    }

    pub fn responder(&self) -> Option<IpAddr> {
        self.outcome.responder()
    }
}

/// One line of trace output.
///
/// Renders as `"<ttl> * * *"` for a timed out hop, otherwise as the TTL
/// followed by each enrichment value in brackets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HopDescriptor {
    pub ttl: u8,
    fields: Option<Vec<String>>,
}

impl HopDescriptor {
    /// Descriptor for a hop that did not answer in time
    pub fn timeout(ttl: u8) -> Self {
        Self { ttl, fields: None }
    }

    /// Descriptor for a responding hop; empty values are dropped
    pub fn enriched<I, S>(ttl: u8, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(Into::into)
            .filter(|value: &String| !value.is_empty())
            .collect();
        Self {
            ttl,
            fields: Some(fields),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.fields.is_none()
    }

    /// Enrichment values in display order (`None` for a timed out hop)
    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }
}

impl fmt::Display for HopDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ttl)?;
        match &self.fields {
            None => write!(f, " * * *"),
            Some(fields) => {
                for value in fields {
                    write!(f, " [{}]", value)?;
                }
                Ok(())
            }
        }
    }
}
