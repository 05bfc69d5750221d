// Public API - trace engine and its collaborators
pub mod config;
pub mod error;
pub mod lookup;
pub mod probe;
pub mod state;
pub mod trace;

// Command-line surface shared with the binary
pub mod cli;
pub mod prefs;

pub use config::Config;
pub use error::TraceError;
pub use lookup::{HopEnricher, IpInfo, IpInfoLookup};
pub use probe::{EchoProbe, EchoRequest, IcmpProbe};
pub use state::{HopDescriptor, ProbeOutcome, ProbeResult, ProbeStatus};
pub use trace::{Trace, TraceEngine};
