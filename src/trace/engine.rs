use rand::Rng;
use std::iter::FusedIterator;
use std::time::Duration;

use crate::config::Config;
use crate::error::TraceError;
use crate::lookup::HopEnricher;
use crate::probe::{EchoProbe, EchoRequest};
use crate::state::{HopDescriptor, ProbeOutcome, ProbeResult};
use crate::trace::enrich;

/// Drives the TTL loop: one probe per hop, classified and enriched in order
pub struct TraceEngine<P, E> {
    probe: P,
    enricher: E,
    max_ttl: u8,
    timeout: Duration,
    payload_size: usize,
    dont_fragment: bool,
}

impl<P: EchoProbe, E: HopEnricher> TraceEngine<P, E> {
    pub fn new(probe: P, enricher: E, config: &Config) -> Self {
        Self {
            probe,
            enricher,
            max_ttl: config.max_ttl,
            timeout: config.timeout,
            payload_size: config.payload_size,
            dont_fragment: config.dont_fragment,
        }
    }

    /// Start a trace to `target` (hostname or IP literal).
    ///
    /// Nothing is sent until the returned iterator is polled, and each call to
    /// `next` probes exactly one hop. Dropping the iterator stops the trace.
    pub fn trace(&mut self, target: &str) -> Trace<'_, P, E> {
        // Fresh payload per trace, reused for every hop
        let mut payload = vec![0u8; self.payload_size];
        rand::thread_rng().fill(&mut payload[..]);

        Trace {
            engine: self,
            target: target.to_string(),
            payload,
            state: TraceState::Probing(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceState {
    Probing(u8),
    Done,
}

/// Lazy sequence of hop descriptors for one target.
///
/// Yields `Err` at most once, after which the sequence is finished.
pub struct Trace<'a, P, E> {
    engine: &'a mut TraceEngine<P, E>,
    target: String,
    payload: Vec<u8>,
    state: TraceState,
}

impl<P: EchoProbe, E: HopEnricher> Trace<'_, P, E> {
    pub fn target(&self) -> &str {
        &self.target
    }

    fn probe_hop(&mut self, ttl: u8) -> ProbeResult {
        let request = EchoRequest {
            ttl,
            payload: &self.payload,
            timeout: self.engine.timeout,
            dont_fragment: self.engine.dont_fragment,
        };
        let outcome = self.engine.probe.echo(&self.target, &request);
        ProbeResult::new(ttl, outcome)
    }
}

impl<P: EchoProbe, E: HopEnricher> Iterator for Trace<'_, P, E> {
    type Item = Result<HopDescriptor, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let TraceState::Probing(ttl) = self.state else {
            return None;
        };

        let result = self.probe_hop(ttl);
        log::debug!("ttl {}: {:?}", ttl, result.outcome);

        // Advance first so every early return below leaves a consistent state
        self.state = match result.outcome {
            ProbeOutcome::HopLimitExceeded(_) | ProbeOutcome::TimedOut
                if ttl < self.engine.max_ttl =>
            {
                TraceState::Probing(ttl + 1)
            }
            _ => TraceState::Done,
        };

        let hop = match result.outcome {
            ProbeOutcome::TimedOut => Ok(HopDescriptor::timeout(ttl)),
            ProbeOutcome::HopLimitExceeded(addr) | ProbeOutcome::Reached(addr) => {
                enrich(&self.engine.enricher, ttl, addr)
            }
            ProbeOutcome::OtherFailure => {
                log::info!("trace to {} stopped at ttl {}", self.target, ttl);
                return None;
            }
        };

        if hop.is_err() {
            self.state = TraceState::Done;
        }
        Some(hop)
    }
}

impl<P: EchoProbe, E: HopEnricher> FusedIterator for Trace<'_, P, E> {}
