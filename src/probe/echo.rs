use anyhow::{Result, anyhow, bail};
use std::net::{IpAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::probe::{
    ProbeSockets, build_echo_request, get_identifier, is_timeout, open_probe_sockets,
    parse_icmp_response, recv_icmp, send_icmp, set_dont_fragment, set_ttl,
};
use crate::state::ProbeOutcome;

/// Parameters for a single echo probe
#[derive(Debug, Clone, Copy)]
pub struct EchoRequest<'a> {
    pub ttl: u8,
    pub payload: &'a [u8],
    pub timeout: Duration,
    pub dont_fragment: bool,
}

/// Sends one hop-limited echo request and classifies the answer.
///
/// Implementations block until a reply arrives or `request.timeout` passes.
/// Failures of any kind (unresolvable target, socket errors, ICMP errors
/// other than TTL exceeded) are reported as [`ProbeOutcome::OtherFailure`].
pub trait EchoProbe {
    fn echo(&mut self, target: &str, request: &EchoRequest<'_>) -> ProbeOutcome;
}

impl<T: EchoProbe + ?Sized> EchoProbe for &mut T {
    fn echo(&mut self, target: &str, request: &EchoRequest<'_>) -> ProbeOutcome {
        (**self).echo(target, request)
    }
}

/// Echo probe over ICMPv4 sockets
pub struct IcmpProbe {
    sockets: ProbeSockets,
    identifier: u16,
    sequence: u16,
    /// Last resolved target (`None` address = resolution failed)
    resolved: Option<(String, Option<IpAddr>)>,
}

impl IcmpProbe {
    pub fn new() -> Result<Self> {
        let sockets = open_probe_sockets()?;
        if sockets.send.is_dgram {
            log::debug!("sending on DGRAM ICMP socket; kernel assigns the echo identifier");
        }

        Ok(Self {
            sockets,
            identifier: get_identifier(),
            sequence: rand::random(),
            resolved: None,
        })
    }

    /// Identifier to match replies against (`None` when the kernel picks it)
    fn match_identifier(&self) -> Option<u16> {
        if self.sockets.send.is_dgram {
            None
        } else {
            Some(self.identifier)
        }
    }

    fn resolve(&mut self, target: &str) -> Option<IpAddr> {
        if let Some((ref name, ip)) = self.resolved
            && name == target
        {
            return ip;
        }

        let ip = match resolve_target(target) {
            Ok(ip) => Some(ip),
            Err(e) => {
                log::debug!("failed to resolve {}: {}", target, e);
                None
            }
        };
        self.resolved = Some((target.to_string(), ip));
        ip
    }

    fn send_probe(&mut self, target: IpAddr, request: &EchoRequest<'_>) -> Result<u16> {
        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;

        let socket = &self.sockets.send.socket;
        set_ttl(socket, request.ttl)?;
        set_dont_fragment(socket, request.dont_fragment)?;

        let packet = build_echo_request(self.identifier, sequence, request.payload)?;
        send_icmp(socket, &packet, target)?;
        Ok(sequence)
    }

    fn await_reply(&self, sequence: u16, timeout: Duration) -> Result<ProbeOutcome> {
        let deadline = Instant::now() + timeout;
        let identifier = self.match_identifier();
        let recv = self.sockets.recv();
        let mut buffer = [0u8; 1500];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ProbeOutcome::TimedOut);
            }

            match recv_icmp(&recv.socket, &mut buffer, remaining) {
                Ok(result) => {
                    let Some(parsed) = parse_icmp_response(
                        &buffer[..result.len],
                        result.source,
                        identifier,
                        recv.is_dgram,
                    ) else {
                        continue;
                    };

                    if parsed.sequence == sequence {
                        return Ok(parsed.response_type.outcome(parsed.responder));
                    }

                    // Late reply to an earlier hop that already timed out
                    log::trace!(
                        "ignoring reply for sequence {} from {} (waiting for {})",
                        parsed.sequence,
                        parsed.responder,
                        sequence
                    );
                }
                Err(e) if is_timeout(&e) => return Ok(ProbeOutcome::TimedOut),
                Err(e) => return Err(e),
            }
        }
    }
}

impl EchoProbe for IcmpProbe {
    fn echo(&mut self, target: &str, request: &EchoRequest<'_>) -> ProbeOutcome {
        let Some(target_ip) = self.resolve(target) else {
            return ProbeOutcome::OtherFailure;
        };

        let sequence = match self.send_probe(target_ip, request) {
            Ok(sequence) => sequence,
            Err(e) => {
                log::warn!("failed to send probe with TTL {}: {}", request.ttl, e);
                return ProbeOutcome::OtherFailure;
            }
        };

        match self.await_reply(sequence, request.timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("failed to receive reply for TTL {}: {}", request.ttl, e);
                ProbeOutcome::OtherFailure
            }
        }
    }
}

/// Resolve a hostname or IPv4 literal to an IPv4 address
pub fn resolve_target(target: &str) -> Result<IpAddr> {
    // Try parsing as IP address first
    if let Ok(ip) = target.parse::<IpAddr>() {
        if ip.is_ipv6() {
            bail!("IPv6 targets are not supported: {}", ip);
        }
        return Ok(ip);
    }

    // Resolve hostname
    format!("{}:0", target)
        .to_socket_addrs()?
        .map(|s| s.ip())
        .find(|ip| ip.is_ipv4())
        .ok_or_else(|| anyhow!("No IPv4 addresses found for {}", target))
}
