use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::IpAddr;

use crate::state::ProbeOutcome;

// IP protocol numbers
const IPPROTO_ICMP: u8 = 1;

// ICMP Echo Request type (for error payload validation)
const ICMP_ECHO_REQUEST: u8 = 8;

/// Time Exceeded code for "TTL exceeded in transit"
const TTL_EXCEEDED_IN_TRANSIT: u8 = 0;

/// ICMP message kinds we correlate to our probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpResponseType {
    EchoReply,
    TimeExceeded(u8),
    DestUnreachable(u8),
}

impl IcmpResponseType {
    /// Map a correlated response to a probe outcome
    pub fn outcome(self, responder: IpAddr) -> ProbeOutcome {
        match self {
            Self::EchoReply => ProbeOutcome::Reached(responder),
            Self::TimeExceeded(TTL_EXCEEDED_IN_TRANSIT) => ProbeOutcome::HopLimitExceeded(responder),
            // Fragment reassembly timeouts and unreachables end the trace
            Self::TimeExceeded(_) | Self::DestUnreachable(_) => ProbeOutcome::OtherFailure,
        }
    }
}

/// Parsed ICMP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub responder: IpAddr,
    /// Sequence number of the echo request this answers
    pub sequence: u16,
    pub response_type: IcmpResponseType,
}

/// Calculate ICMP checksum (RFC 1071)
/// Returns true if checksum is valid (sums to 0xFFFF or 0x0000 after folding)
pub(crate) fn validate_icmp_checksum(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    let mut sum: u32 = 0;

    // Sum 16-bit words
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }

    // Handle odd byte
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum == 0xFFFF || sum == 0x0000
}

/// Parse an ICMP response and correlate it to our probe
///
/// When `is_dgram` is true, the packet starts directly at the ICMP header
/// (no IP header, as returned by DGRAM sockets).
///
/// `our_identifier` is `None` when the kernel picks the echo identifier
/// (DGRAM send sockets), in which case only the sequence is used to match.
///
/// Returns None if:
/// - Packet is malformed
/// - Packet is not a response to our probe (wrong identifier)
/// - ICMP checksum is invalid (for Echo Reply only)
pub fn parse_icmp_response(
    data: &[u8],
    responder: IpAddr,
    our_identifier: Option<u16>,
    is_dgram: bool,
) -> Option<ParsedResponse> {
    if data.is_empty() {
        return None;
    }

    let icmp_data = if is_dgram {
        data
    } else {
        let ip_packet = Ipv4Packet::new(data)?;
        let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
        data.get(ip_header_len..)?
    };

    parse_icmp_message(icmp_data, responder, our_identifier)
}

fn identifier_matches(identifier: u16, our_identifier: Option<u16>) -> bool {
    our_identifier.is_none_or(|ours| ours == identifier)
}

/// Parse an ICMPv4 message starting at its header
fn parse_icmp_message(
    icmp_data: &[u8],
    responder: IpAddr,
    our_identifier: Option<u16>,
) -> Option<ParsedResponse> {
    if icmp_data.len() < 8 {
        return None;
    }

    let icmp_packet = IcmpPacket::new(icmp_data)?;
    let code = icmp_packet.get_icmp_code().0;

    let response_type = match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            // Validate ICMP checksum for Echo Reply
            if !validate_icmp_checksum(icmp_data) {
                return None;
            }

            // Echo Reply: identifier and sequence are in bytes 4-7
            let identifier = u16::from_be_bytes([icmp_data[4], icmp_data[5]]);
            let sequence = u16::from_be_bytes([icmp_data[6], icmp_data[7]]);

            if !identifier_matches(identifier, our_identifier) {
                return None;
            }

            return Some(ParsedResponse {
                responder,
                sequence,
                response_type: IcmpResponseType::EchoReply,
            });
        }
        IcmpTypes::TimeExceeded => IcmpResponseType::TimeExceeded(code),
        IcmpTypes::DestinationUnreachable => IcmpResponseType::DestUnreachable(code),
        _ => return None,
    };

    let sequence = parse_quoted_echo_request(icmp_data, our_identifier)?;
    Some(ParsedResponse {
        responder,
        sequence,
        response_type,
    })
}

/// Extract the sequence of our echo request from an ICMP error payload
fn parse_quoted_echo_request(icmp_data: &[u8], our_identifier: Option<u16>) -> Option<u16> {
    // ICMP error format:
    // [0]    Type
    // [1]    Code
    // [2-3]  Checksum
    // [4-7]  Unused
    // [8..]  Original IP header + first 8 bytes of original payload

    if icmp_data.len() < 8 + 20 + 8 {
        // Need at least ICMP header + IP header + 8 bytes of original payload
        return None;
    }

    let original_ip_data = &icmp_data[8..];
    let original_ip = Ipv4Packet::new(original_ip_data)?;
    let orig_ihl = (original_ip.get_header_length() as usize) * 4;

    if original_ip.get_next_level_protocol().0 != IPPROTO_ICMP {
        return None;
    }
    if original_ip_data.len() < orig_ihl + 8 {
        return None;
    }

    // Original packet: [0] type, [1] code, [2-3] checksum, [4-5] identifier, [6-7] sequence
    let original_payload = &original_ip_data[orig_ihl..];
    if original_payload[0] != ICMP_ECHO_REQUEST {
        return None;
    }

    let identifier = u16::from_be_bytes([original_payload[4], original_payload[5]]);
    if !identifier_matches(identifier, our_identifier) {
        return None;
    }

    Some(u16::from_be_bytes([original_payload[6], original_payload[7]]))
}
