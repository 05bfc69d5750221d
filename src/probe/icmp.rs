use anyhow::{Result, anyhow};
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes, checksum};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;

/// Get process identifier for ICMP identification field
pub fn get_identifier() -> u16 {
    std::process::id() as u16
}

/// Build an ICMPv4 Echo Request carrying `payload` verbatim
pub fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload.len()];

    {
        let mut packet = MutableEchoRequestPacket::new(&mut buffer)
            .ok_or_else(|| anyhow!("Echo request buffer too small"))?;
        packet.set_icmp_type(IcmpTypes::EchoRequest);
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);
        packet.set_payload(payload);
    }

    // Checksum covers header and payload, computed with the field zeroed
    let cksum = IcmpPacket::new(&buffer)
        .map(|icmp| checksum(&icmp))
        .ok_or_else(|| anyhow!("Echo request buffer too small"))?;
    buffer[2..4].copy_from_slice(&cksum.to_be_bytes());

    Ok(buffer)
}
