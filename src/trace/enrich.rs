use std::net::IpAddr;

use crate::error::TraceError;
use crate::lookup::HopEnricher;
use crate::state::HopDescriptor;

/// Build the descriptor for a responding hop from its lookup record.
///
/// Lookup failures are returned unchanged; there is no fallback descriptor.
pub fn enrich<E: HopEnricher + ?Sized>(
    enricher: &E,
    ttl: u8,
    addr: IpAddr,
) -> Result<HopDescriptor, TraceError> {
    let info = enricher.lookup(addr)?;
    Ok(HopDescriptor::enriched(ttl, info.fields()))
}
