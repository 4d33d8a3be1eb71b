//! Network slot allocation.
//!
//! Allocation is a pure scan over the slots recorded by existing sandboxes.
//! Nothing is reserved: the slot only counts as used once the caller persists
//! its record. Two concurrent `up` invocations can therefore observe the same
//! free slot and both persist it. Closing that race needs a lock file or a
//! reservation record held from allocation until the record is written.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::error::CorralError;

/// Inclusive range of assignable slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotRange {
    pub lo: u8,
    pub hi: u8,
}

impl SlotRange {
    pub fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub fn contains(self, slot: u8) -> bool {
        (self.lo..=self.hi).contains(&slot)
    }
}

/// Returns the lowest slot in `range` not present in `in_use`.
pub(crate) fn allocate(range: SlotRange, in_use: &BTreeSet<u8>) -> Result<u8, CorralError> {
    (range.lo..=range.hi)
        .find(|slot| !in_use.contains(slot))
        .ok_or(CorralError::AllocationExhausted {
            lo: range.lo,
            hi: range.hi,
        })
}

/// Addresses derived from a slot: `<prefix>.<slot>.1` on the host side and
/// `<prefix>.<slot>.2` inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotAddresses {
    pub host: Ipv4Addr,
    pub guest: Ipv4Addr,
}

impl SlotAddresses {
    /// Fails when `subnet_prefix` is not two dotted octets.
    pub fn new(subnet_prefix: &str, slot: u8) -> Result<Self, CorralError> {
        let (a, b) = parse_prefix(subnet_prefix)?;
        Ok(Self {
            host: Ipv4Addr::new(a, b, slot, 1),
            guest: Ipv4Addr::new(a, b, slot, 2),
        })
    }
}

/// Parses a `a.b` subnet prefix.
pub(crate) fn parse_prefix(subnet_prefix: &str) -> Result<(u8, u8), CorralError> {
    let invalid = || {
        CorralError::config(format!(
            "subnet_prefix must be two octets like \"10.233\", got \"{subnet_prefix}\""
        ))
    };
    let (a, b) = subnet_prefix.split_once('.').ok_or_else(invalid)?;
    Ok((
        a.parse().map_err(|_| invalid())?,
        b.parse().map_err(|_| invalid())?,
    ))
}
