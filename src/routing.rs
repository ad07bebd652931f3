//! Fixed-capacity longest-prefix-match routing table.
//!
//! The table is a flat array scanned linearly: at 256 entries a scan stays
//! in cache and beats a branching trie for this workload. Insertion order is
//! preserved except that `remove` backfills the vacated slot with the last
//! entry.

use crate::datatypes::RouteEntry;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Hard entry limit.
pub const ROUTE_TABLE_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route table full ({ROUTE_TABLE_CAPACITY} entries)")]
    Full,

    #[error("invalid mask bits {0}, must be 0..=32")]
    InvalidMask(u8),

    #[error("no such route")]
    NotFound,
}

/// Netmask for a prefix length, in host byte order.
pub fn mask_from_bits(bits: u8) -> u32 {
    match bits {
        0 => 0,
        b if b >= 32 => u32::MAX,
        b => u32::MAX << (32 - b),
    }
}

/// The routing table.
///
/// An entry's identity is its `(prefix, mask_bits)` pair as supplied by the
/// peer; two entries with the same pair cannot coexist. Lookups mask both
/// sides, so an entry installed with host bits set still matches its whole
/// network.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable {
            entries: Vec::with_capacity(ROUTE_TABLE_CAPACITY),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a route, replacing in place when an entry with the same
    /// identity already exists.
    pub fn upsert(&mut self, entry: RouteEntry) -> Result<(), RouteError> {
        if entry.mask_bits > 32 {
            return Err(RouteError::InvalidMask(entry.mask_bits));
        }

        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|e| e.prefix == entry.prefix && e.mask_bits == entry.mask_bits)
        {
            *slot = entry;
            return Ok(());
        }

        if self.entries.len() >= ROUTE_TABLE_CAPACITY {
            return Err(RouteError::Full);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove the route with the given identity, backfilling its slot with
    /// the last entry.
    pub fn remove(&mut self, prefix: Ipv4Addr, mask_bits: u8) -> Result<(), RouteError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.prefix == prefix && e.mask_bits == mask_bits)
            .ok_or(RouteError::NotFound)?;
        self.entries.swap_remove(index);
        Ok(())
    }

    /// Longest-prefix-match lookup.
    ///
    /// The winner among matching entries has the largest `mask_bits`; ties
    /// go to the smallest `metric`, then to whichever entry is scanned
    /// first.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<RouteEntry> {
        let ip = u32::from(ip);
        let mut best: Option<RouteEntry> = None;

        for entry in &self.entries {
            let mask = mask_from_bits(entry.mask_bits);
            if ip & mask != u32::from(entry.prefix) & mask {
                continue;
            }
            best = match best {
                None => Some(*entry),
                Some(b) if entry.mask_bits > b.mask_bits => Some(*entry),
                Some(b) if entry.mask_bits == b.mask_bits && entry.metric < b.metric => {
                    Some(*entry)
                }
                keep => keep,
            };
        }
        best
    }
}
