//! Typed views over the classifier's kernel maps.
//!
//! These wrappers are the only userspace mutation path into the kernel
//! state. They take `Ipv4Addr` and convert to the network-byte-order `u32`
//! keys the classifier reads straight out of packets, so no caller ever
//! handles raw keys.

use std::io;
use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use aya::maps::{Array, HashMap as AyaHashMap, Map, MapData, MapError};

use ebaf_common::{ALLOW_MARKER, STAT_BLOCKED, STAT_TOTAL};

/// IPv4 address to map key (network byte order).
fn map_key(addr: Ipv4Addr) -> u32 {
    u32::from(addr).to_be()
}

/// Map key back to an IPv4 address.
fn key_addr(key: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from_be(key))
}

fn is_already_present(err: &MapError) -> bool {
    matches!(err, MapError::SyscallError(e) if e.io_error.kind() == io::ErrorKind::AlreadyExists)
}

/// The `block_set` map: IPv4 address to per-address drop counter.
pub struct BlockSet {
    map: AyaHashMap<MapData, u32, u64>,
}

impl BlockSet {
    pub fn new(map: Map) -> Result<Self> {
        let map = AyaHashMap::try_from(map).context("block_set has unexpected type")?;
        Ok(Self { map })
    }

    /// Insert an address with a zeroed counter. An address already present
    /// keeps its counter; the kernel is the only writer of counts.
    pub fn insert(&mut self, addr: Ipv4Addr) -> Result<()> {
        const BPF_NOEXIST: u64 = 1;
        match self.map.insert(map_key(addr), 0u64, BPF_NOEXIST) {
            Ok(()) => Ok(()),
            Err(err) if is_already_present(&err) => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to insert {addr} into block_set")),
        }
    }

    /// Snapshot of the drop counter for one address; 0 on miss.
    pub fn drops(&self, addr: Ipv4Addr) -> u64 {
        self.map.get(&map_key(addr), 0).unwrap_or(0)
    }

    /// Snapshot of every address currently in the set.
    pub fn addrs(&self) -> Vec<Ipv4Addr> {
        self.map
            .iter()
            .filter_map(|entry| entry.ok())
            .map(|(key, _)| key_addr(key))
            .collect()
    }
}

/// The `allow_set` map: IPv4 address to presence marker.
pub struct AllowSet {
    map: AyaHashMap<MapData, u32, u8>,
}

impl AllowSet {
    pub fn new(map: Map) -> Result<Self> {
        let map = AyaHashMap::try_from(map).context("allow_set has unexpected type")?;
        Ok(Self { map })
    }

    pub fn insert(&mut self, addr: Ipv4Addr) -> Result<()> {
        self.map
            .insert(map_key(addr), ALLOW_MARKER, 0)
            .with_context(|| format!("failed to insert {addr} into allow_set"))
    }
}

/// The 2-slot aggregate counter array.
pub struct StatsArray {
    map: Array<MapData, u64>,
}

impl StatsArray {
    pub fn new(map: Map) -> Result<Self> {
        let map = Array::try_from(map).context("stats has unexpected type")?;
        Ok(Self { map })
    }

    /// Reset both counters. Called once at load, before attach.
    pub fn zero(&mut self) -> Result<()> {
        self.map
            .set(STAT_TOTAL, 0u64, 0)
            .context("failed to zero stats[TOTAL]")?;
        self.map
            .set(STAT_BLOCKED, 0u64, 0)
            .context("failed to zero stats[BLOCKED]")?;
        Ok(())
    }

    pub fn total(&self) -> Result<u64> {
        self.map.get(&STAT_TOTAL, 0).context("failed to read stats[TOTAL]")
    }

    pub fn blocked(&self) -> Result<u64> {
        self.map
            .get(&STAT_BLOCKED, 0)
            .context("failed to read stats[BLOCKED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_key_is_network_byte_order() {
        let key = map_key(Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(key.to_ne_bytes(), [1, 2, 3, 4]);
    }

    #[test]
    fn key_addr_round_trips() {
        for addr in [
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(255, 255, 255, 255),
            Ipv4Addr::new(0, 0, 0, 0),
        ] {
            assert_eq!(key_addr(map_key(addr)), addr);
        }
    }
}
