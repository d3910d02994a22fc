#![no_std]

// Map layout shared between the userspace agent and the XDP classifier.
// Keep this crate `no_std` friendly so it can be used from eBPF code.

/// Name of the classifier program symbol in the compiled object.
pub const PROG_XDP_BLOCKER: &str = "xdp_blocker";

/// Map symbol names as they appear in the object file.
pub const MAP_BLOCK_SET: &str = "block_set";
pub const MAP_ALLOW_SET: &str = "allow_set";
pub const MAP_STATS: &str = "stats";

/// Capacity of the block-set. The map is LRU so a long-running resolver
/// discovering transient IPs evicts old entries instead of exhausting
/// kernel memory.
pub const BLOCK_SET_CAPACITY: u32 = 10_000;

/// Capacity of the allow-set, matching the block-set.
pub const ALLOW_SET_CAPACITY: u32 = 10_000;

/// Slots in the aggregate `stats` array.
pub const STAT_SLOTS: u32 = 2;
/// Index of the total-packets counter.
pub const STAT_TOTAL: u32 = 0;
/// Index of the blocked-packets counter.
pub const STAT_BLOCKED: u32 = 1;

/// Marker value stored for allow-set members.
pub const ALLOW_MARKER: u8 = 1;
