//! In-memory store of domains scheduled for periodic resolution.
//!
//! One mutex guards the whole registry; every operation takes it for its
//! full duration, so no entry is freed or moved while another caller is
//! traversing. Entries live for the process lifetime.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// Upper bound on registered domains.
pub const MAX_DOMAINS: usize = 10_000;

/// Returned by [`DomainRegistry::add`] when the registry is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain registry is full ({MAX_DOMAINS} entries)")
    }
}

impl std::error::Error for RegistryFull {}

struct DomainEntry {
    name: String,
    resolved_ips: Vec<Ipv4Addr>,
    drop_count: u64,
}

pub struct DomainRegistry {
    entries: Mutex<Vec<DomainEntry>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a domain. Adding a name that is already present is a no-op.
    pub fn add(&self, name: &str) -> Result<(), RegistryFull> {
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        if entries.iter().any(|entry| entry.name == name) {
            return Ok(());
        }
        if entries.len() >= MAX_DOMAINS {
            return Err(RegistryFull);
        }
        entries.push(DomainEntry {
            name: name.to_string(),
            resolved_ips: Vec::new(),
            drop_count: 0,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry mutex poisoned").len()
    }

    /// Registered names in insertion order. Cloned out so callers resolve
    /// without holding the lock.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Append newly resolved addresses to a domain's IP list, deduplicated.
    /// Unknown names are ignored.
    pub fn record_ips(&self, name: &str, ips: &[Ipv4Addr]) {
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        if let Some(entry) = entries.iter_mut().find(|entry| entry.name == name) {
            for ip in ips {
                if !entry.resolved_ips.contains(ip) {
                    entry.resolved_ips.push(*ip);
                }
            }
        }
    }

    /// Last rolled-up drop count for a domain; 0 for unknown names.
    #[allow(dead_code)]
    pub fn drops_for(&self, name: &str) -> u64 {
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.drop_count)
            .unwrap_or(0)
    }

    /// Re-aggregate each domain's drop count by summing the per-address
    /// counters of its resolved IPs. `drops` is the block-set lookup; it
    /// must not block.
    pub fn update_drops<F>(&self, drops: F)
    where
        F: Fn(Ipv4Addr) -> u64,
    {
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        for entry in entries.iter_mut() {
            entry.drop_count = entry
                .resolved_ips
                .iter()
                .map(|ip| drops(*ip))
                .fold(0u64, u64::saturating_add);
        }
    }

    /// `(name, drop_count)` rows for every domain with non-zero drops, in
    /// registration order.
    pub fn snapshot_for_export(&self) -> Vec<(String, u64)> {
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .filter(|entry| entry.drop_count > 0)
            .map(|entry| (entry.name.clone(), entry.drop_count))
            .collect()
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn add_is_idempotent() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.add("ads.example.com").unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn add_reports_full_at_capacity() {
        let registry = DomainRegistry::new();
        for i in 0..MAX_DOMAINS {
            registry.add(&format!("host{i}.example.com")).unwrap();
        }
        assert_eq!(registry.add("one-more.example.com"), Err(RegistryFull));
        // Re-adding an existing name still succeeds when full.
        assert_eq!(registry.add("host0.example.com"), Ok(()));
        assert_eq!(registry.len(), MAX_DOMAINS);
    }

    #[test]
    fn record_ips_deduplicates() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.record_ips("ads.example.com", &[addr(1), addr(2)]);
        registry.record_ips("ads.example.com", &[addr(2), addr(3)]);

        let mut drops = HashMap::new();
        drops.insert(addr(1), 1u64);
        drops.insert(addr(2), 1u64);
        drops.insert(addr(3), 1u64);
        registry.update_drops(|ip| drops.get(&ip).copied().unwrap_or(0));
        assert_eq!(registry.drops_for("ads.example.com"), 3);
    }

    #[test]
    fn record_ips_ignores_unknown_names() {
        let registry = DomainRegistry::new();
        registry.record_ips("never-added.example.com", &[addr(1)]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn update_drops_sums_per_address_counters() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.add("idle.example.com").unwrap();
        registry.record_ips("ads.example.com", &[addr(1), addr(2)]);
        registry.record_ips("idle.example.com", &[addr(3)]);

        registry.update_drops(|ip| match ip {
            ip if ip == addr(1) => 5,
            ip if ip == addr(2) => 7,
            _ => 0,
        });

        assert_eq!(registry.drops_for("ads.example.com"), 12);
        assert_eq!(registry.drops_for("idle.example.com"), 0);
        assert_eq!(registry.drops_for("unknown.example.com"), 0);
    }

    #[test]
    fn snapshot_filters_zero_drop_domains() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.add("idle.example.com").unwrap();
        registry.record_ips("ads.example.com", &[addr(1)]);
        registry.update_drops(|_| 9);

        let rows = registry.snapshot_for_export();
        assert_eq!(rows, vec![("ads.example.com".to_string(), 9)]);
    }

    #[test]
    fn update_drops_saturates_instead_of_overflowing() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.record_ips("ads.example.com", &[addr(1), addr(2)]);
        registry.update_drops(|_| u64::MAX);
        assert_eq!(registry.drops_for("ads.example.com"), u64::MAX);
    }
}
