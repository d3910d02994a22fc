//! Background resolution loop.
//!
//! One iteration re-resolves every registered domain into the block-set,
//! runs the two whitelist passes into the allow-set, then rolls drop counts
//! up into the registry. The allow-set is only ever added to; precedence is
//! enforced by the classifier's rule order, never by removing block entries.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{debug, info};

use crate::maps::{AllowSet, BlockSet};
use crate::registry::DomainRegistry;

/// Time between resolver iterations.
pub const RESOLUTION_INTERVAL: Duration = Duration::from_secs(600);

/// Largest single sleep, so a shutdown signal is observed promptly.
const SLEEP_SLICE: Duration = Duration::from_secs(1);

pub struct Resolver {
    registry: Arc<DomainRegistry>,
    block_set: BlockSet,
    allow_set: AllowSet,
    /// Domain entries as read from the blacklist file. Kept separately from
    /// the registry so the whitelist precedence pass covers entries the
    /// registry had no room for.
    blacklist_domains: Vec<String>,
    patterns: Vec<Pattern>,
}

impl Resolver {
    pub fn new(
        registry: Arc<DomainRegistry>,
        block_set: BlockSet,
        allow_set: AllowSet,
        blacklist_domains: Vec<String>,
        patterns: Vec<Pattern>,
    ) -> Self {
        Self {
            registry,
            block_set,
            allow_set,
            blacklist_domains,
            patterns,
        }
    }

    /// Snapshot of every address currently in the block-set.
    pub fn blocked_addrs(&self) -> Vec<Ipv4Addr> {
        self.block_set.addrs()
    }

    /// Loop until `running` clears. Each pass through resolves everything,
    /// then sleeps [`RESOLUTION_INTERVAL`] in 1-second slices.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            self.run_iteration();
            sleep_sliced(&running, RESOLUTION_INTERVAL);
        }
        debug!("resolver thread exiting");
    }

    /// One complete pass: blacklist resolution, the two whitelist passes,
    /// then the drop-count rollup.
    pub fn run_iteration(&mut self) {
        let mut new_ips = 0usize;
        for name in self.registry.names() {
            match resolve_ipv4(&name) {
                Ok(ips) => {
                    self.registry.record_ips(&name, &ips);
                    for ip in ips {
                        match self.block_set.insert(ip) {
                            Ok(()) => new_ips += 1,
                            Err(err) => debug!("block_set insert for {name}: {err:#}"),
                        }
                    }
                }
                // Transient failures leave the entry registered for the
                // next iteration.
                Err(err) => debug!("failed to resolve {name}: {err}"),
            }
        }

        // Allow-set precedence: blacklisted domains matching a whitelist
        // pattern land in both sets, and the classifier lets allow win.
        for name in &self.blacklist_domains {
            if whitelist_matches(&self.patterns, name) {
                allow_domain(&mut self.allow_set, name);
            }
        }

        // Wildcard-free patterns are exact domains; resolve them directly.
        for pattern in &self.patterns {
            if !has_wildcard(pattern.as_str()) {
                allow_domain(&mut self.allow_set, pattern.as_str());
            }
        }

        let block_set = &self.block_set;
        self.registry.update_drops(|ip| block_set.drops(ip));

        debug!("resolver iteration done, {new_ips} block-set inserts");
    }
}

/// Resolve a name through the host resolver, keeping IPv4 results only.
pub fn resolve_ipv4(name: &str) -> io::Result<Vec<Ipv4Addr>> {
    let addrs = dns_lookup::lookup_host(name)?;
    Ok(addrs
        .into_iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect())
}

fn allow_domain(allow_set: &mut AllowSet, name: &str) {
    match resolve_ipv4(name) {
        Ok(ips) => {
            for ip in ips {
                match allow_set.insert(ip) {
                    Ok(()) => info!("whitelisted {ip} from {name}"),
                    Err(err) => debug!("allow_set insert for {name}: {err:#}"),
                }
            }
        }
        Err(err) => debug!("failed to resolve whitelisted {name}: {err}"),
    }
}

/// Shell-glob match of a domain against the whitelist patterns.
pub fn whitelist_matches(patterns: &[Pattern], name: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(name))
}

/// Whether a pattern contains glob metacharacters. Anything without is an
/// exact domain.
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Sleep `total`, waking at least once a second to observe `running`.
pub fn sleep_sliced(running: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while running.load(Ordering::Relaxed) && !remaining.is_zero() {
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

/// Spawn the resolver on its own named thread.
pub fn spawn(resolver: Resolver, running: Arc<AtomicBool>) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("resolver".to_string())
        .spawn(move || resolver.run(running))
        .context("failed to spawn resolver thread")
}
