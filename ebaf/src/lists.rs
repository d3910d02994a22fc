//! Blacklist and whitelist file parsing.
//!
//! Both files share one grammar: one entry per line, `#` starts a comment,
//! the first whitespace-delimited token is the entry. Blacklist entries are
//! IPv4 literals or domain names; whitelist entries are glob patterns.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use glob::Pattern;
use tracing::{debug, info, warn};

const BLACKLIST_PATHS: [&str; 2] = [
    "spotify-blacklist.txt",
    "/usr/local/share/ebaf/spotify-blacklist.txt",
];

const WHITELIST_PATHS: [&str; 2] = [
    "spotify-whitelist.txt",
    "/usr/local/share/ebaf/spotify-whitelist.txt",
];

/// Longest accepted domain entry, matching the DNS name length limit.
const DOMAIN_MAX_LEN: usize = 255;

/// Everything the list files yield: a static IP seed, the domains to keep
/// re-resolving, and the whitelist patterns.
pub struct ListSources {
    pub seed_ips: Vec<Ipv4Addr>,
    pub domains: Vec<String>,
    pub patterns: Vec<Pattern>,
}

impl ListSources {
    /// Load both lists from their search paths. A missing blacklist is
    /// fatal; a missing whitelist is an empty pattern list.
    pub fn discover() -> Result<Self> {
        let blacklist_path = first_existing(&BLACKLIST_PATHS).ok_or_else(|| {
            anyhow!(
                "no blacklist file found (searched {})",
                BLACKLIST_PATHS.join(", ")
            )
        })?;
        let contents = fs::read_to_string(&blacklist_path)
            .with_context(|| format!("failed to read {}", blacklist_path.display()))?;
        let (seed_ips, domains) = parse_blacklist(&contents);
        info!(
            "loaded blacklist from {}: {} IP literals, {} domains",
            blacklist_path.display(),
            seed_ips.len(),
            domains.len()
        );

        let patterns = match first_existing(&WHITELIST_PATHS) {
            Some(path) => {
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let patterns = parse_whitelist(&contents);
                info!(
                    "loaded whitelist from {}: {} patterns",
                    path.display(),
                    patterns.len()
                );
                patterns
            }
            None => {
                warn!("no whitelist file found, continuing with an empty allow list");
                Vec::new()
            }
        };

        Ok(Self {
            seed_ips,
            domains,
            patterns,
        })
    }
}

fn first_existing(paths: &[&str]) -> Option<PathBuf> {
    paths
        .iter()
        .map(Path::new)
        .find(|path| path.is_file())
        .map(Path::to_path_buf)
}

/// Extract the entry token from one line, or `None` for blanks and comments.
fn entry_token(line: &str) -> Option<&str> {
    let uncommented = line.split('#').next().unwrap_or("");
    uncommented.split_whitespace().next()
}

/// Split blacklist contents into the IP seed and the domain list.
pub fn parse_blacklist(contents: &str) -> (Vec<Ipv4Addr>, Vec<String>) {
    let mut seed_ips = Vec::new();
    let mut domains = Vec::new();

    for entry in contents.lines().filter_map(entry_token) {
        if let Ok(addr) = entry.parse::<Ipv4Addr>() {
            seed_ips.push(addr);
        } else if entry.len() <= DOMAIN_MAX_LEN {
            domains.push(entry.to_string());
        } else {
            debug!("skipping over-long blacklist entry ({} bytes)", entry.len());
        }
    }

    (seed_ips, domains)
}

/// Parse whitelist contents into glob patterns, skipping malformed ones.
pub fn parse_whitelist(contents: &str) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    for entry in contents.lines().filter_map(entry_token) {
        match Pattern::new(entry) {
            Ok(pattern) => patterns.push(pattern),
            Err(err) => debug!("skipping malformed whitelist pattern {entry}: {err}"),
        }
    }

    patterns
}
