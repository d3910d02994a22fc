//! Interface selection.
//!
//! Order of preference: operator argument, the default-route interface from
//! `/proc/net/route`, then the first non-loopback interface that is UP.

use std::ffi::CString;
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::debug;

const PROC_ROUTE: &str = "/proc/net/route";
const SYS_CLASS_NET: &str = "/sys/class/net";

/// Pick the interface to attach to. `requested` comes straight from the CLI.
pub fn select(requested: Option<String>) -> Result<String> {
    if let Some(name) = requested {
        if if_index(&name).is_some() {
            return Ok(name);
        }
        return Err(anyhow!(
            "invalid interface {name} (available: {})",
            candidate_names().join(", ")
        ));
    }

    if let Some(name) = default_route_interface() {
        debug!("selected default-route interface {name}");
        return Ok(name);
    }

    if let Some(name) = first_up_interface() {
        debug!("selected first UP interface {name}");
        return Ok(name);
    }

    Err(anyhow!(
        "no usable interface found (available: {})",
        candidate_names().join(", ")
    ))
}

/// Interface index for a name, `None` when the host has no such interface.
fn if_index(name: &str) -> Option<u32> {
    let cname = CString::new(name).ok()?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    (index != 0).then_some(index)
}

/// The interface carrying the default route, from `/proc/net/route`.
fn default_route_interface() -> Option<String> {
    let contents = fs::read_to_string(PROC_ROUTE).ok()?;
    default_route_from(&contents)
}

fn default_route_from(route_table: &str) -> Option<String> {
    for line in route_table.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        // Destination 00000000 marks the default route.
        if fields.next() == Some("00000000") {
            return Some(iface.to_string());
        }
    }
    None
}

/// First non-loopback interface whose flags have IFF_UP set.
fn first_up_interface() -> Option<String> {
    let mut names: Vec<String> = candidate_names();
    names.sort();
    names.into_iter().find(|name| {
        fs::read_to_string(Path::new(SYS_CLASS_NET).join(name).join("flags"))
            .map(|flags| flags_are_up(&flags))
            .unwrap_or(false)
    })
}

/// Non-loopback interface names, for selection and for diagnostics.
fn candidate_names() -> Vec<String> {
    let Ok(entries) = fs::read_dir(SYS_CLASS_NET) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .collect()
}

/// Parse a sysfs flags value ("0x1003\n") and test IFF_UP.
fn flags_are_up(raw: &str) -> bool {
    let trimmed = raw.trim().trim_start_matches("0x");
    u32::from_str_radix(trimmed, 16)
        .map(|flags| flags & libc::IFF_UP as u32 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route_from_finds_zero_destination() {
        let table = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t000A0A0A\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
eth0\t00000000\t010A0A0A\t0003\t0\t0\t0\t00000000\t0\t0\t0
";
        assert_eq!(default_route_from(table), Some("eth0".to_string()));
    }

    #[test]
    fn default_route_from_handles_no_default() {
        let table = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t000A0A0A\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
";
        assert_eq!(default_route_from(table), None);
    }

    #[test]
    fn default_route_from_handles_empty_table() {
        assert_eq!(default_route_from(""), None);
        assert_eq!(default_route_from("Iface\tDestination\n"), None);
    }

    #[test]
    fn flags_are_up_parses_sysfs_hex() {
        assert!(flags_are_up("0x1003\n"));
        assert!(flags_are_up("0x1"));
        assert!(!flags_are_up("0x1002\n"));
        assert!(!flags_are_up("garbage"));
    }

    #[test]
    fn loopback_always_resolves() {
        // Present on any Linux host; validates the libc lookup path.
        assert!(if_index("lo").is_some());
        assert!(if_index("definitely-not-an-interface-0").is_none());
    }
}
