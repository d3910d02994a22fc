//! Loading and attaching the compiled classifier.
//!
//! The object file is located through a fixed search ladder, loaded with
//! aya, and attached with a fallback ladder of XDP modes. Detach is
//! idempotent and also runs from `Drop`, so the interface is left clean on
//! every shutdown path.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use aya::Ebpf;
use aya::programs::xdp::XdpLinkId;
use aya::programs::{Xdp, XdpFlags};
use tracing::{debug, info, warn};

use ebaf_common::{MAP_ALLOW_SET, MAP_BLOCK_SET, MAP_STATS, PROG_XDP_BLOCKER};

use crate::maps::{AllowSet, BlockSet, StatsArray};

pub const ARTIFACT_NAME: &str = "ebaf.bpf.o";

/// Raise the locked-memory limit so map creation is not rejected on hosts
/// without BPF memory accounting. Refusal is soft; newer kernels do not
/// charge map memory against RLIMIT_MEMLOCK.
pub fn raise_memlock_limit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!(
            "failed to raise RLIMIT_MEMLOCK, continuing: {}",
            io::Error::last_os_error()
        );
    }
}

/// Locate the classifier object on the documented search ladder.
pub fn find_artifact() -> Result<PathBuf> {
    let dirs = candidate_dirs();
    first_artifact(&dirs).ok_or_else(|| {
        let searched: Vec<String> = dirs
            .iter()
            .map(|dir| dir.join(ARTIFACT_NAME).display().to_string())
            .collect();
        anyhow!(
            "classifier object not found, searched: {}; build it with `cargo xtask build-ebpf`",
            searched.join(", ")
        )
    })
}

fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("."),
        PathBuf::from("bin"),
        PathBuf::from("obj"),
    ];
    if let Ok(exe) = env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.to_path_buf());
            dirs.push(exe_dir.join("..").join("obj"));
        }
    }
    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs.push(PathBuf::from("/usr/local/share/ebaf"));
    dirs
}

fn first_artifact(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(ARTIFACT_NAME))
        .find(|path| path.is_file())
}

/// Userspace handles to the classifier's maps.
pub struct FirewallMaps {
    pub block_set: BlockSet,
    pub allow_set: AllowSet,
    pub stats: StatsArray,
}

/// The loaded classifier and, once attached, its link.
pub struct Firewall {
    bpf: Ebpf,
    link: Option<XdpLinkId>,
}

impl Firewall {
    /// Load the object file, take the map handles, and zero the counters.
    pub fn load(path: &Path) -> Result<(Self, FirewallMaps)> {
        info!("loading classifier object from {}", path.display());
        let mut bpf = Ebpf::load_file(path)
            .with_context(|| format!("failed to load classifier object {}", path.display()))?;

        let block_set = BlockSet::new(
            bpf.take_map(MAP_BLOCK_SET)
                .with_context(|| format!("map {MAP_BLOCK_SET} not found in object"))?,
        )?;
        let allow_set = AllowSet::new(
            bpf.take_map(MAP_ALLOW_SET)
                .with_context(|| format!("map {MAP_ALLOW_SET} not found in object"))?,
        )?;
        let mut stats = StatsArray::new(
            bpf.take_map(MAP_STATS)
                .with_context(|| format!("map {MAP_STATS} not found in object"))?,
        )?;
        stats.zero()?;

        Ok((
            Self { bpf, link: None },
            FirewallMaps {
                block_set,
                allow_set,
                stats,
            },
        ))
    }

    /// Attach to `iface`, trying driver-native, then generic (SKB), then the
    /// host default. The first mode that takes wins.
    pub fn attach(&mut self, iface: &str) -> Result<()> {
        let program = classifier_program(&mut self.bpf)?;
        program.load().context("failed to load xdp program")?;

        let modes = [
            (XdpFlags::DRV_MODE, "driver-native"),
            (XdpFlags::SKB_MODE, "generic (SKB)"),
            (XdpFlags::default(), "default"),
        ];
        for (flags, label) in modes {
            match program.attach(iface, flags) {
                Ok(link) => {
                    info!("attached classifier to {iface} in {label} mode");
                    self.link = Some(link);
                    return Ok(());
                }
                Err(err) if is_not_supported(&err) => {
                    debug!("{label} mode not supported on {iface}");
                }
                Err(err) => {
                    warn!("failed to attach to {iface} in {label} mode: {err}");
                }
            }
        }
        Err(anyhow!("failed to attach classifier to {iface} in any mode"))
    }

    /// Detach from the interface. Safe to call more than once; later calls
    /// are no-ops.
    pub fn detach(&mut self) -> Result<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        classifier_program(&mut self.bpf)?
            .detach(link)
            .context("failed to detach xdp program")
    }
}

fn classifier_program(bpf: &mut Ebpf) -> Result<&mut Xdp> {
    bpf.program_mut(PROG_XDP_BLOCKER)
        .with_context(|| format!("program {PROG_XDP_BLOCKER} not found in object"))?
        .try_into()
        .context("classifier program has wrong type")
}

impl Drop for Firewall {
    fn drop(&mut self) {
        // Shutdown paths call detach explicitly; this covers early errors.
        if self.link.is_some() {
            if let Err(err) = self.detach() {
                warn!("detach during teardown failed: {err:#}");
            }
        }
    }
}

/// Whether an attach error bottoms out in EOPNOTSUPP.
fn is_not_supported(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return io_err.raw_os_error() == Some(libc::EOPNOTSUPP);
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn first_artifact_honors_ladder_order() {
        let early = tempfile::tempdir().unwrap();
        let late = tempfile::tempdir().unwrap();
        fs::write(early.path().join(ARTIFACT_NAME), b"early").unwrap();
        fs::write(late.path().join(ARTIFACT_NAME), b"late").unwrap();

        let dirs = vec![early.path().to_path_buf(), late.path().to_path_buf()];
        let found = first_artifact(&dirs).unwrap();
        assert_eq!(found, early.path().join(ARTIFACT_NAME));
    }

    #[test]
    fn first_artifact_skips_missing_dirs() {
        let present = tempfile::tempdir().unwrap();
        fs::write(present.path().join(ARTIFACT_NAME), b"obj").unwrap();

        let dirs = vec![
            PathBuf::from("/nonexistent-ebaf-test"),
            present.path().to_path_buf(),
        ];
        let found = first_artifact(&dirs).unwrap();
        assert_eq!(found, present.path().join(ARTIFACT_NAME));
        assert!(first_artifact(&dirs[..1]).is_none());
    }

    #[test]
    fn candidate_dirs_start_with_working_directory() {
        let dirs = candidate_dirs();
        assert_eq!(dirs[0], PathBuf::from("."));
        assert_eq!(dirs[1], PathBuf::from("bin"));
        assert_eq!(dirs[2], PathBuf::from("obj"));
        assert_eq!(dirs.last(), Some(&PathBuf::from("/usr/local/share/ebaf")));
    }

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "attach failed")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn is_not_supported_walks_source_chain() {
        let not_supported = io::Error::from_raw_os_error(libc::EOPNOTSUPP);
        assert!(is_not_supported(&not_supported));

        let denied = io::Error::from_raw_os_error(libc::EPERM);
        assert!(!is_not_supported(&denied));

        let wrapped = Wrapped(io::Error::from_raw_os_error(libc::EOPNOTSUPP));
        assert!(is_not_supported(&wrapped));
    }
}
