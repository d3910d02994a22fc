//! Statistics files for external readers (the dashboard among them).
//!
//! Both files are whole-file overwrites with no locking; readers are
//! expected to tolerate a brief empty window mid-write.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

/// Cadence of the export tick on the main loop.
pub const EXPORT_INTERVAL: Duration = Duration::from_secs(2);

const STATS_PATH: &str = "/tmp/ebaf-stats.dat";
const DOMAIN_STATS_PATH: &str = "/tmp/ebaf-domain-stats.dat";

pub struct Exporter {
    stats_path: PathBuf,
    domain_stats_path: PathBuf,
}

impl Exporter {
    pub fn new() -> Self {
        Self {
            stats_path: PathBuf::from(STATS_PATH),
            domain_stats_path: PathBuf::from(DOMAIN_STATS_PATH),
        }
    }

    #[cfg(test)]
    fn with_paths(stats_path: PathBuf, domain_stats_path: PathBuf) -> Self {
        Self {
            stats_path,
            domain_stats_path,
        }
    }

    /// Write both files from one counter snapshot and one registry snapshot.
    pub fn export(&self, total: u64, blocked: u64, domains: &[(String, u64)]) -> io::Result<()> {
        self.write_counters(total, blocked)?;
        self.write_domains(domains)?;
        debug!("exported stats: total={total} blocked={blocked}");
        Ok(())
    }

    fn write_counters(&self, total: u64, blocked: u64) -> io::Result<()> {
        fs::write(&self.stats_path, format!("total: {total}\nblocked: {blocked}\n"))
    }

    fn write_domains(&self, domains: &[(String, u64)]) -> io::Result<()> {
        let mut contents = String::new();
        for (name, drops) in domains {
            contents.push_str(name);
            contents.push(':');
            contents.push_str(&drops.to_string());
            contents.push('\n');
        }
        fs::write(&self.domain_stats_path, contents)
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_exporter(dir: &tempfile::TempDir) -> Exporter {
        Exporter::with_paths(
            dir.path().join("ebaf-stats.dat"),
            dir.path().join("ebaf-domain-stats.dat"),
        )
    }

    #[test]
    fn export_writes_counter_lines() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = test_exporter(&dir);
        exporter.export(42, 7, &[]).unwrap();

        let contents = fs::read_to_string(dir.path().join("ebaf-stats.dat")).unwrap();
        assert_eq!(contents, "total: 42\nblocked: 7\n");
    }

    #[test]
    fn export_writes_one_line_per_domain() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = test_exporter(&dir);
        let rows = vec![
            ("ads.example.com".to_string(), 12),
            ("pagead.example.net".to_string(), 3),
        ];
        exporter.export(0, 0, &rows).unwrap();

        let contents = fs::read_to_string(dir.path().join("ebaf-domain-stats.dat")).unwrap();
        assert_eq!(contents, "ads.example.com:12\npagead.example.net:3\n");
    }

    #[test]
    fn export_truncates_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = test_exporter(&dir);
        let rows = vec![("ads.example.com".to_string(), 1)];
        exporter.export(100, 50, &rows).unwrap();
        exporter.export(101, 50, &[]).unwrap();

        let stats = fs::read_to_string(dir.path().join("ebaf-stats.dat")).unwrap();
        assert_eq!(stats, "total: 101\nblocked: 50\n");
        let domains = fs::read_to_string(dir.path().join("ebaf-domain-stats.dat")).unwrap();
        assert_eq!(domains, "");
    }
}
