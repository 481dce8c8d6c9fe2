//! Cohort membership discovery
//!
//! The coordinator learns how many cohorts take part before the run starts.
//! In a container deployment every cohort has a hosts entry on the cohort
//! subnet, so counting those entries gives the cohort count.

use std::path::PathBuf;
use tracing::debug;
use twopc_core::{CohortCount, MembershipConfig, MembershipSource, TwoPcError, TwoPcResult};

/// Counts hosts-file entries on the cohort subnet whose name carries a marker
#[derive(Debug, Clone)]
pub struct HostsFileMembership {
    path: PathBuf,
    subnet_prefix: String,
    name_marker: String,
}

impl HostsFileMembership {
    pub fn new(path: impl Into<PathBuf>, subnet_prefix: &str, name_marker: &str) -> Self {
        Self {
            path: path.into(),
            subnet_prefix: subnet_prefix.to_string(),
            name_marker: name_marker.to_string(),
        }
    }

    /// Number of matching entries in `content`
    pub fn count_entries(&self, content: &str) -> usize {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .filter(|line| line.contains(&self.subnet_prefix) && line.contains(&self.name_marker))
            .count()
    }
}

impl MembershipSource for HostsFileMembership {
    fn cohort_count(&self) -> TwoPcResult<CohortCount> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            TwoPcError::Membership(format!(
                "Failed to open hosts file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let count = self.count_entries(&content);
        debug!("{} cohort entries in {}", count, self.path.display());
        CohortCount::new(count)
    }
}

/// Fixed cohort count from configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticMembership(pub usize);

impl MembershipSource for StaticMembership {
    fn cohort_count(&self) -> TwoPcResult<CohortCount> {
        CohortCount::new(self.0)
    }
}

/// Pick the membership source: an explicit count wins over the hosts file
pub fn membership_from_config(
    config: &MembershipConfig,
    override_count: Option<usize>,
) -> Box<dyn MembershipSource> {
    match override_count.or(config.static_count) {
        Some(count) => Box::new(StaticMembership(count)),
        None => Box::new(HostsFileMembership::new(
            config.hosts_file.clone(),
            &config.subnet_prefix,
            &config.name_marker,
        )),
    }
}
