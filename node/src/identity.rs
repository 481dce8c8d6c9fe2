//! Local process identity

use std::time::{SystemTime, UNIX_EPOCH};
use twopc_core::{TwoPcError, TwoPcResult};

/// Host name of this process, from `HOSTNAME` or `/etc/hostname`
pub fn local_hostname() -> TwoPcResult<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let name = name.trim().to_string();
        if !name.is_empty() {
            return Ok(name);
        }
    }

    let name = std::fs::read_to_string("/etc/hostname")
        .map_err(|e| TwoPcError::Identity(format!("Can't get hostname: {}", e)))?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(TwoPcError::Identity("Can't get hostname: empty".into()));
    }
    Ok(name)
}

/// Seed for the processing jitter. Cohorts started in the same instant
/// still diverge because the last byte of the host name is mixed in.
pub fn jitter_seed(hostname: &str) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    mix_seed(nanos, hostname)
}

fn mix_seed(nanos: u64, hostname: &str) -> u64 {
    let last = hostname.as_bytes().last().copied().unwrap_or_default();
    nanos.wrapping_add(u64::from(last))
}
