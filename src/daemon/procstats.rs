//! Resource usage of the running daemon, read from procfs
//!
//! Served as JSON by the control socket so the interactive process can
//! show what the indexer is costing without platform-specific code on
//! its side.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Snapshot of the current process's resource usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcStats {
    pub pid: i32,
    /// Resident set size in bytes.
    pub rss: u64,
    /// User plus system CPU time in seconds.
    pub cpu_time: u64,
    /// Process start time as epoch seconds.
    pub start_time: i64,
    /// Seconds since the process started.
    pub elapsed: u64,
}

impl ProcStats {
    /// Read stats for the current process from `/proc`.
    pub fn current() -> Result<Self> {
        let stat = std::fs::read_to_string("/proc/self/stat")
            .context("Failed to read /proc/self/stat")?;
        let (cpu_ticks, start_ticks) =
            parse_stat(&stat).context("Malformed /proc/self/stat")?;

        let statm = std::fs::read_to_string("/proc/self/statm")
            .context("Failed to read /proc/self/statm")?;
        let resident_pages =
            parse_statm_resident(&statm).context("Malformed /proc/self/statm")?;

        let uptime = std::fs::read_to_string("/proc/stat")
            .context("Failed to read /proc/stat")?;
        let boot_time =
            parse_btime(&uptime).context("No btime in /proc/stat")?;

        let ticks = clock_ticks_per_sec();
        let start_time = boot_time + (start_ticks / ticks) as i64;
        let now = Utc::now().timestamp();

        Ok(Self {
            pid: std::process::id() as i32,
            rss: resident_pages * page_size(),
            cpu_time: cpu_ticks / ticks,
            start_time,
            elapsed: now.saturating_sub(start_time).max(0) as u64,
        })
    }
}

/// Extract `(utime + stime, starttime)` in clock ticks. The comm field
/// may contain spaces and parentheses, so fields are counted from the
/// last `)`.
fn parse_stat(content: &str) -> Option<(u64, u64)> {
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // After the comm field: state is field 3 of stat(5), so utime (14),
    // stime (15) and starttime (22) land at offsets 11, 12 and 19.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let starttime: u64 = fields.get(19)?.parse().ok()?;

    Some((utime + stime, starttime))
}

/// Resident set size in pages, the second field of statm.
fn parse_statm_resident(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

/// Boot time in epoch seconds from the `btime` line of /proc/stat.
fn parse_btime(content: &str) -> Option<i64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|rest| rest.trim().parse().ok())
}

fn clock_ticks_per_sec() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
}

fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}
