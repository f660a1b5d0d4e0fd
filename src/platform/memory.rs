//! Physical memory probing used to size the back/forward cache.
//!
//! - **Linux**: reads `MemTotal` from `/proc/meminfo`
//! - **Other platforms**: unknown (0), which disables automatic caching

pub trait MemoryInfo {
    fn total_physical_memory_mb(&self) -> u64;
}

/// Reads the host's installed memory
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryInfo for SystemMemory {
    fn total_physical_memory_mb(&self) -> u64 {
        read_total_kb() / 1024
    }
}

/// A fixed memory size, for tests and simulations
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryInfo for FixedMemory {
    fn total_physical_memory_mb(&self) -> u64 {
        self.0
    }
}

#[cfg(target_os = "linux")]
fn read_total_kb() -> u64 {
    let Ok(contents) = std::fs::read_to_string("/proc/meminfo") else {
        log::warn!("/proc/meminfo unavailable, treating physical memory as unknown");
        return 0;
    };
    parse_mem_total_kb(&contents)
}

#[cfg(not(target_os = "linux"))]
fn read_total_kb() -> u64 {
    0
}

fn parse_mem_total_kb(meminfo: &str) -> u64 {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
        .unwrap_or(0)
}

/// Number of content viewers worth caching for a machine with `total_mb` of memory.
///
/// Each cached viewer is assumed to cost about 4 MB; the result grows with the
/// square of log2(memory) and is capped at 8.
pub fn max_viewers_for_memory(total_mb: u64) -> usize {
    if total_mb == 0 {
        return 0;
    }
    let kbytes = (total_mb.saturating_mul(1024)) as f64;
    let x = kbytes.log2() - 14.0;
    let mut viewers = 0usize;
    if x > 0.0 {
        viewers = (x * x - x + 2.001) as usize;
        viewers /= 4;
    }
    viewers.min(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mem_total() {
        let sample = "MemTotal:       16314180 kB\nMemFree:         1183644 kB\n";
        assert_eq!(parse_mem_total_kb(sample), 16314180);
        assert_eq!(parse_mem_total_kb("garbage"), 0);
    }

    #[test]
    fn test_unknown_memory_disables_cache() {
        assert_eq!(max_viewers_for_memory(0), 0);
    }

    #[test]
    fn test_small_machines_cache_little() {
        // 32 MB: log2(32768) - 14 = 1 -> floor(2.001) / 4 = 0
        assert_eq!(max_viewers_for_memory(32), 0);
        // 128 MB: x = 3 -> floor(8.001) / 4 = 2
        assert_eq!(max_viewers_for_memory(128), 2);
        // 256 MB: x = 4 -> floor(14.001) / 4 = 3
        assert_eq!(max_viewers_for_memory(256), 3);
    }

    #[test]
    fn test_large_machines_capped() {
        assert_eq!(max_viewers_for_memory(1024), 8);
        assert_eq!(max_viewers_for_memory(64 * 1024), 8);
    }

    #[test]
    fn test_system_memory_readable() {
        // Only checks that probing does not panic; value depends on the host.
        let _ = SystemMemory.total_physical_memory_mb();
    }
}
