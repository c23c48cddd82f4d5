//! Wall-time and peak-memory measurement for `--stat`.

use std::time::{Duration, Instant};

pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn report(self) -> String {
        let wall = self.start.elapsed();
        let mut out = format!(
            "{} completed. Timing and memory results:\n  Wall time: {:.4} s",
            self.label,
            as_secs(wall)
        );
        match peak_rss_bytes() {
            Some(bytes) => {
                out.push_str(&format!("\n  Peak memory: {:.2} KiB", bytes as f64 / 1024.0));
            }
            None => out.push_str("\n  Peak memory: unavailable on this platform"),
        }
        out
    }
}

fn as_secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// Peak resident set size, from `VmHWM` in `/proc/self/status` (Linux).
pub fn peak_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
        let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kb * 1024)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
