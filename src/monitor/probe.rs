//! Sources of raw CPU and memory counters.

use crate::monitor::{MonitorError, MonitorResult};

/// Cumulative CPU ticks since boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Busy percentage between an earlier reading and this one
    pub fn usage_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        let idle = self.idle.saturating_sub(earlier.idle);
        if total == 0 {
            return 0.0;
        }
        (total.saturating_sub(idle) as f64 / total as f64) * 100.0
    }

    /// Busy percentage since boot
    pub fn usage(&self) -> f64 {
        self.usage_since(&CpuTimes::default())
    }
}

/// Memory totals in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
}

impl MemoryInfo {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.used() as f64 / self.total as f64) * 100.0
    }
}

/// Reads system counters. Implementations must be cheap; the monitor calls
/// them on every poll.
pub trait SystemProbe: Send + Sync + std::fmt::Debug {
    fn cpu_times(&self) -> MonitorResult<CpuTimes>;

    fn memory(&self) -> MonitorResult<MemoryInfo>;
}

/// Probe backed by `/proc/stat` and `/proc/meminfo`
#[derive(Debug, Clone, Default)]
pub struct ProcfsProbe;

impl SystemProbe for ProcfsProbe {
    fn cpu_times(&self) -> MonitorResult<CpuTimes> {
        #[cfg(target_os = "linux")]
        {
            let content = std::fs::read_to_string("/proc/stat")
                .map_err(|e| MonitorError::Probe(format!("/proc/stat: {}", e)))?;
            parse_cpu_times(&content)
        }
        #[cfg(not(target_os = "linux"))]
        {
            Err(MonitorError::Unsupported)
        }
    }

    fn memory(&self) -> MonitorResult<MemoryInfo> {
        #[cfg(target_os = "linux")]
        {
            let content = std::fs::read_to_string("/proc/meminfo")
                .map_err(|e| MonitorError::Probe(format!("/proc/meminfo: {}", e)))?;
            parse_meminfo(&content)
        }
        #[cfg(not(target_os = "linux"))]
        {
            Err(MonitorError::Unsupported)
        }
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`. Idle time includes iowait.
pub fn parse_cpu_times(content: &str) -> MonitorResult<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| MonitorError::Probe("no aggregate cpu line".to_string()))?;

    let ticks = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MonitorError::Probe(format!("bad cpu counter: {}", e)))?;

    if ticks.len() < 4 {
        return Err(MonitorError::Probe("too few cpu counters".to_string()));
    }

    let idle = ticks[3] + ticks.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        idle,
        total: ticks.iter().sum(),
    })
}

/// Parse `MemTotal` and `MemAvailable` (falling back to `MemFree`) from
/// `/proc/meminfo`
pub fn parse_meminfo(content: &str) -> MonitorResult<MemoryInfo> {
    let mut total = None;
    let mut available = None;
    let mut free = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kb) = value.parse::<u64>() else {
            continue;
        };
        let bytes = kb.saturating_mul(1024);
        match key {
            "MemTotal:" => total = Some(bytes),
            "MemAvailable:" => available = Some(bytes),
            "MemFree:" => free = Some(bytes),
            _ => {}
        }
    }

    let total = total.ok_or_else(|| MonitorError::Probe("MemTotal missing".to_string()))?;
    let available = available
        .or(free)
        .ok_or_else(|| MonitorError::Probe("MemAvailable missing".to_string()))?;

    Ok(MemoryInfo {
        total,
        available: available.min(total),
    })
}
