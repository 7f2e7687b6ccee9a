//! System requirements checking utilities
//!
//! Checks host resources before a service starts. The cyclic exchange runs
//! on a dedicated task per device, so core count matters more than memory.

use errors::VoltageResult;
use tracing::{debug, info, warn};

/// System requirements for VoltageEMS services
#[derive(Debug, Clone)]
pub struct SystemRequirements {
    /// Minimum CPU cores required
    pub min_cpu_cores: usize,
    /// Minimum memory in MB
    pub min_memory_mb: usize,
    /// Recommended CPU cores
    pub recommended_cpu_cores: usize,
}

impl Default for SystemRequirements {
    fn default() -> Self {
        Self {
            min_cpu_cores: 1,
            min_memory_mb: 64,
            recommended_cpu_cores: 2,
        }
    }
}

/// Check if system meets the default requirements
pub fn check_system_requirements() -> VoltageResult<SystemInfo> {
    check_system_requirements_with(SystemRequirements::default())
}

/// Check system requirements with custom thresholds
///
/// Shortfalls are collected as warnings; they never abort startup.
pub fn check_system_requirements_with(
    requirements: SystemRequirements,
) -> VoltageResult<SystemInfo> {
    let mut info = SystemInfo::collect();

    if info.cpu_cores < requirements.min_cpu_cores {
        info.warnings.push(format!(
            "CPU cores ({}) below minimum requirement ({})",
            info.cpu_cores, requirements.min_cpu_cores
        ));
    } else if info.cpu_cores < requirements.recommended_cpu_cores {
        debug!(
            "CPU: {} cores (rec:{})",
            info.cpu_cores, requirements.recommended_cpu_cores
        );
    }

    if let Some(memory_mb) = info.available_memory_mb {
        if memory_mb < requirements.min_memory_mb {
            info.warnings.push(format!(
                "Memory ({}MB) below minimum requirement ({}MB)",
                memory_mb, requirements.min_memory_mb
            ));
        }
    }

    Ok(info)
}

/// System information collected during checks
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub cpu_cores: usize,
    pub available_memory_mb: Option<usize>,
    pub total_memory_mb: Option<usize>,
    pub os_name: String,
    pub arch: String,
    /// Any warnings generated during checks
    pub warnings: Vec<String>,
}

impl SystemInfo {
    /// Collect current system information
    pub fn collect() -> Self {
        let cpu_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let (available_memory_mb, total_memory_mb) = read_meminfo();

        Self {
            cpu_cores,
            available_memory_mb,
            total_memory_mb,
            os_name: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            warnings: Vec::new(),
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Print system information summary
    pub fn print_summary(&self) {
        let mem_info = match (self.available_memory_mb, self.total_memory_mb) {
            (Some(avail), Some(total)) => format!(", Mem:{}/{}MB", avail, total),
            (Some(avail), None) => format!(", Mem:{}MB", avail),
            (None, Some(total)) => format!(", Mem:{}MB total", total),
            (None, None) => String::new(),
        };

        info!(
            "System: {} ({}) CPU:{}{}",
            self.os_name, self.arch, self.cpu_cores, mem_info
        );

        for warning in &self.warnings {
            warn!("{}", warning);
        }
    }
}

/// (available, total) in MB from /proc/meminfo; `None` off Linux
fn read_meminfo() -> (Option<usize>, Option<usize>) {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return (None, None);
    };
    parse_meminfo(&meminfo)
}

fn parse_meminfo(meminfo: &str) -> (Option<usize>, Option<usize>) {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<usize>().ok())
            .map(|kb| kb / 1024)
    };
    (field("MemAvailable:"), field("MemTotal:"))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_system_info_collection() {
        let info = SystemInfo::collect();
        assert!(info.cpu_cores >= 1);
        assert!(!info.os_name.is_empty());
    }

    #[test]
    fn test_parse_meminfo() {
        let sample = "MemTotal:        2048000 kB\nMemFree:          100000 kB\nMemAvailable:    1024000 kB\n";
        assert_eq!(parse_meminfo(sample), (Some(1000), Some(2000)));
        assert_eq!(parse_meminfo(""), (None, None));
    }

    #[test]
    fn test_unreachable_minimum_produces_warning() {
        let info = check_system_requirements_with(SystemRequirements {
            min_cpu_cores: usize::MAX,
            ..Default::default()
        })
        .unwrap();
        assert!(info.has_warnings());
    }
}
