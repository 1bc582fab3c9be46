// Process diagnostics attached to fatal errors

use sysinfo::System;

/// Memory usage information
#[derive(Debug, Clone)]
pub struct MemoryInfo {
    /// Total system RAM in bytes
    pub total_memory: u64,
    /// Available system RAM in bytes
    pub available_memory: u64,
    /// Used system RAM in bytes
    pub used_memory: u64,
    /// Current process memory usage in bytes
    pub process_memory: u64,
}

impl MemoryInfo {
    /// Get current memory information
    pub fn current() -> Self {
        let mut system = System::new_all();
        system.refresh_all();

        let process_memory = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| system.process(pid).map(|p| p.memory()))
            .unwrap_or(0);

        Self {
            total_memory: system.total_memory(),
            available_memory: system.available_memory(),
            used_memory: system.used_memory(),
            process_memory,
        }
    }

    pub fn total_gb(&self) -> f64 {
        self.total_memory as f64 / 1_073_741_824.0
    }

    pub fn used_gb(&self) -> f64 {
        self.used_memory as f64 / 1_073_741_824.0
    }

    pub fn process_mb(&self) -> f64 {
        self.process_memory as f64 / 1_048_576.0
    }

    pub fn usage_percent(&self) -> f64 {
        if self.total_memory == 0 {
            return 0.0;
        }
        (self.used_memory as f64 / self.total_memory as f64) * 100.0
    }

    /// Less than 10% available
    pub fn is_critical(&self) -> bool {
        self.available_memory < self.total_memory / 10
    }

    pub fn format_status(&self) -> String {
        let status = format!(
            "Memory: {:.1}GB / {:.1}GB ({:.0}%) | Process: {:.0}MB",
            self.used_gb(),
            self.total_gb(),
            self.usage_percent(),
            self.process_mb()
        );
        if self.is_critical() {
            format!("{} (CRITICAL)", status)
        } else {
            status
        }
    }
}

/// Log a fatal condition together with memory diagnostics
pub fn log_fatal(what: &str, detail: &str) {
    let memory = MemoryInfo::current();
    tracing::error!(
        process_bytes = memory.process_memory,
        "{}: {} [{}]",
        what,
        detail,
        memory.format_status()
    );
}

/// Route panics through `log_fatal` before the default hook runs
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_fatal("panic", &info.to_string());
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_info() {
        let info = MemoryInfo::current();
        assert!(info.total_memory > 0);
        assert!(info.used_memory <= info.total_memory);
    }

    #[test]
    fn test_format_status() {
        let info = MemoryInfo {
            total_memory: 16_000_000_000,
            available_memory: 1_000_000_000,
            used_memory: 15_000_000_000,
            process_memory: 50 * 1_048_576,
        };
        let status = info.format_status();
        assert!(status.starts_with("Memory:"));
        assert!(status.contains("Process: 50MB"));
        assert!(status.ends_with("(CRITICAL)"));
    }

    #[test]
    fn test_zero_total_does_not_divide() {
        let info = MemoryInfo {
            total_memory: 0,
            available_memory: 0,
            used_memory: 0,
            process_memory: 0,
        };
        assert_eq!(info.usage_percent(), 0.0);
    }
}
