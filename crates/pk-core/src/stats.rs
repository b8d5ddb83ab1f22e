//! Process resource readings for the threshold trigger and heap snapshots.

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::WaitError;

/// Current-process utilisation, as percentages.
///
/// CPU percent is relative to one core (a process saturating two cores
/// reads 200). Memory percent is resident size over total physical memory.
pub trait ProcessStats: Send {
    fn cpu_percent(&mut self) -> Result<f64, WaitError>;
    fn memory_percent(&mut self) -> Result<f64, WaitError>;
}

/// [`ProcessStats`] backed by `sysinfo` for the running process.
///
/// CPU usage is measured between consecutive refreshes, so the first
/// reading after construction is 0.
pub struct SysinfoStats {
    system: System,
    pid: Pid,
}

impl std::fmt::Debug for SysinfoStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoStats").field("pid", &self.pid).finish()
    }
}

impl SysinfoStats {
    pub fn current() -> Self {
        Self::for_pid(std::process::id())
    }

    pub fn for_pid(pid: u32) -> Self {
        SysinfoStats {
            system: System::new(),
            pid: Pid::from_u32(pid),
        }
    }

    fn refresh(&mut self) -> Result<&sysinfo::Process, WaitError> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        self.system
            .process(self.pid)
            .ok_or(WaitError::ProcessNotFound(self.pid.as_u32()))
    }
}

impl Default for SysinfoStats {
    fn default() -> Self {
        Self::current()
    }
}

impl ProcessStats for SysinfoStats {
    fn cpu_percent(&mut self) -> Result<f64, WaitError> {
        let process = self.refresh()?;
        Ok(f64::from(process.cpu_usage()))
    }

    fn memory_percent(&mut self) -> Result<f64, WaitError> {
        let resident = self.refresh()?.memory();
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(WaitError::Stats("total memory reported as 0".to_string()));
        }
        Ok(resident as f64 / total as f64 * 100.0)
    }
}

/// Resident and virtual size of a process, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessMemory {
    pub resident: u64,
    pub virtual_size: u64,
    pub total_physical: u64,
}

/// Read the current process's memory footprint.
pub fn current_process_memory() -> Result<ProcessMemory, WaitError> {
    let mut stats = SysinfoStats::current();
    let process = stats.refresh()?;
    let (resident, virtual_size) = (process.memory(), process.virtual_memory());
    stats.system.refresh_memory();
    Ok(ProcessMemory {
        resident,
        virtual_size,
        total_physical: stats.system.total_memory(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_readings() {
        let mut stats = SysinfoStats::current();
        let cpu = stats.cpu_percent().unwrap();
        assert!(cpu >= 0.0);
        let mem = stats.memory_percent().unwrap();
        assert!(mem > 0.0 && mem <= 100.0, "memory percent {mem}");
    }

    #[test]
    fn test_missing_process() {
        // Pid far above any default pid_max.
        let mut stats = SysinfoStats::for_pid(u32::MAX - 7);
        assert!(matches!(
            stats.cpu_percent(),
            Err(WaitError::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_current_process_memory() {
        let memory = current_process_memory().unwrap();
        assert!(memory.resident > 0);
        assert!(memory.total_physical >= memory.resident);
    }
}
