use crate::utils::core_pinner::{available_core_ids, try_pin_core, try_set_realtime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ThreadClass {
    Io,
    Cpu,
    Critical,
}

impl ThreadClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadClass::Io => "io",
            ThreadClass::Cpu => "cpu",
            ThreadClass::Critical => "crit",
        }
    }
}

impl fmt::Display for ThreadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling wishes for a dedicated thread. Platform hooks interpret them.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadPolicy {
    /// `None` = no affinity preference.
    pub cpu_id: Option<usize>,
    /// `None` = keep the current priority. Linux SCHED_FIFO uses 1..=99.
    pub realtime_priority: Option<i32>,
    /// Whether to attempt realtime scheduling at all.
    pub realtime: bool,
}

impl ThreadPolicy {
    pub fn pinned(cpu_id: usize) -> Self {
        Self {
            cpu_id: Some(cpu_id),
            ..Self::default()
        }
    }

    pub fn realtime(priority: i32) -> Self {
        Self {
            realtime_priority: Some(priority),
            realtime: true,
            ..Self::default()
        }
    }
}

/// Platform hook for affinity and priority tuning.
///
/// Both calls run on the thread being configured.
pub trait ThreadScheduler: Send + Sync + 'static {
    /// First thing every pool and critical thread does.
    fn on_thread_start(&self, class: ThreadClass, index: usize);

    /// Applied by critical loops before user code runs.
    fn apply_current_thread_policy(&self, policy: &ThreadPolicy);
}

/// Core-pinning scheduler built on `core_affinity` (and `SCHED_FIFO` on linux).
///
/// Pool threads are spread round-robin over the core list of their class;
/// an empty list leaves that class unpinned. Failures are logged only.
#[derive(Debug, Clone, Default)]
pub struct CorePinScheduler {
    io_cores: Vec<usize>,
    cpu_cores: Vec<usize>,
}

impl CorePinScheduler {
    pub fn new(io_cores: Vec<usize>, cpu_cores: Vec<usize>) -> Self {
        Self {
            io_cores,
            cpu_cores,
        }
    }

    /// Spread both pools over every core the process may use.
    pub fn all_cores() -> Self {
        let cores = available_core_ids();
        Self::new(cores.clone(), cores)
    }

    fn core_for(&self, class: ThreadClass, index: usize) -> Option<usize> {
        let cores = match class {
            ThreadClass::Io => &self.io_cores,
            ThreadClass::Cpu => &self.cpu_cores,
            ThreadClass::Critical => return None,
        };
        if cores.is_empty() {
            None
        } else {
            Some(cores[index % cores.len()])
        }
    }
}

impl ThreadScheduler for CorePinScheduler {
    fn on_thread_start(&self, class: ThreadClass, index: usize) {
        let Some(core_id) = self.core_for(class, index) else {
            return;
        };
        match try_pin_core(core_id) {
            Ok(core_id) => tracing::debug!("[CorePinScheduler] {class}-{index} pinned to core {core_id}"),
            Err(e) => tracing::warn!("[CorePinScheduler] {class}-{index}: {e}"),
        }
    }

    fn apply_current_thread_policy(&self, policy: &ThreadPolicy) {
        if let Some(core_id) = policy.cpu_id {
            match try_pin_core(core_id) {
                Ok(_) => tracing::info!("[CorePinScheduler] critical loop pinned to core {core_id}"),
                Err(e) => tracing::error!("[CorePinScheduler] cannot pin critical loop: {e}"),
            }
        }

        if !policy.realtime {
            return;
        }
        let Some(priority) = policy.realtime_priority else {
            return;
        };
        match try_set_realtime(priority) {
            Ok(prio) => tracing::info!("[CorePinScheduler] SCHED_FIFO priority {prio} applied"),
            Err(e) => tracing::warn!("[CorePinScheduler] realtime priority {priority} refused: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_core_selection() {
        let s = CorePinScheduler::new(vec![2, 3], vec![]);
        assert_eq!(s.core_for(ThreadClass::Io, 0), Some(2));
        assert_eq!(s.core_for(ThreadClass::Io, 1), Some(3));
        assert_eq!(s.core_for(ThreadClass::Io, 2), Some(2));
        assert_eq!(s.core_for(ThreadClass::Cpu, 0), None);
        assert_eq!(s.core_for(ThreadClass::Critical, 0), None);
    }

    #[test]
    fn policy_defaults_mean_no_preference() {
        let p: ThreadPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(p, ThreadPolicy::default());
        assert_eq!(ThreadPolicy::realtime(50).realtime_priority, Some(50));
        assert_eq!(ThreadPolicy::pinned(1).cpu_id, Some(1));
    }
}
