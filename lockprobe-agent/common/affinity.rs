use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{LockprobeError, Result};

/// Pins the calling thread to one CPU until dropped
pub struct AffinityGuard {
    old_affinity: CpuSet,
}

impl AffinityGuard {
    pub fn new(cpu: u32) -> Result<Self> {
        if cpu as usize >= CpuSet::count() {
            return Err(LockprobeError::AffinityError(format!(
                "Invalid CPU ID: {cpu}"
            )));
        }

        let old_affinity = sched_getaffinity(Pid::from_raw(0))
            .map_err(|e| LockprobeError::AffinityError(format!("Failed to get affinity: {e}")))?;

        let mut new_affinity = CpuSet::new();
        new_affinity.set(cpu as usize).map_err(|e| {
            LockprobeError::AffinityError(format!("Failed to set CPU {cpu} in set: {e}"))
        })?;

        sched_setaffinity(Pid::from_raw(0), &new_affinity).map_err(|e| {
            LockprobeError::AffinityError(format!("Failed to set affinity to CPU {cpu}: {e}"))
        })?;

        Ok(Self { old_affinity })
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        let _ = sched_setaffinity(Pid::from_raw(0), &self.old_affinity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_guard_rejects_out_of_set_cpu() {
        let result = AffinityGuard::new(u32::MAX);
        assert!(matches!(result, Err(LockprobeError::AffinityError(_))));
    }

    #[test]
    fn test_affinity_guard_restores_on_drop() {
        let before = sched_getaffinity(Pid::from_raw(0)).unwrap();
        if let Ok(guard) = AffinityGuard::new(0) {
            drop(guard);
            let after = sched_getaffinity(Pid::from_raw(0)).unwrap();
            assert_eq!(before, after);
        }
    }
}
