use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use nshift_domain::ScheduleId;

/// Process-wide per-schedule mutual exclusion: atomic
/// test-and-set on entry, released even on panic via the guard's `Drop`.
#[derive(Clone, Default)]
pub struct ScheduleLockRegistry {
    held: Arc<Mutex<HashSet<ScheduleId>>>,
}

impl ScheduleLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the schedule is already being scanned elsewhere; the
    /// caller must not spawn a parallel execution.
    pub fn try_acquire(&self, id: &ScheduleId) -> Option<ScheduleLockGuard> {
        let mut held = self.held.lock().unwrap();
        if held.contains(id) {
            return None;
        }
        held.insert(id.clone());
        Some(ScheduleLockGuard { held: self.held.clone(), id: id.clone() })
    }
}

pub struct ScheduleLockGuard {
    held: Arc<Mutex<HashSet<ScheduleId>>>,
    id: ScheduleId,
}

impl Drop for ScheduleLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_held() {
        let locks = ScheduleLockRegistry::new();
        let id = ScheduleId::new("s1");
        let guard = locks.try_acquire(&id).unwrap();
        assert!(locks.try_acquire(&id).is_none());
        drop(guard);
        assert!(locks.try_acquire(&id).is_some());
    }

    #[test]
    fn drop_releases_even_without_explicit_call() {
        let locks = ScheduleLockRegistry::new();
        let id = ScheduleId::new("s2");
        {
            let _guard = locks.try_acquire(&id).unwrap();
            assert!(locks.try_acquire(&id).is_none());
        }
        assert!(locks.try_acquire(&id).is_some());
    }
}
