//! Per-project mutual exclusion for recomputes.
//!
//! Two concurrent runs for the same project could interleave their stale
//! deletes with each other's fresh rows, so every recompute holds the
//! project's guard from candidate generation through garbage collection.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

/// Held for the duration of one project recompute
#[derive(Debug)]
pub struct ProjectGuard {
    project_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl ProjectGuard {
    pub fn project_id(&self) -> Uuid {
        self.project_id
    }
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other recompute for `project_id` is in flight
    pub async fn acquire(&self, project_id: Uuid) -> ProjectGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on
            locks.retain(|id, l| *id == project_id || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(project_id).or_default())
        };

        ProjectGuard {
            project_id,
            _guard: lock.lock_owned().await,
        }
    }

    /// Non-blocking variant; `None` when a recompute is already running
    pub async fn try_acquire(&self, project_id: Uuid) -> Option<ProjectGuard> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(project_id).or_default())
        };

        lock.try_lock_owned().ok().map(|guard| ProjectGuard {
            project_id,
            _guard: guard,
        })
    }

    /// Number of projects with a lock entry
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_project_is_exclusive() {
        let locks = ProjectLocks::new();
        let project = Uuid::new_v4();

        let guard = locks.acquire(project).await;
        assert_eq!(guard.project_id(), project);
        assert!(locks.try_acquire(project).await.is_none());

        drop(guard);
        assert!(locks.try_acquire(project).await.is_some());
    }

    #[tokio::test]
    async fn test_different_projects_do_not_block() {
        let locks = ProjectLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = locks.try_acquire(Uuid::new_v4()).await;
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn test_waiters_run_one_at_a_time() {
        let locks = ProjectLocks::new();
        let project = Uuid::new_v4();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let locks = locks.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(project).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = ProjectLocks::new();
        for _ in 0..10 {
            let guard = locks.acquire(Uuid::new_v4()).await;
            drop(guard);
        }
        // Only the most recently acquired entry survives pruning
        assert_eq!(locks.tracked().await, 1);
    }
}
