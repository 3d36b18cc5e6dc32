//! Per-repo-root serialization (spec §5: "all VCS invocations against a
//! given repo_root are mutually exclusive").
//!
//! Grounded on `csa-lock/src/slot.rs`'s flock-guarded exclusive region,
//! reimplemented as an in-process async mutex keyed by canonicalized repo
//! root: every VCS caller in this workspace lives in the same process, so
//! the cross-process guarantee flock buys the teacher is unnecessary here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Clone, Default)]
pub struct RepoLockRegistry {
    locks: Arc<StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl RepoLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, repo_root: &Path) -> Arc<AsyncMutex<()>> {
        let key = repo_root.to_path_buf();
        let mut locks = self.locks.lock().expect("repo lock registry poisoned");
        locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Acquire exclusive access to `repo_root`, holding the guard for the
    /// lifetime of the returned value.
    pub async fn acquire(&self, repo_root: &Path) -> RepoGuard {
        let lock = self.lock_for(repo_root);
        let guard = lock.lock_owned().await;
        RepoGuard { _guard: guard }
    }
}

pub struct RepoGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_on_same_root_waits_for_first_to_drop() {
        let registry = RepoLockRegistry::new();
        let root = PathBuf::from("/tmp/repo-a");

        let order = Arc::new(StdMutex::new(Vec::new()));
        let order1 = order.clone();
        let order2 = order.clone();
        let registry1 = registry.clone();
        let registry2 = registry.clone();
        let root1 = root.clone();
        let root2 = root.clone();

        let h1 = tokio::spawn(async move {
            let _g = registry1.acquire(&root1).await;
            order1.lock().unwrap().push(1);
            tokio::time::sleep(Duration::from_millis(30)).await;
            order1.lock().unwrap().push(2);
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let h2 = tokio::spawn(async move {
            let _g = registry2.acquire(&root2).await;
            order2.lock().unwrap().push(3);
        });

        h1.await.unwrap();
        h2.await.unwrap();
        // h2's critical section must start only after h1 released (push(2)
        // happens before push(3)).
        let final_order = order.lock().unwrap().clone();
        assert_eq!(final_order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn different_repo_roots_do_not_contend() {
        let registry = RepoLockRegistry::new();
        let a = registry.acquire(Path::new("/tmp/a")).await;
        let b = registry.acquire(Path::new("/tmp/b")).await;
        drop(a);
        drop(b);
    }
}
