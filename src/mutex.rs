// src/mutex.rs

//! FIFO async mutual exclusion for executors.
//!
//! The engine never locks anything itself: two concurrent executions of the
//! same file task may both decide to rebuild it. Executors that care wrap
//! their critical region in a [`Mutex`] (or one from a [`KeyedMutex`] keyed
//! by the resolved path).
//!
//! Waiters are served strictly in arrival order. Handing the lock over wakes
//! the next waiter's task rather than running it inline. [`Mutex::dispose`]
//! rejects every queued waiter with [`TaskchainError::Cancelled`].

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{Result, TaskchainError};

fn lock<T>(mutex: &StdMutex<T>) -> StdGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct State {
    active: bool,
    queue: VecDeque<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
pub struct Mutex {
    state: StdMutex<State>,
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, waiting behind every earlier caller.
    pub async fn lock(&self) -> Result<MutexGuard<'_>> {
        let rx = {
            let mut state = lock(&self.state);
            if !state.active && state.queue.is_empty() {
                state.active = true;
                return Ok(MutexGuard { mutex: Some(self) });
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            rx
        };

        let mut waiter = Waiter {
            mutex: self,
            rx,
            settled: false,
        };
        let handed_over = (&mut waiter.rx).await;
        waiter.settled = true;
        match handed_over {
            Ok(()) => Ok(MutexGuard { mutex: Some(self) }),
            Err(_) => Err(TaskchainError::Cancelled),
        }
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        lock(&self.state).active
    }

    /// Number of queued waiters.
    pub fn waiters(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Reject every queued waiter. The current holder keeps the lock.
    pub fn dispose(&self) {
        let dropped: Vec<_> = lock(&self.state).queue.drain(..).collect();
        if !dropped.is_empty() {
            debug!(waiters = dropped.len(), "mutex disposed");
        }
    }

    fn release(&self) {
        let mut state = lock(&self.state);
        while let Some(next) = state.queue.pop_front() {
            // A closed receiver belongs to a waiter that gave up.
            if next.send(()).is_ok() {
                return;
            }
        }
        state.active = false;
    }
}

/// Pending acquisition. Dropping it after the lock was handed over passes
/// the lock on instead of leaking it.
struct Waiter<'a> {
    mutex: &'a Mutex,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.mutex.release();
        }
    }
}

/// Holds the lock until dropped or [`MutexGuard::release`]d.
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: Option<&'a Mutex>,
}

impl MutexGuard<'_> {
    pub fn release(mut self) {
        if let Some(mutex) = self.mutex.take() {
            mutex.release();
        }
    }

    /// Keep the lock held past the guard; the caller must release it.
    fn disarm(mut self) {
        self.mutex = None;
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Some(mutex) = self.mutex.take() {
            mutex.release();
        }
    }
}

/// One [`Mutex`] per path.
///
/// Entries taken through [`KeyedMutex::lock`] are dropped again once their
/// last holder releases and nobody is queued, so the map only holds paths
/// that are in use.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    locks: StdMutex<HashMap<PathBuf, Arc<Mutex>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `key`, created on first use. It stays in the map
    /// until a [`KeyedMutex::lock`] on the same key releases.
    pub fn get(&self, key: &Path) -> Arc<Mutex> {
        Arc::clone(lock(&self.locks).entry(key.to_path_buf()).or_default())
    }

    /// Acquire the mutex for `key`.
    pub async fn lock(&self, key: &Path) -> Result<KeyedGuard<'_>> {
        let mutex = self.get(key);
        let acquired = mutex.lock().await.map(MutexGuard::disarm);
        match acquired {
            Ok(()) => Ok(KeyedGuard {
                owner: self,
                key: key.to_path_buf(),
                mutex,
            }),
            Err(err) => {
                self.forget_if_idle(key, &mutex);
                Err(err)
            }
        }
    }

    /// Remove the entry for `key` when `mutex` is the only handle besides
    /// the map's own and the lock is free.
    fn forget_if_idle(&self, key: &Path, mutex: &Arc<Mutex>) {
        let mut locks = lock(&self.locks);
        let idle = locks.get(key).is_some_and(|entry| {
            Arc::ptr_eq(entry, mutex)
                && Arc::strong_count(mutex) == 2
                && !mutex.is_locked()
                && mutex.waiters() == 0
        });
        if idle {
            locks.remove(key);
        }
    }

    /// Number of paths currently tracked.
    pub fn len(&self) -> usize {
        lock(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every mutex handed out so far.
    pub fn dispose(&self) {
        for mutex in lock(&self.locks).values() {
            mutex.dispose();
        }
    }
}

/// Holds the lock for one key until dropped.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    owner: &'a KeyedMutex,
    key: PathBuf,
    mutex: Arc<Mutex>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
        self.owner.forget_if_idle(&self.key, &self.mutex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() -> Result<()> {
        let mutex = Arc::new(Mutex::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let guard = mutex.lock().await?;
        let mut handles = Vec::new();
        for id in 0..4 {
            let mutex = Arc::clone(&mutex);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = mutex.lock().await?;
                lock(&order).push(id);
                tokio::task::yield_now().await;
                Ok::<_, TaskchainError>(())
            }));
            settle().await;
        }
        assert_eq!(mutex.waiters(), 4);

        guard.release();
        for handle in handles {
            handle.await.map_err(anyhow::Error::from)??;
        }
        assert_eq!(*lock(&order), vec![0, 1, 2, 3]);
        assert!(!mutex.is_locked());
        Ok(())
    }

    #[tokio::test]
    async fn dispose_rejects_queued_waiters() -> Result<()> {
        let mutex = Arc::new(Mutex::new());
        let guard = mutex.lock().await?;

        let waiter = {
            let mutex = Arc::clone(&mutex);
            tokio::spawn(async move { mutex.lock().await.map(drop) })
        };
        settle().await;
        mutex.dispose();

        let outcome = waiter.await.map_err(anyhow::Error::from)?;
        assert!(matches!(outcome, Err(TaskchainError::Cancelled)));
        assert!(mutex.is_locked());
        drop(guard);
        assert!(!mutex.is_locked());
        Ok(())
    }

    #[tokio::test]
    async fn abandoned_waiters_do_not_strand_the_lock() -> Result<()> {
        let mutex = Mutex::new();

        let guard = mutex.lock().await?;
        assert!(mutex.lock().now_or_never().is_none());
        drop(guard);
        assert!(!mutex.is_locked());

        let guard = mutex.lock().await?;
        let mut pending = Box::pin(mutex.lock());
        assert!(futures::poll!(&mut pending).is_pending());
        drop(guard);
        drop(pending);
        assert!(mutex.lock().now_or_never().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn keyed_entries_are_dropped_once_idle() -> Result<()> {
        let keyed = Arc::new(KeyedMutex::new());
        let path = Path::new("/p/out/app.js");

        let guard = keyed.lock(path).await?;
        assert_eq!(keyed.len(), 1);
        let waiter = {
            let keyed = Arc::clone(&keyed);
            tokio::spawn(async move { keyed.lock(Path::new("/p/out/app.js")).await.map(drop) })
        };
        settle().await;

        drop(guard);
        assert_eq!(keyed.len(), 1, "a queued waiter keeps the entry alive");
        waiter.await.map_err(anyhow::Error::from)??;
        assert!(keyed.is_empty());

        let _held = keyed.lock(Path::new("/p/out/other.js")).await?;
        assert_eq!(keyed.len(), 1);
        Ok(())
    }

    #[test]
    fn keyed_mutex_shares_one_lock_per_path() {
        let keyed = KeyedMutex::new();
        let a = keyed.get(Path::new("/p/out/app.js"));
        let b = keyed.get(Path::new("/p/out/app.js"));
        let c = keyed.get(Path::new("/p/out/other.js"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
