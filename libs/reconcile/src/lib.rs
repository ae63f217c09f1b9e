//! Reconciliation operation primitives.
//!
//! Reconciliation work is expressed as keyed operations that converge one
//! resource (a container guid) toward the truth held by its owner. Key
//! concepts:
//!
//! - **Operation**: an idempotent unit of work that re-reads live state when
//!   it runs, never a construction-time snapshot.
//! - **Queue**: accepts operations from any number of producers.
//! - **Sliding queue**: per key, at most one operation executing and at most
//!   one waiting; a newer push replaces the waiting one.
//!
//! # Invariants
//!
//! - Two operations with the same key never execute concurrently
//! - Operations with different keys execute in parallel
//! - The last operation pushed for a key always runs after its push

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, error};

/// A keyed unit of reconciliation work.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Key serializing this operation against others for the same resource.
    fn key(&self) -> String;

    /// Converge the resource. Failures are logged by the operation itself.
    async fn execute(&self);
}

/// Destination for operations produced by reconciliation loops.
pub trait Queue<O>: Send + Sync {
    fn push(&self, operation: O);
}

#[derive(Debug)]
struct Slots<O> {
    running: HashSet<String>,
    pending: HashMap<String, O>,
}

impl<O> Default for Slots<O> {
    fn default() -> Self {
        Self {
            running: HashSet::new(),
            pending: HashMap::new(),
        }
    }
}

/// Operation queue with one running and one pending slot per key.
///
/// Operations execute on spawned tokio tasks, so `push` must be called from
/// within a runtime.
pub struct SlidingQueue<O> {
    slots: Arc<Mutex<Slots<O>>>,
}

impl<O> Clone for SlidingQueue<O> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<O: Operation> Default for SlidingQueue<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Operation> SlidingQueue<O> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Number of keys with an operation currently executing.
    pub fn in_flight(&self) -> usize {
        lock(&self.slots).running.len()
    }

    /// Number of operations waiting behind a running one.
    pub fn pending(&self) -> usize {
        lock(&self.slots).pending.len()
    }

    fn push_operation(&self, operation: O) {
        let key = operation.key();

        {
            let mut slots = lock(&self.slots);
            if slots.running.contains(&key) {
                if slots.pending.insert(key.clone(), operation).is_some() {
                    debug!(key = %key, "Replaced pending operation");
                }
                return;
            }
            slots.running.insert(key.clone());
        }

        tokio::spawn(drain(Arc::clone(&self.slots), key, operation));
    }
}

impl<O: Operation> Queue<O> for SlidingQueue<O> {
    fn push(&self, operation: O) {
        self.push_operation(operation);
    }
}

/// Run `operation`, then whatever slid into the key's pending slot meanwhile,
/// until the slot is empty.
async fn drain<O: Operation>(slots: Arc<Mutex<Slots<O>>>, key: String, operation: O) {
    let mut next = Some(operation);

    while let Some(operation) = next {
        // A panicking operation must not wedge its key.
        let handle = tokio::spawn(async move { operation.execute().await });
        if let Err(e) = handle.await {
            error!(key = %key, error = %e, "Operation panicked");
        }

        next = {
            let mut guard = lock(&slots);
            let pending = guard.pending.remove(&key);
            if pending.is_none() {
                guard.running.remove(&key);
            }
            pending
        };
    }
}

fn lock<O>(slots: &Mutex<Slots<O>>) -> MutexGuard<'_, Slots<O>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{Barrier, Notify};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorded {
        key: String,
        name: String,
        log: Log,
        gate: Option<Arc<Notify>>,
        barrier: Option<Arc<Barrier>>,
    }

    impl Recorded {
        fn new(key: &str, name: &str, log: &Log) -> Self {
            Self {
                key: key.to_string(),
                name: name.to_string(),
                log: Arc::clone(log),
                gate: None,
                barrier: None,
            }
        }

        fn gated(mut self, gate: &Arc<Notify>) -> Self {
            self.gate = Some(Arc::clone(gate));
            self
        }

        fn meeting(mut self, barrier: &Arc<Barrier>) -> Self {
            self.barrier = Some(Arc::clone(barrier));
            self
        }
    }

    #[async_trait]
    impl Operation for Recorded {
        fn key(&self) -> String {
            self.key.clone()
        }

        async fn execute(&self) {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            self.log.lock().unwrap().push(format!("end {}", self.name));
        }
    }

    async fn wait_idle<O: Operation>(queue: &SlidingQueue<O>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue did not drain");
    }

    async fn wait_for(log: &Log, entry: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !log.lock().unwrap().iter().any(|e| e == entry) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entry never logged");
    }

    #[tokio::test]
    async fn test_different_keys_run_in_parallel() {
        let log = Log::default();
        let barrier = Arc::new(Barrier::new(2));
        let queue = SlidingQueue::new();

        queue.push(Recorded::new("a", "a", &log).meeting(&barrier));
        queue.push(Recorded::new("b", "b", &log).meeting(&barrier));

        // Each operation waits for the other, so serial execution would hang.
        wait_idle(&queue).await;
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_same_key_slides_pending_operation() {
        let log = Log::default();
        let gate = Arc::new(Notify::new());
        let queue = SlidingQueue::new();

        queue.push(Recorded::new("guid", "first", &log).gated(&gate));
        wait_for(&log, "start first").await;

        queue.push(Recorded::new("guid", "second", &log));
        queue.push(Recorded::new("guid", "third", &log));
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(queue.pending(), 1);

        gate.notify_one();
        wait_idle(&queue).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start first", "end first", "start third", "end third"]
        );
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_key_is_released_after_execution() {
        let log = Log::default();
        let queue = SlidingQueue::new();

        queue.push(Recorded::new("guid", "one", &log));
        wait_idle(&queue).await;
        queue.push(Recorded::new("guid", "two", &log));
        wait_idle(&queue).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start one", "end one", "start two", "end two"]
        );
    }

    struct Panics;

    #[async_trait]
    impl Operation for Panics {
        fn key(&self) -> String {
            "boom".to_string()
        }

        async fn execute(&self) {
            panic!("operation failed");
        }
    }

    #[tokio::test]
    async fn test_panicking_operation_releases_key() {
        let queue = SlidingQueue::new();
        queue.push(Panics);
        wait_idle(&queue).await;
        assert_eq!(queue.in_flight(), 0);
    }
}
