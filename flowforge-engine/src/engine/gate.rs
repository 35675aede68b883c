//! Dispatch gate
//!
//! A process-wide counting semaphore bounding concurrently running pipeline
//! runs. Admission is blocking and FIFO: waiters are served in submission
//! order. A waiter whose future is dropped (run cancelled while still
//! pending) consumes no slot. Exactly one slot is held per live run and is
//! released when its permit drops at terminal state.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct DispatchGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl DispatchGate {
    pub fn new(capacity: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Waits for a slot. The returned permit releases the slot on drop.
    pub async fn admit(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("dispatch gate semaphore is never closed")
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free; used by introspection and tests.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cap_is_never_exceeded() {
        let gate = DispatchGate::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let gate = gate.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.admit().await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
    }

    #[tokio::test]
    async fn test_admission_is_fifo() {
        let gate = DispatchGate::new(1);
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        // Hold the only slot so every submission below must queue.
        let blocker = gate.admit().await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.admit().await;
                order.lock().await.push(i);
            }));
            // Give each waiter time to enqueue before the next submission.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(blocker);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_dropped_waiter_consumes_no_slot() {
        let gate = DispatchGate::new(1);
        let held = gate.admit().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.admit().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.available(), 1);
    }
}
