//! Call deduplication (single-flight).
//!
//! Collapses concurrent loads for the same key into one execution. The first
//! caller registers a flight and its load future; later callers for the same
//! key join the flight and receive a clone of the identical outcome. The
//! record is removed as soon as the load completes, so outcomes are never
//! cached here.
//!
//! A flight is a [`Shared`] future that the leader also hands to its own
//! task. It runs to completion (and deregisters itself) whether or not anyone
//! is still waiting, so a waiter that gives up strands neither the others nor
//! the next caller.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// How a caller took part in a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the flight and supplied the load.
    Leader,
    /// Joined a flight already in progress.
    Follower,
}

struct Call<T: Clone> {
    id: u64,
    fut: Shared<BoxFuture<'static, T>>,
}

type CallMap<K, T> = Arc<Mutex<HashMap<K, Call<T>>>>;

/// Key-indexed table of in-flight calls.
pub struct FlightGroup<K, T: Clone> {
    calls: CallMap<K, T>,
    next_id: AtomicU64,
}

impl<K, T> Default for FlightGroup<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> FlightGroup<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `make()`'s future for `key` unless a flight for `key` is already in
    /// progress, in which case wait for that flight instead. `make` is only
    /// invoked by the leader.
    pub async fn work<F, Fut>(&self, key: K, make: F) -> (T, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (fut, role) = {
            let mut calls = self.calls.lock();
            match calls.get(&key) {
                Some(call) => (call.fut.clone(), Role::Follower),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let fut = Self::flight(Arc::clone(&self.calls), key.clone(), id, make());
                    calls.insert(
                        key,
                        Call {
                            id,
                            fut: fut.clone(),
                        },
                    );
                    // Driven to completion even if every waiter gives up, so
                    // the record is always removed when the load finishes.
                    tokio::spawn(fut.clone());
                    (fut, Role::Leader)
                }
            }
        };

        (fut.await, role)
    }

    fn flight<Fut>(calls: CallMap<K, T>, key: K, id: u64, load: Fut) -> Shared<BoxFuture<'static, T>>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        async move {
            let outcome = load.await;
            let mut calls = calls.lock();
            // A forgotten flight may already have been replaced by a newer one.
            if calls.get(&key).is_some_and(|call| call.id == id) {
                calls.remove(&key);
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Detach the in-flight record for `key`. Current waiters still receive its
    /// outcome; the next caller starts a fresh flight.
    pub fn forget(&self, key: &K) -> bool {
        self.calls.lock().remove(key).is_some()
    }

    /// Detach every in-flight record.
    pub fn forget_all(&self) -> usize {
        let mut calls = self.calls.lock();
        let count = calls.len();
        calls.clear();
        count
    }

    /// Whether a flight for `key` is in progress.
    pub fn in_flight(&self, key: &K) -> bool {
        self.calls.lock().contains_key(key)
    }

    /// Number of flights in progress.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn test_single_call() {
        let flights: FlightGroup<String, Result<u32, String>> = FlightGroup::new();
        let (out, role) = flights.work("k".to_string(), || async { Ok(7) }).await;
        assert_eq!(out, Ok(7));
        assert_eq!(role, Role::Leader);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let flights: Arc<FlightGroup<String, Result<u32, String>>> = Arc::new(FlightGroup::new());
        let executions = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flights = Arc::clone(&flights);
            let executions = Arc::clone(&executions);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                flights
                    .work("k".to_string(), move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(42)
                    })
                    .await
            }));
        }

        // Let every task register or join before the load finishes.
        while !flights.in_flight(&"k".to_string()) {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        let mut leaders = 0;
        for handle in handles {
            let (out, role) = handle.await.unwrap();
            assert_eq!(out, Ok(42));
            if role == Role::Leader {
                leaders += 1;
            }
        }
        assert_eq!(leaders, 1);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_error_reaches_every_waiter_then_retry_is_fresh() {
        let flights: Arc<FlightGroup<String, Result<u32, Arc<String>>>> = Arc::new(FlightGroup::new());
        let release = Arc::new(Notify::new());

        let leader = {
            let flights = Arc::clone(&flights);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                flights
                    .work("k".to_string(), move || async move {
                        release.notified().await;
                        Err(Arc::new("boom".to_string()))
                    })
                    .await
            })
        };
        while !flights.in_flight(&"k".to_string()) {
            tokio::task::yield_now().await;
        }
        let follower = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .work("k".to_string(), || async { Ok(0) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        let (a, _) = leader.await.unwrap();
        let (b, role) = follower.await.unwrap();
        assert_eq!(role, Role::Follower);
        match (a, b) {
            (Err(a), Err(b)) => assert!(Arc::ptr_eq(&a, &b)),
            other => panic!("expected shared error, got {other:?}"),
        }

        let (retry, role) = flights.work("k".to_string(), || async { Ok(1) }).await;
        assert_eq!(retry, Ok(1));
        assert_eq!(role, Role::Leader);
    }

    #[tokio::test]
    async fn test_forget_starts_fresh_flight() {
        let flights: Arc<FlightGroup<String, u32>> = Arc::new(FlightGroup::new());
        let release = Arc::new(Notify::new());

        let stale = {
            let flights = Arc::clone(&flights);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                flights
                    .work("k".to_string(), move || async move {
                        release.notified().await;
                        1
                    })
                    .await
            })
        };
        while !flights.in_flight(&"k".to_string()) {
            tokio::task::yield_now().await;
        }

        assert!(flights.forget(&"k".to_string()));
        let (fresh, role) = flights.work("k".to_string(), || async { 2 }).await;
        assert_eq!((fresh, role), (2, Role::Leader));

        release.notify_one();
        assert_eq!(stale.await.unwrap().0, 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_strand_others() {
        let flights: Arc<FlightGroup<String, u32>> = Arc::new(FlightGroup::new());
        let release = Arc::new(Notify::new());

        let leader = {
            let flights = Arc::clone(&flights);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                flights
                    .work("k".to_string(), move || async move {
                        release.notified().await;
                        9
                    })
                    .await
            })
        };
        while !flights.in_flight(&"k".to_string()) {
            tokio::task::yield_now().await;
        }
        let follower = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move { flights.work("k".to_string(), || async { 0 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let _ = leader.await;
        release.notify_one();

        assert_eq!(follower.await.unwrap(), (9, Role::Follower));
    }

    #[tokio::test]
    async fn test_flight_deregisters_after_every_waiter_left() {
        let flights: FlightGroup<String, u32> = FlightGroup::new();

        let gave_up = tokio::time::timeout(
            Duration::from_millis(10),
            flights.work("k".to_string(), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                1
            }),
        )
        .await;
        assert!(gave_up.is_err());
        assert!(flights.in_flight(&"k".to_string()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(flights.is_empty());

        let (next, role) = flights.work("k".to_string(), || async { 2 }).await;
        assert_eq!((next, role), (2, Role::Leader));
    }
}
