//! Single-flight: at most one in-flight computation per key.
//!
//! Built on moka's per-key initializer: the first caller for a key runs
//! the work, callers arriving while it runs wait inside moka and receive
//! a clone of the value. The value is dropped from the map as soon as it
//! is handed out, so the map only ever holds calls that are running or
//! have just finished. Durable caching lives in `PenaltyCache`.

use crate::error::{NavError, NavResult};
use dashmap::DashMap;
use moka::sync::Cache;
use std::fmt::Display;
use std::hash::Hash;

const MAX_IN_FLIGHT: u64 = 1_024;

pub struct SingleFlight<K, V> {
    calls:   Cache<K, V>,
    /// Keys whose leader is currently running the work.
    leaders: DashMap<K, ()>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self { calls: Cache::new(MAX_IN_FLIGHT), leaders: DashMap::new() }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` unless a call for `key` is already in flight, in which
    /// case wait for it. Followers of a failed leader get
    /// `ComputationFailed` carrying the leader's message; the leader gets
    /// its own error back unchanged.
    pub fn run<F>(&self, key: &K, work: F) -> NavResult<V>
    where
        F: FnOnce() -> NavResult<V>,
    {
        let mut own_error = None;
        let outcome = self.calls.try_get_with_by_ref(key, || {
            let _leader = Leader::register(&self.leaders, key);
            work().map_err(|e| {
                let message = e.to_string();
                own_error = Some(e);
                message
            })
        });
        self.calls.invalidate(key);

        match outcome {
            Ok(value) => Ok(value),
            Err(message) => match own_error {
                Some(e) => Err(e),
                None => {
                    log::debug!("{key}: joined computation failed: {message}");
                    Err(NavError::ComputationFailed {
                        key:    key.to_string(),
                        reason: message.to_string(),
                    })
                }
            },
        }
    }

    /// Drop a finished value that callers have not collected yet.
    pub fn forget(&self, key: &K) {
        self.calls.invalidate(key);
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.leaders.contains_key(key)
    }
}

/// Marks a key as running for the lifetime of the leader's work,
/// including when the work panics.
struct Leader<'a, K: Eq + Hash> {
    leaders: &'a DashMap<K, ()>,
    key:     &'a K,
}

impl<'a, K: Eq + Hash + Clone> Leader<'a, K> {
    fn register(leaders: &'a DashMap<K, ()>, key: &'a K) -> Self {
        leaders.insert(key.clone(), ());
        Self { leaders, key }
    }
}

impl<K: Eq + Hash> Drop for Leader<'_, K> {
    fn drop(&mut self) {
        self.leaders.remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn concurrent_callers_share_one_run() {
        let flight: Arc<SingleFlight<String, u64>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    flight.run(&"k".to_string(), || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(300));
                        Ok(7)
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().expect("thread").expect("value"), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight(&"k".to_string()));
    }

    #[test]
    fn leader_error_is_returned_and_key_released() {
        let flight: SingleFlight<String, u64> = SingleFlight::new();
        let key = "k".to_string();
        let err = flight.run(&key, || Err(NavError::Cancelled)).unwrap_err();
        assert!(matches!(err, NavError::Cancelled));
        assert!(!flight.is_in_flight(&key));
        assert_eq!(flight.run(&key, || Ok(3)).expect("second run"), 3);
    }

    #[test]
    fn finished_value_is_not_reused_by_later_calls() {
        let flight: SingleFlight<String, u64> = SingleFlight::new();
        let key = "k".to_string();
        assert_eq!(flight.run(&key, || Ok(1)).expect("first"), 1);
        assert_eq!(flight.run(&key, || Ok(2)).expect("second"), 2);
    }

    #[test]
    fn running_key_is_reported_in_flight() {
        let flight: Arc<SingleFlight<String, u64>> = Arc::new(SingleFlight::new());
        let key = "k".to_string();
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let flight = Arc::clone(&flight);
            let started = Arc::clone(&started);
            let key = key.clone();
            thread::spawn(move || {
                flight.run(&key, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(200));
                    Ok(5)
                })
            })
        };
        started.wait();
        assert!(flight.is_in_flight(&key));
        assert_eq!(leader.join().expect("thread").expect("value"), 5);
        assert!(!flight.is_in_flight(&key));
    }
}
