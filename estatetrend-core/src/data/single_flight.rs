//! Single-flight registry: at most one in-progress call per key.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs block on a condvar and receive a clone of the
//! leader's value. The registry lock is held only to look up or insert the
//! call slot, never while the work runs.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Debug)]
enum Slot<V> {
    Pending,
    Done(V),
    /// Leader unwound without producing a value.
    Abandoned,
}

#[derive(Debug)]
struct Call<V> {
    slot: Mutex<Slot<V>>,
    ready: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Slot<V>) {
        *lock(&self.slot) = outcome;
        self.ready.notify_all();
    }

    /// Block until the leader finishes. `None` if it abandoned the call.
    fn wait(&self) -> Option<V> {
        let mut slot = lock(&self.slot);
        while matches!(*slot, Slot::Pending) {
            slot = self.ready.wait(slot).unwrap_or_else(|p| p.into_inner());
        }
        match &*slot {
            Slot::Done(value) => Some(value.clone()),
            _ => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Value produced by [`SingleFlight::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Flight<V> {
    pub value: V,
    /// True when this caller joined another caller's call instead of running it.
    pub shared: bool,
}

#[derive(Debug)]
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Publishes the leader's outcome and frees the key, even on unwind.
struct LeaderGuard<'a, K: Eq + Hash, V: Clone> {
    calls: &'a Mutex<HashMap<K, Arc<Call<V>>>>,
    key: &'a K,
    call: &'a Call<V>,
    finished: bool,
}

impl<K: Eq + Hash, V: Clone> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.finished {
            self.call.complete(Slot::Abandoned);
        }
        // Outcome is published before the key is released, so a caller that
        // still finds the slot gets the finished value instead of a second call.
        lock(self.calls).remove(self.key);
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or join the call already in progress.
    pub fn run<F>(&self, key: &K, work: F) -> Flight<V>
    where
        F: FnOnce() -> V,
    {
        loop {
            let (call, leader) = {
                let mut calls = lock(&self.calls);
                match calls.get(key) {
                    Some(call) => (Arc::clone(call), false),
                    None => {
                        let call = Arc::new(Call::new());
                        calls.insert(key.clone(), Arc::clone(&call));
                        (call, true)
                    }
                }
            };

            if leader {
                let mut guard = LeaderGuard {
                    calls: &self.calls,
                    key,
                    call: &call,
                    finished: false,
                };
                let value = work();
                call.complete(Slot::Done(value.clone()));
                guard.finished = true;
                drop(guard);
                return Flight {
                    value,
                    shared: false,
                };
            }

            if let Some(value) = call.wait() {
                return Flight {
                    value,
                    shared: true,
                };
            }
            // Leader abandoned: contend for leadership again.
        }
    }

    /// Number of keys with a call in progress.
    pub fn in_flight(&self) -> usize {
        lock(&self.calls).len()
    }
}
