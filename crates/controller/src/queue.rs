//! De-duplicating work queue keyed by object identity.
//!
//! Event triggers (`add`) and interval timers (`add_after`) feed the same
//! queue. A key is pending at most once, and a key that is being processed is
//! never handed to a second worker: re-adds while active are parked until
//! `done`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::AbortHandle;

struct QueueState<K> {
    ready: VecDeque<K>,
    /// Keys waiting in `ready`, or re-added while active.
    pending: HashSet<K>,
    active: HashSet<K>,
    /// Live timer per key. A timer task that lost the race with its own abort
    /// finds its token replaced.
    timers: HashMap<K, (u64, AbortHandle)>,
    next_token: u64,
    shutdown: bool,
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                pending: HashSet::new(),
                active: HashSet::new(),
                timers: HashMap::new(),
                next_token: 0,
                shutdown: false,
            }),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue `key` now. Supersedes any timer scheduled for it.
    pub fn add(&self, key: K) {
        let mut st = self.lock();
        if st.shutdown {
            return;
        }
        if let Some((_, timer)) = st.timers.remove(&key) {
            timer.abort();
        }
        if !st.pending.insert(key.clone()) || st.active.contains(&key) {
            return;
        }
        st.ready.push_back(key);
        drop(st);
        self.notify.notify_one();
    }

    /// Enqueue `key` once `delay` has elapsed, replacing any earlier timer.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        let mut st = self.lock();
        if st.shutdown {
            return;
        }
        st.next_token += 1;
        let token = st.next_token;
        let queue = Arc::downgrade(self);
        let timer_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(q) = queue.upgrade() {
                q.fire(timer_key, token);
            }
        });
        if let Some((_, old)) = st.timers.insert(key, (token, task.abort_handle())) {
            old.abort();
        }
    }

    fn fire(&self, key: K, token: u64) {
        let live = {
            let mut st = self.lock();
            if st.timers.get(&key).map(|(t, _)| *t) == Some(token) {
                st.timers.remove(&key);
                true
            } else {
                false
            }
        };
        if live {
            self.add(key);
        }
    }

    /// Drop pending work and timers for `key`. An in-flight attempt is not
    /// interrupted.
    pub fn forget(&self, key: &K) {
        let mut st = self.lock();
        if let Some((_, timer)) = st.timers.remove(key) {
            timer.abort();
        }
        if st.pending.remove(key) {
            st.ready.retain(|k| k != key);
        }
    }

    /// Drop the timer for `key` only. A re-add parked while `key` is active is
    /// kept and released by `done`.
    pub fn cancel_timer(&self, key: &K) {
        if let Some((_, timer)) = self.lock().timers.remove(key) {
            timer.abort();
        }
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut st = self.lock();
                if st.shutdown {
                    return None;
                }
                if let Some(key) = st.ready.pop_front() {
                    st.pending.remove(&key);
                    st.active.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` finished; a re-add that arrived meanwhile is released.
    pub fn done(&self, key: &K) {
        let mut st = self.lock();
        st.active.remove(key);
        if st.pending.contains(key) {
            st.ready.push_back(key.clone());
            drop(st);
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        let mut st = self.lock();
        st.shutdown = true;
        for (_, (_, timer)) in st.timers.drain() {
            timer.abort();
        }
        drop(st);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool { self.lock().shutdown }

    /// Keys ready to be handed out.
    pub fn len(&self) -> usize { self.lock().ready.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Keys with a live timer.
    pub fn scheduled(&self) -> usize { self.lock().timers.len() }

    pub fn is_active(&self, key: &K) -> bool { self.lock().active.contains(key) }
}
