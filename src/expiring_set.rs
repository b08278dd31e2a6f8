//! Time-bounded membership set with a self-managing sweep worker.
//!
//! Every element carries its own expiry. A background sweep thread is started
//! lazily by the first insertion and stops itself once the set has drained
//! and no later expiry is pending, so an idle set costs nothing.
//!
//! ## Worker lifecycle
//!
//! `Idle -> Running -> Idle`. The transition to `Running` happens inside
//! [`ExpiringSet::add_for`] under the same lock that guards the entries, and
//! the worker only returns to `Idle` while holding that lock after observing
//! an empty set. An insertion racing with a stopping worker therefore either
//! lands before the emptiness check (worker keeps going) or after the flag is
//! cleared (insertion starts a fresh worker).
//!
//! ## Sweeps
//!
//! [`ExpiringSet::sweep`] may be driven externally as well as by the worker.
//! Only one pass runs at a time; overlapping calls return immediately. A
//! panicking removal callback is caught and logged and never kills the worker.
//!
//! The worker is a plain OS thread so the set works from synchronous code and
//! outside any async runtime. It holds only a weak reference to the set and
//! exits on its next tick once the set is dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{log_debug, log_error};

/// Default time-to-live for inserted elements.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

type RemovalCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct State<T> {
    entries: HashMap<T, Instant>,
    last: Option<Instant>,
    worker: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    sweeping: AtomicBool,
    ttl: Duration,
    check_period: Duration,
    on_remove: Option<RemovalCallback<T>>,
}

/// A concurrent set whose elements expire after a per-insertion TTL.
///
/// Cloning is cheap and yields a handle onto the same set.
///
/// ```
/// use mom_messenger::ExpiringSet;
/// use std::time::Duration;
///
/// let seen = ExpiringSet::builder().ttl(Duration::from_secs(5)).build();
/// assert!(!seen.contains_or_add(42));
/// assert!(seen.contains_or_add(42));
/// ```
pub struct ExpiringSet<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ExpiringSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`ExpiringSet`].
pub struct ExpiringSetBuilder<T> {
    ttl: Duration,
    check_period: Option<Duration>,
    on_remove: Option<RemovalCallback<T>>,
}

impl<T> ExpiringSetBuilder<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    /// Default TTL used by [`ExpiringSet::add`] and [`ExpiringSet::contains_or_add`].
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Interval between sweep passes. Defaults to half the TTL.
    pub fn check_period(mut self, period: Duration) -> Self {
        self.check_period = Some(period);
        self
    }

    /// Callback invoked once for every element removed by a sweep.
    pub fn on_remove<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_remove = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> ExpiringSet<T> {
        // ---
        let check_period = self
            .check_period
            .unwrap_or(self.ttl / 2)
            .max(Duration::from_millis(1));

        ExpiringSet {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    last: None,
                    worker: false,
                }),
                sweeping: AtomicBool::new(false),
                ttl: self.ttl,
                check_period,
                on_remove: self.on_remove,
            }),
        }
    }
}

impl<T> Default for ExpiringSet<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<T> ExpiringSet<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    // ---

    /// Create a set with the given default TTL and a check period of `ttl / 2`.
    pub fn new(ttl: Duration) -> Self {
        Self::builder().ttl(ttl).build()
    }

    pub fn builder() -> ExpiringSetBuilder<T> {
        ExpiringSetBuilder {
            ttl: DEFAULT_TTL,
            check_period: None,
            on_remove: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn check_period(&self) -> Duration {
        self.inner.check_period
    }

    /// Insert `element` with the default TTL.
    ///
    /// Returns the element's previous expiry if it was already present.
    pub fn add(&self, element: T) -> Option<Instant> {
        self.add_for(element, self.inner.ttl)
    }

    /// Insert `element` expiring `ttl` from now, overwriting any existing expiry.
    ///
    /// Returns the previous expiry if the element was already present.
    pub fn add_for(&self, element: T, ttl: Duration) -> Option<Instant> {
        // ---
        let expiry = Instant::now() + ttl;

        let (previous, spawn) = {
            let mut state = self.inner.state.lock();
            let previous = state.entries.insert(element, expiry);
            state.last = Some(state.last.map_or(expiry, |last| last.max(expiry)));
            let spawn = !state.worker;
            state.worker = true;
            (previous, spawn)
        };

        if spawn {
            self.spawn_worker();
        }

        previous
    }

    /// Returns `true` if `element` was present and unexpired; otherwise inserts
    /// it with the default TTL and returns `false`.
    pub fn contains_or_add(&self, element: T) -> bool {
        self.contains_or_add_for(element, self.inner.ttl)
    }

    /// Like [`contains_or_add`](Self::contains_or_add) with an explicit TTL.
    pub fn contains_or_add_for(&self, element: T, ttl: Duration) -> bool {
        // ---
        let now = Instant::now();
        let expiry = now + ttl;

        let spawn = {
            let mut state = self.inner.state.lock();

            if let Some(existing) = state.entries.get(&element) {
                if *existing > now {
                    return true;
                }
            }

            state.entries.insert(element, expiry);
            state.last = Some(state.last.map_or(expiry, |last| last.max(expiry)));
            let spawn = !state.worker;
            state.worker = true;
            spawn
        };

        if spawn {
            self.spawn_worker();
        }

        false
    }

    /// Whether `element` is present and its expiry has not passed.
    pub fn contains(&self, element: &T) -> bool {
        let now = Instant::now();
        self.inner
            .state
            .lock()
            .entries
            .get(element)
            .is_some_and(|expiry| *expiry > now)
    }

    /// The recorded expiry of `element`, if present.
    pub fn expiry_of(&self, element: &T) -> Option<Instant> {
        self.inner.state.lock().entries.get(element).copied()
    }

    /// Remove `element` without invoking the removal callback.
    pub fn remove(&self, element: &T) -> bool {
        self.inner.state.lock().entries.remove(element).is_some()
    }

    /// Drop every element. A running worker stops on its next tick.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.entries.clear();
        state.last = None;
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Whether the sweep worker is currently alive.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().worker
    }

    /// Run one sweep pass now.
    ///
    /// Returns the number of elements removed, or `None` if another pass was
    /// already in progress.
    pub fn sweep(&self) -> Option<usize> {
        Inner::sweep(&self.inner)
    }

    fn spawn_worker(&self) {
        // ---
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.check_period;

        let spawned = thread::Builder::new()
            .name("expiring-set-sweep".into())
            .spawn(move || Inner::run_worker(weak, period));

        if let Err(err) = spawned {
            log_error!("expiring set: failed to spawn sweep worker: {err}");
            self.inner.state.lock().worker = false;
        }
    }
}

impl<T> Inner<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    // ---

    fn run_worker(weak: Weak<Self>, period: Duration) {
        // ---
        log_debug!("expiring set: sweep worker started");

        loop {
            thread::sleep(period);

            let Some(inner) = weak.upgrade() else {
                break;
            };

            Self::sweep(&inner);

            let mut state = inner.state.lock();
            let idle = state.entries.is_empty()
                && state.last.map_or(true, |last| last <= Instant::now());
            if idle {
                state.worker = false;
                state.last = None;
                break;
            }
        }

        log_debug!("expiring set: sweep worker stopped");
    }

    fn sweep(inner: &Arc<Self>) -> Option<usize> {
        // ---
        if inner
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let now = Instant::now();
        let expired: Vec<T> = {
            let mut state = inner.state.lock();
            let expired: Vec<T> = state
                .entries
                .iter()
                .filter(|(_, expiry)| **expiry <= now)
                .map(|(element, _)| element.clone())
                .collect();
            for element in &expired {
                state.entries.remove(element);
            }
            expired
        };

        if let Some(callback) = &inner.on_remove {
            for element in &expired {
                let result = catch_unwind(AssertUnwindSafe(|| callback(element)));
                if result.is_err() {
                    log_error!("expiring set: removal callback panicked");
                }
            }
        }

        inner.sweeping.store(false, Ordering::Release);
        Some(expired.len())
    }
}
