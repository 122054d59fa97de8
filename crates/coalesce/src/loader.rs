use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use crate::communication::{Pending, Waiter};
use crate::config::LoaderConfig;
use crate::core::batch::{Batch, Registration, SealReason};
use crate::core::dispatch;
use crate::core::handler::BatchFn;
use crate::core::timer::WindowTimer;
use crate::error::{ConfigError, LoadError};
use crate::key::parse_key;
use crate::loaded::Loaded;
use crate::memo::Memo;

/// # Loader
///
/// Coalesces point lookups issued during one request into bulk fetches.
///
/// Every [`load`](Self::load) lands in the currently collecting batch. The
/// batch is dispatched to the [`BatchFn`] as soon as it holds
/// `capacity` unique keys, or `window` after its first key, whichever comes
/// first. Settled keys are memoized for the loader's lifetime, so a key is
/// fetched at most once per request unless it is invalidated.
///
/// `Loader` is a cheap handle: clone it into every resolver task of the
/// request. Build one per request, never share it between requests.
///
/// # Example
///
/// ```
/// # use async_trait::async_trait;
/// # use coalesce::{BatchFn, Fetched, Loaded, Loader, LoaderConfig};
/// # use tokio_util::sync::CancellationToken;
/// struct Doubler;
///
/// #[async_trait]
/// impl BatchFn<u32, u32> for Doubler {
///     async fn load(&self, keys: &[u32], _cancel: CancellationToken) -> anyhow::Result<Fetched<u32, u32>> {
///         Ok(Fetched::Aligned(keys.iter().map(|k| Ok(Some(k * 2))).collect()))
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let loader = Loader::new(Doubler, LoaderConfig::default()).unwrap();
///
/// // Both calls join the same batch; `Doubler` is invoked once with [1, 2].
/// let (a, b) = tokio::join!(loader.load(1), loader.load(2));
/// assert_eq!(a.unwrap(), Loaded::Found(2));
/// assert_eq!(b.unwrap(), Loaded::Found(4));
/// # }
/// ```
///
/// All methods that start a batch must be called from within a tokio runtime.
pub struct Loader<K, V>
where
    K: Send + Sync,
{
    shared: Arc<Shared<K, V>>,
}

struct Shared<K, V>
where
    K: Send + Sync,
{
    config: LoaderConfig,
    batch_fn: Box<dyn BatchFn<K, V>>,
    cancel: CancellationToken,
    memo: RwLock<Memo<K, V>>,
    state: Mutex<State<K, V>>,
}

struct State<K, V> {
    /// The batch accepting keys right now
    active: Batch<K, V>,

    /// Keys of sealed batches whose fetch has not completed yet
    in_flight: HashMap<K, InFlight<V>>,

    /// In-flight keys invalidated before their fetch completed, by batch.
    /// Their late callers still get that fetch's result; it is never cached.
    detached: HashMap<Uuid, Vec<(K, Vec<Waiter<V>>)>>,

    closed: bool,
}

/// A key being fetched by a sealed batch, plus callers that asked for it
/// after the seal.
struct InFlight<V> {
    batch: Uuid,
    late: Vec<Waiter<V>>,
}

impl<K, V> State<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Stops later loads of `key` from joining its running fetch.
    fn detach(&mut self, key: &K) {
        if let Some(in_flight) = self.in_flight.remove(key) {
            self.detached
                .entry(in_flight.batch)
                .or_default()
                .push((key.clone(), in_flight.late));
        }
    }
}

impl<K, V> Loader<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a standalone loader with its own cancellation token.
    pub fn new<F>(batch_fn: F, config: LoaderConfig) -> Result<Self, ConfigError>
    where
        F: BatchFn<K, V>,
    {
        Self::with_cancellation(batch_fn, config, CancellationToken::new())
    }

    /// Builds a loader that closes itself once `cancel` fires.
    ///
    /// Usually called through [`RequestScope::loader`](crate::RequestScope::loader).
    pub fn with_cancellation<F>(
        batch_fn: F,
        config: LoaderConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError>
    where
        F: BatchFn<K, V>,
    {
        config.validate()?;

        let shared = Shared {
            config,
            batch_fn: Box::new(batch_fn),
            cancel,
            memo: RwLock::new(Memo::new()),
            state: Mutex::new(State {
                active: Batch::new(),
                in_flight: HashMap::new(),
                detached: HashMap::new(),
                closed: false,
            }),
        };

        Ok(Self { shared: Arc::new(shared) })
    }

    /// Requests the value for `key`.
    ///
    /// Cached keys and closed loaders resolve immediately. Anything else joins
    /// the collecting batch (or the in-flight fetch already covering `key`)
    /// and resolves when that batch dispatches.
    pub fn load(&self, key: K) -> Pending<V> {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return Pending::ready(Err(LoadError::Closed));
        }
        if let Some(hit) = read(&shared.memo).get(&key) {
            tracing::trace!(?key, "cache hit");
            return Pending::ready(Ok(hit));
        }

        let (waiter, pending) = Waiter::channel();
        let sealed = {
            let mut state = lock(&shared.state);
            if state.closed {
                return Pending::ready(Err(LoadError::Closed));
            }
            // Dispatch writes the memo under the state lock, so this check cannot race it.
            if let Some(hit) = read(&shared.memo).get(&key) {
                return Pending::ready(Ok(hit));
            }
            if let Some(in_flight) = state.in_flight.get_mut(&key) {
                tracing::trace!(?key, "joined in-flight fetch");
                in_flight.late.push(waiter);
                return pending;
            }

            match state.active.push(key, waiter) {
                Registration::Joined => None,
                Registration::Inserted if state.active.len() >= shared.config.capacity => {
                    Some(Shared::seal(&mut state, SealReason::Capacity))
                }
                Registration::Inserted => {
                    if state.active.len() == 1 {
                        let timer = Shared::arm_window(shared, state.active.id());
                        state.active.arm(timer);
                    }
                    None
                }
            }
        };

        if let Some(batch) = sealed {
            Shared::spawn_dispatch(shared, batch);
        }
        pending
    }

    /// Loads every key, returning outcomes in input order.
    ///
    /// The keys are registered before anything is awaited, so they share
    /// batches exactly as concurrent `load` calls would.
    pub async fn load_many<I>(&self, keys: I) -> Vec<Result<Loaded<V>, LoadError>>
    where
        I: IntoIterator<Item = K>,
    {
        let pending: Vec<_> = keys.into_iter().map(|key| self.load(key)).collect();
        join_all(pending).await
    }

    /// Parses `raw` into a key and loads it.
    ///
    /// Unparsable input resolves to [`LoadError::InvalidKey`] without touching
    /// the batch.
    pub fn load_parsed(&self, raw: &str) -> Pending<V>
    where
        K: FromStr,
        K::Err: Display,
    {
        match parse_key::<K>(raw) {
            Ok(key) => self.load(key),
            Err(err) => Pending::ready(Err(err)),
        }
    }

    /// Seeds the cache with a value the caller already holds.
    ///
    /// Existing entries win; returns whether `value` was stored.
    /// Closed loaders store nothing.
    pub fn prime(&self, key: K, value: V) -> bool {
        let state = lock(&self.shared.state);
        if state.closed || self.shared.cancel.is_cancelled() {
            return false;
        }
        write(&self.shared.memo).insert_absent(key, Loaded::Found(value))
    }

    /// Forgets the cached outcome for `key`, typically after a mutation.
    ///
    /// If `key` is being fetched right now, that result is still delivered to
    /// the callers already waiting on it but is not cached, and the next load
    /// of `key` starts a fresh fetch. Returns whether a cached entry was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut state = lock(&self.shared.state);
        state.detach(key);
        write(&self.shared.memo).remove(key)
    }

    /// Forgets every cached outcome, including those of fetches still running.
    pub fn clear(&self) {
        let mut state = lock(&self.shared.state);
        let keys: Vec<K> = state.in_flight.keys().cloned().collect();
        for key in &keys {
            state.detach(key);
        }
        write(&self.shared.memo).clear();
    }

    /// Ends the loader: pending callers of the collecting batch receive
    /// [`LoadError::Closed`], in-flight fetches are cancelled, and later
    /// calls fail fast.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled() || lock(&self.shared.state).closed
    }

    pub fn config(&self) -> LoaderConfig {
        self.shared.config
    }

    /// Number of settled keys held in the cache.
    pub fn cached_len(&self) -> usize {
        read(&self.shared.memo).len()
    }

    /// Number of unique keys in the collecting batch.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.state).active.len()
    }
}

impl<K, V> Shared<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Swaps in a fresh batch and hands back the sealed one.
    fn seal(state: &mut State<K, V>, reason: SealReason) -> Batch<K, V> {
        let mut batch = std::mem::replace(&mut state.active, Batch::new());
        let sealed = batch.seal();
        debug_assert!(sealed.is_ok(), "active batch was not collecting");

        for key in batch.keys() {
            let previous = state.in_flight.insert(
                key.clone(),
                InFlight { batch: batch.id(), late: Vec::new() },
            );
            debug_assert!(previous.is_none(), "key sealed while already in flight");
        }

        tracing::debug!(
            batch = %batch.id(),
            keys = batch.len(),
            waiters = batch.waiter_count(),
            waited = ?batch.opened_at().map(|opened| opened.elapsed()),
            %reason,
            "sealed batch"
        );
        batch
    }

    fn arm_window(this: &Arc<Self>, batch_id: Uuid) -> WindowTimer {
        let window = this.config.window;
        let shared = Arc::clone(this);

        WindowTimer::new(move |armed| {
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(window) => {
                        if WindowTimer::claim(&armed) {
                            Shared::on_window_elapsed(&shared, batch_id);
                        }
                    }
                    _ = shared.cancel.cancelled() => {
                        shared.close();
                    }
                }
            })
        })
    }

    fn on_window_elapsed(this: &Arc<Self>, batch_id: Uuid) {
        let batch = {
            let mut state = lock(&this.state);
            if state.closed || state.active.id() != batch_id || state.active.is_empty() {
                tracing::trace!(batch = %batch_id, "window elapsed for a batch that already sealed");
                return;
            }
            Shared::seal(&mut state, SealReason::Window)
        };
        Shared::spawn_dispatch(this, batch);
    }

    fn spawn_dispatch(this: &Arc<Self>, batch: Batch<K, V>) {
        let shared = Arc::clone(this);
        tokio::spawn(async move {
            shared.dispatch(batch).await;
        });
    }

    async fn dispatch(&self, mut batch: Batch<K, V>) {
        batch.begin_dispatch();

        let span = tracing::debug_span!("dispatch", batch = %batch.id(), keys = batch.len());
        let result = dispatch::fetch(&*self.batch_fn, batch.keys(), &self.cancel)
            .instrument(span)
            .await;

        let late = {
            let mut state = lock(&self.state);
            let batch_id = batch.id();
            // A key still registered under this batch was not invalidated meanwhile.
            let current: Vec<Option<Vec<Waiter<V>>>> = batch
                .keys()
                .iter()
                .map(|key| {
                    let ours = state.in_flight.get(key).is_some_and(|in_flight| in_flight.batch == batch_id);
                    if ours {
                        state.in_flight.remove(key).map(|in_flight| in_flight.late)
                    } else {
                        None
                    }
                })
                .collect();

            if let Ok(outcomes) = &result {
                let mut memo = write(&self.memo);
                for ((key, late), outcome) in batch.keys().iter().zip(&current).zip(outcomes) {
                    if let (Ok(loaded), Some(_)) = (outcome, late) {
                        memo.insert(key.clone(), loaded.clone());
                    }
                }
            }

            let mut late: Vec<(K, Vec<Waiter<V>>)> = batch
                .keys()
                .iter()
                .cloned()
                .zip(current)
                .filter_map(|(key, late)| late.map(|late| (key, late)))
                .collect();
            late.extend(state.detached.remove(&batch_id).unwrap_or_default());
            late
        };

        for (key, waiters) in late {
            batch.absorb(key, waiters);
        }

        match result {
            Ok(outcomes) => {
                let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
                let delivered = batch.resolve(outcomes);
                tracing::debug!(batch = %batch.id(), delivered, failed, "resolved batch");
            }
            Err(err) => {
                tracing::warn!(batch = %batch.id(), keys = batch.len(), error = %err, "batch dispatch failed");
                batch.fail(err);
            }
        }
    }

    fn close(&self) {
        let mut batch = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::replace(&mut state.active, Batch::new())
        };
        self.cancel.cancel();

        if !batch.is_empty() {
            let _ = batch.seal();
            let delivered = batch.fail(LoadError::Closed);
            tracing::debug!(batch = %batch.id(), delivered, reason = %SealReason::Closed, "failed collecting batch");
        }
    }
}

impl<K, V> Clone for Loader<K, V>
where
    K: Send + Sync,
{
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<K, V> Debug for Loader<K, V>
where
    K: Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.shared.config)
            .field("cancelled", &self.shared.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

// A panic while holding these locks leaves the data consistent: every
// critical section either completes its mutation or makes none.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
