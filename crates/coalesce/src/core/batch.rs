use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;
use tokio::time::Instant;
use uuid::Uuid;
use crate::communication::{Outcome, Waiter};
use crate::error::LoadError;
use super::timer::WindowTimer;

/// Lifecycle of a [`Batch`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting keys.
    Collecting,
    /// Closed to new keys, waiting for its dispatch task.
    Sealed,
    /// The batch function is running.
    Dispatching,
    /// Every waiter has been resolved.
    Done,
}

/// Why a batch stopped collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    Capacity,
    Window,
    Closed,
}

impl fmt::Display for SealReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SealReason::Capacity => f.write_str("capacity"),
            SealReason::Window => f.write_str("window"),
            SealReason::Closed => f.write_str("closed"),
        }
    }
}

/// Result of registering a waiter with [`Batch::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// The key was new to the batch.
    Inserted,
    /// The key was already present; the waiter shares its outcome.
    Joined,
}

/// # Batch
///
/// The unique keys gathered during one window, plus every waiter per key.
///
/// Keys keep first-seen order so the batch function sees a stable ordering,
/// while the waiter map lets any number of callers share one key. Each batch
/// carries a UUID so that a window timer can tell whether the batch it was
/// armed for is still the one collecting.
pub(crate) struct Batch<K, V> {
    id: Uuid,
    state: BatchState,
    keys: Vec<K>,
    waiters: HashMap<K, Vec<Waiter<V>>>,
    opened_at: Option<Instant>,
    timer: Option<WindowTimer>,
}

impl<K, V> Batch<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: BatchState::Collecting,
            keys: Vec::new(),
            waiters: HashMap::new(),
            opened_at: None,
            timer: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    #[cfg(test)]
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Number of unique keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        self.waiters.contains_key(key)
    }

    /// When the first key arrived, if any.
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Total callers waiting on this batch.
    pub fn waiter_count(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }

    /// Registers `waiter` for `key`, deduplicating repeated keys.
    ///
    /// # Panics
    ///
    /// If the batch is no longer collecting. The loader only pushes into the
    /// active batch, which is always collecting.
    pub fn push(&mut self, key: K, waiter: Waiter<V>) -> Registration {
        assert_eq!(self.state, BatchState::Collecting, "push into a batch that stopped collecting");
        match self.waiters.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(waiter);
                Registration::Joined
            }
            Entry::Vacant(entry) => {
                self.keys.push(entry.key().clone());
                entry.insert(vec![waiter]);
                if self.opened_at.is_none() {
                    self.opened_at = Some(Instant::now());
                }
                Registration::Inserted
            }
        }
    }

    /// Attaches the window timer for this batch.
    pub fn arm(&mut self, timer: WindowTimer) {
        debug_assert!(self.timer.is_none(), "batch armed twice");
        self.timer = Some(timer);
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(WindowTimer::is_armed)
    }

    /// Stops collecting and disarms the window timer.
    ///
    /// Returns the current state unchanged if the batch was already sealed,
    /// which is how a second seal attempt is rejected.
    pub fn seal(&mut self) -> Result<(), BatchState> {
        if self.state != BatchState::Collecting {
            return Err(self.state);
        }
        if let Some(mut timer) = self.timer.take() {
            timer.disarm();
        }
        self.state = BatchState::Sealed;
        Ok(())
    }

    pub fn begin_dispatch(&mut self) {
        debug_assert_eq!(self.state, BatchState::Sealed);
        self.state = BatchState::Dispatching;
    }

    /// Adds callers that joined `key` after the batch sealed.
    pub fn absorb(&mut self, key: K, late: Vec<Waiter<V>>) {
        if late.is_empty() {
            return;
        }
        self.waiters.entry(key).or_default().extend(late);
    }

    /// Sends each key's outcome to all of its waiters.
    ///
    /// `outcomes` is aligned with [`keys`](Self::keys). Returns how many
    /// callers were still listening.
    pub fn resolve(&mut self, outcomes: Vec<Outcome<V>>) -> usize {
        debug_assert_eq!(outcomes.len(), self.keys.len());
        let mut delivered = 0;
        for (key, outcome) in self.keys.iter().zip(outcomes) {
            if let Some(waiters) = self.waiters.remove(key) {
                delivered += fan_out(waiters, outcome);
            }
        }
        self.state = BatchState::Done;
        delivered
    }

    /// Sends the same error to every waiter of every key.
    pub fn fail(&mut self, err: LoadError) -> usize {
        let mut delivered = 0;
        for (_, waiters) in self.waiters.drain() {
            delivered += fan_out(waiters, Err(err.clone()));
        }
        self.state = BatchState::Done;
        delivered
    }
}

fn fan_out<V: Clone>(waiters: Vec<Waiter<V>>, outcome: Outcome<V>) -> usize {
    waiters
        .into_iter()
        .map(|waiter| waiter.resolve(outcome.clone()))
        .filter(|sent| *sent)
        .count()
}

impl<K, V> fmt::Debug for Batch<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::Pending;
    use crate::loaded::Loaded;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    fn register(batch: &mut Batch<u32, String>, key: u32) -> (Registration, Pending<String>) {
        let (waiter, pending) = Waiter::channel();
        (batch.push(key, waiter), pending)
    }

    #[tokio::test]
    async fn test_push_dedups_and_keeps_order() {
        let mut batch = Batch::new();
        let (first, _p1) = register(&mut batch, 2);
        let (second, _p2) = register(&mut batch, 1);
        let (third, _p3) = register(&mut batch, 2);

        assert_eq!(first, Registration::Inserted);
        assert_eq!(second, Registration::Inserted);
        assert_eq!(third, Registration::Joined);
        assert_eq!(batch.keys(), &[2, 1]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.waiter_count(), 3);
        assert!(batch.contains(&1));
        assert!(batch.opened_at().is_some());
    }

    #[tokio::test]
    async fn test_seal_only_once() {
        let mut batch: Batch<u32, String> = Batch::new();
        assert_eq!(batch.state(), BatchState::Collecting);
        assert_eq!(batch.seal(), Ok(()));
        assert_eq!(batch.state(), BatchState::Sealed);
        assert_eq!(batch.seal(), Err(BatchState::Sealed));

        batch.begin_dispatch();
        assert_eq!(batch.seal(), Err(BatchState::Dispatching));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seal_disarms_timer() {
        let mut batch: Batch<u32, String> = Batch::new();
        batch.arm(WindowTimer::new(|_armed| tokio::spawn(async {})));
        assert!(batch.is_armed());
        batch.seal().unwrap();
        assert!(!batch.is_armed());
    }

    #[tokio::test]
    async fn test_resolve_fans_out_identical_outcomes() {
        let mut batch = Batch::new();
        let (_, a1) = register(&mut batch, 1);
        let (_, b) = register(&mut batch, 2);
        let (_, a2) = register(&mut batch, 1);
        batch.seal().unwrap();
        batch.begin_dispatch();

        let delivered = batch.resolve(vec![
            Ok(Loaded::Found("one".to_string())),
            Ok(Loaded::NotFound),
        ]);

        assert_eq!(delivered, 3);
        assert_eq!(batch.state(), BatchState::Done);
        assert_eq!(a1.await.unwrap(), Loaded::Found("one".to_string()));
        assert_eq!(a2.await.unwrap(), Loaded::Found("one".to_string()));
        assert_eq!(b.await.unwrap(), Loaded::NotFound);
    }

    #[tokio::test]
    async fn test_absorb_late_waiters() {
        let mut batch = Batch::new();
        let (_, early) = register(&mut batch, 5);
        batch.seal().unwrap();

        let (late_waiter, late) = Waiter::channel();
        batch.absorb(5, vec![late_waiter]);
        batch.absorb(5, vec![]);
        batch.resolve(vec![Ok(Loaded::Found("five".to_string()))]);

        assert_eq!(early.await.unwrap(), Loaded::Found("five".to_string()));
        assert_eq!(late.await.unwrap(), Loaded::Found("five".to_string()));
    }

    #[tokio::test]
    async fn test_fail_reaches_every_waiter() {
        let mut batch = Batch::new();
        let (_, p8) = register(&mut batch, 8);
        let (_, p9) = register(&mut batch, 9);
        batch.seal().unwrap();

        let delivered = batch.fail(LoadError::dispatch(anyhow!("database down")));
        assert_eq!(delivered, 2);

        let e8 = p8.await.unwrap_err();
        let e9 = p9.await.unwrap_err();
        match (e8, e9) {
            (LoadError::Dispatch(a), LoadError::Dispatch(b)) => assert!(std::sync::Arc::ptr_eq(&a, &b)),
            other => panic!("unexpected errors {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_counts_only_listening_callers() {
        let mut batch = Batch::new();
        let (_, kept) = register(&mut batch, 1);
        let (_, dropped) = register(&mut batch, 1);
        drop(dropped);
        batch.seal().unwrap();

        assert_eq!(batch.resolve(vec![Ok(Loaded::NotFound)]), 1);
        assert_eq!(kept.await.unwrap(), Loaded::NotFound);
    }

    #[test]
    #[should_panic(expected = "stopped collecting")]
    fn test_push_after_seal_panics() {
        let mut batch: Batch<u32, String> = Batch::new();
        batch.seal().unwrap();
        let (waiter, _pending) = Waiter::channel();
        batch.push(1, waiter);
    }
}
