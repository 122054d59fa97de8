use tokio::sync::oneshot;
use crate::error::LoadError;
use crate::loaded::Loaded;
use super::Pending;

/// What every waiter for a key ultimately receives.
pub(crate) type Outcome<V> = Result<Loaded<V>, LoadError>;

/// # Waiter
///
/// The batch-side half of a single `load` call.
///
/// A `Waiter` owns the sending end of a oneshot channel whose receiving end
/// lives inside the caller's [`Pending`]. Resolving consumes the waiter, so it
/// can complete at most once. Dropping it unresolved surfaces to the caller as
/// [`LoadError::Dropped`].
#[derive(Debug)]
pub(crate) struct Waiter<V> {
    /// Channel for sending the outcome back to the caller
    sender: oneshot::Sender<Outcome<V>>,
}

impl<V> Waiter<V> {
    /// Creates a connected waiter and caller-side future.
    pub fn channel() -> (Self, Pending<V>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, Pending::waiting(receiver))
    }

    /// Sends the outcome to the caller.
    ///
    /// Returns `false` if the caller stopped waiting; that is not an error for
    /// the batch, the outcome is simply discarded.
    pub fn resolve(self, outcome: Outcome<V>) -> bool {
        self.sender.send(outcome).is_ok()
    }

    #[cfg(test)]
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}
