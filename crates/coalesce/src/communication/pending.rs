use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::error::LoadError;
use crate::loaded::Loaded;
use super::Outcome;

/// # Pending
///
/// The deferred result of [`Loader::load`](crate::Loader::load).
///
/// Either already resolved (a cache hit, a closed loader, a malformed key) or
/// waiting on the batch that owns the key. Awaiting it yields
/// `Result<Loaded<V>, LoadError>`.
///
/// Dropping a `Pending` does not cancel the batch; other callers of the same
/// key are unaffected.
#[must_use = "a Pending does nothing unless awaited"]
#[derive(Debug)]
pub struct Pending<V> {
    inner: Inner<V>,
}

#[derive(Debug)]
enum Inner<V> {
    Ready(Option<Outcome<V>>),
    Waiting(oneshot::Receiver<Outcome<V>>),
}

impl<V> Pending<V> {
    pub(crate) fn ready(outcome: Outcome<V>) -> Self {
        Self { inner: Inner::Ready(Some(outcome)) }
    }

    pub(crate) fn waiting(receiver: oneshot::Receiver<Outcome<V>>) -> Self {
        Self { inner: Inner::Waiting(receiver) }
    }

    /// `true` if awaiting will complete without waiting on a batch.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Inner::Ready(_))
    }
}

// The outcome is only ever moved out, never pinned in place.
impl<V> Unpin for Pending<V> {}

impl<V> Future for Pending<V> {
    type Output = Result<Loaded<V>, LoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Ready(outcome) => Poll::Ready(outcome.take().unwrap_or(Err(LoadError::Dropped))),
            Inner::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(LoadError::Dropped))),
        }
    }
}
