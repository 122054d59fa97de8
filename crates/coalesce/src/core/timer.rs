//! Single-shot window timers for collecting batches.

use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tokio::task::JoinHandle;

/// A handle to the background task that seals a batch when its window elapses.
///
/// The task receives an `armed` flag and must claim it with
/// [`WindowTimer::claim`] before sealing. Disarming clears the flag and
/// aborts the task, so a timer that has already woken up but lost the race
/// against a capacity seal can never seal a second time.
///
/// # Example
///
/// ```ignore
/// let timer = WindowTimer::new(|armed| {
///     tokio::spawn(async move {
///         tokio::time::sleep(window).await;
///         if WindowTimer::claim(&armed) {
///             // seal the batch
///         }
///     })
/// });
/// ```
#[derive(Debug)]
pub(crate) struct WindowTimer {
    /// Cleared once the timer fires or is disarmed
    armed: Arc<AtomicBool>,

    /// Handle to the spawned timer task, becomes `None` once disarmed
    handle: Option<JoinHandle<()>>,
}

impl WindowTimer {
    /// Arms a timer by spawning `task` with the shared `armed` flag.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) -> JoinHandle<()>,
    {
        let armed = Arc::new(AtomicBool::new(true));
        let handle = task(armed.clone());

        Self {
            armed,
            handle: Some(handle),
        }
    }

    /// Takes the right to fire. Only the first caller across the timer task
    /// and [`disarm`](Self::disarm) wins.
    pub fn claim(armed: &AtomicBool) -> bool {
        armed.swap(false, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Prevents the timer from firing and stops its task.
    ///
    /// Safe to call repeatedly, and from inside the timer task itself: the
    /// abort only takes effect at the task's next await point.
    pub fn disarm(&mut self) {
        self.armed.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for WindowTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
