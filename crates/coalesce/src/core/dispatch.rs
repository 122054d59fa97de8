use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use anyhow::anyhow;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use crate::communication::Outcome;
use crate::error::LoadError;
use super::handler::BatchFn;

/// Runs the batch function once for `keys` and aligns its answer with them.
///
/// The whole call fails, with nothing to cache, when the batch function
/// returns an error, panics, answers with a malformed shape, or when `cancel`
/// fires first. The batch function receives a child of `cancel` so it can
/// stop its own I/O early.
pub(crate) async fn fetch<K, V>(
    batch_fn: &dyn BatchFn<K, V>,
    keys: &[K],
    cancel: &CancellationToken,
) -> Result<Vec<Outcome<V>>, LoadError>
where
    K: Eq + Hash + Debug + Send + Sync + 'static,
    V: 'static,
{
    let call = AssertUnwindSafe(batch_fn.load(keys, cancel.child_token())).catch_unwind();

    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LoadError::Cancelled),
        result = call => result,
    };

    let fetched = match fetched {
        Ok(Ok(fetched)) => fetched,
        Ok(Err(err)) => return Err(LoadError::dispatch(err)),
        Err(panic) => return Err(LoadError::dispatch(anyhow!("batch function panicked: {}", panic_message(&*panic)))),
    };

    fetched.normalize(keys).map_err(LoadError::dispatch)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::core::handler::Fetched;
    use crate::loaded::Loaded;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<Vec<u32>>>,
    }

    #[async_trait]
    impl BatchFn<u32, String> for Recording {
        async fn load(&self, keys: &[u32], _cancel: CancellationToken) -> anyhow::Result<Fetched<u32, String>> {
            self.calls.lock().unwrap().push(keys.to_vec());
            Ok(Fetched::found(keys.iter().filter(|k| **k % 2 == 0).map(|k| (*k, format!("v{k}")))))
        }
    }

    struct Failing;

    #[async_trait]
    impl BatchFn<u32, String> for Failing {
        async fn load(&self, _keys: &[u32], _cancel: CancellationToken) -> anyhow::Result<Fetched<u32, String>> {
            Err(anyhow!("connection refused"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl BatchFn<u32, String> for Panicking {
        async fn load(&self, _keys: &[u32], _cancel: CancellationToken) -> anyhow::Result<Fetched<u32, String>> {
            panic!("bad row");
        }
    }

    struct Slow;

    #[async_trait]
    impl BatchFn<u32, String> for Slow {
        async fn load(&self, _keys: &[u32], cancel: CancellationToken) -> anyhow::Result<Fetched<u32, String>> {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(Fetched::Aligned(vec![Ok(None)])),
                _ = cancel.cancelled() => Err(anyhow!("aborted")),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_calls_once_with_keys() {
        let batch_fn = Recording::default();
        let outcomes = fetch(&batch_fn, &[1, 2], &CancellationToken::new()).await.unwrap();

        assert_eq!(*batch_fn.calls.lock().unwrap(), vec![vec![1, 2]]);
        let outcomes: Vec<_> = outcomes.into_iter().map(Result::unwrap).collect();
        assert_eq!(outcomes, vec![Loaded::NotFound, Loaded::Found("v2".to_string())]);
    }

    #[tokio::test]
    async fn test_fetch_wraps_whole_call_error() {
        let err = fetch(&Failing, &[8, 9], &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LoadError::Dispatch(_)));
        assert_eq!(err.to_string(), "batch dispatch failed: connection refused");
    }

    #[tokio::test]
    async fn test_fetch_contains_panics() {
        let err = fetch(&Panicking, &[1], &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "batch dispatch failed: batch function panicked: bad row");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_observes_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let err = fetch(&Slow, &[1], &cancel).await.unwrap_err();
        assert!(matches!(err, LoadError::Cancelled));
    }

    #[tokio::test]
    async fn test_fetch_already_cancelled_skips_call() {
        let batch_fn = Recording::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetch(&batch_fn, &[1], &cancel).await.unwrap_err();
        assert!(matches!(err, LoadError::Cancelled));
        assert!(batch_fn.calls.lock().unwrap().is_empty());
    }
}
