use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::communication::Outcome;
use crate::error::LoadError;
use crate::loaded::Loaded;

/// Per-key result reported by a batch function.
///
/// `Ok(None)` means the key does not exist, `Err` is a failure that only
/// that key's callers will see.
pub type KeyResult<V> = Result<Option<V>, anyhow::Error>;

/// # Fetched
///
/// The two shapes a [`BatchFn`] may answer with.
///
/// * `Aligned` - one result per requested key, in request order. A length
///   mismatch fails the whole batch.
/// * `Keyed` - results by key. Keys missing from the map are not found, keys
///   that were never requested are ignored.
#[derive(Debug)]
pub enum Fetched<K, V> {
    Aligned(Vec<KeyResult<V>>),
    Keyed(HashMap<K, KeyResult<V>>),
}

impl<K, V> Fetched<K, V>
where
    K: Eq + Hash + Debug,
{
    /// Keyed response built from rows that were found; everything else is not found.
    pub fn found<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        Fetched::Keyed(rows.into_iter().map(|(k, v)| (k, Ok(Some(v)))).collect())
    }

    /// Aligns the response with `keys`, one outcome per key.
    pub(crate) fn normalize(self, keys: &[K]) -> Result<Vec<Outcome<V>>, anyhow::Error> {
        match self {
            Fetched::Aligned(results) => {
                if results.len() != keys.len() {
                    return Err(anyhow!(
                        "batch function returned {} results for {} keys",
                        results.len(),
                        keys.len()
                    ));
                }
                Ok(results.into_iter().map(into_outcome).collect())
            }
            Fetched::Keyed(mut results) => {
                let outcomes = keys
                    .iter()
                    .map(|key| match results.remove(key) {
                        Some(result) => into_outcome(result),
                        None => Ok(Loaded::NotFound),
                    })
                    .collect();
                if !results.is_empty() {
                    tracing::debug!(
                        unrequested = ?results.keys().collect::<Vec<_>>(),
                        "batch function returned keys that were not requested"
                    );
                }
                Ok(outcomes)
            }
        }
    }
}

impl<K, V> From<Vec<KeyResult<V>>> for Fetched<K, V> {
    fn from(results: Vec<KeyResult<V>>) -> Self {
        Fetched::Aligned(results)
    }
}

impl<K, V> From<HashMap<K, KeyResult<V>>> for Fetched<K, V> {
    fn from(results: HashMap<K, KeyResult<V>>) -> Self {
        Fetched::Keyed(results)
    }
}

fn into_outcome<V>(result: KeyResult<V>) -> Outcome<V> {
    match result {
        Ok(value) => Ok(Loaded::from(value)),
        Err(err) => Err(LoadError::key(err)),
    }
}

/// # BatchFn
///
/// The storage-side collaborator of a [`Loader`](crate::Loader).
///
/// Receives the deduplicated keys of one batch, in the order they were first
/// requested, and a cancellation token tied to the request scope. Returning
/// `Err` fails every caller in the batch and caches nothing; per-key problems
/// belong inside [`Fetched`].
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use async_trait::async_trait;
/// use coalesce::{BatchFn, Fetched};
/// use tokio_util::sync::CancellationToken;
///
/// struct Squares;
///
/// #[async_trait]
/// impl BatchFn<u64, u64> for Squares {
///     async fn load(&self, keys: &[u64], _cancel: CancellationToken) -> anyhow::Result<Fetched<u64, u64>> {
///         Ok(Fetched::found(keys.iter().map(|k| (*k, k * k))))
///     }
/// }
/// ```
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static
where
    K: Send + Sync,
{
    async fn load(&self, keys: &[K], cancel: CancellationToken) -> anyhow::Result<Fetched<K, V>>;
}

#[async_trait]
impl<K, V, T> BatchFn<K, V> for Arc<T>
where
    K: Send + Sync + 'static,
    V: 'static,
    T: BatchFn<K, V> + ?Sized,
{
    async fn load(&self, keys: &[K], cancel: CancellationToken) -> anyhow::Result<Fetched<K, V>> {
        (**self).load(keys, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unwrap_all(outcomes: Vec<Outcome<&'static str>>) -> Vec<Result<Loaded<&'static str>, String>> {
        outcomes.into_iter().map(|o| o.map_err(|e| e.to_string())).collect()
    }

    #[test]
    fn test_aligned_maps_in_order() {
        let fetched: Fetched<u32, &str> = Fetched::Aligned(vec![
            Ok(Some("one")),
            Ok(None),
            Err(anyhow!("locked")),
        ]);
        let outcomes = fetched.normalize(&[1, 2, 3]).unwrap();
        assert_eq!(
            unwrap_all(outcomes),
            vec![
                Ok(Loaded::Found("one")),
                Ok(Loaded::NotFound),
                Err("failed to load key: locked".to_string()),
            ]
        );
    }

    #[test]
    fn test_aligned_length_mismatch_fails_batch() {
        let fetched: Fetched<u32, &str> = vec![Ok(Some("one"))].into();
        let err = fetched.normalize(&[1, 2]).unwrap_err();
        assert_eq!(err.to_string(), "batch function returned 1 results for 2 keys");
    }

    #[test]
    fn test_keyed_missing_is_not_found() {
        let mut map = HashMap::new();
        map.insert(2, Ok(Some("two")));
        map.insert(9, Ok(Some("never asked")));
        let fetched: Fetched<u32, &str> = map.into();
        let outcomes = fetched.normalize(&[1, 2]).unwrap();
        assert_eq!(
            unwrap_all(outcomes),
            vec![Ok(Loaded::NotFound), Ok(Loaded::Found("two"))]
        );
    }

    #[test]
    fn test_found_constructor() {
        let fetched = Fetched::found(vec![(7u32, "seven")]);
        let outcomes = fetched.normalize(&[7, 8]).unwrap();
        assert_eq!(
            unwrap_all(outcomes),
            vec![Ok(Loaded::Found("seven")), Ok(Loaded::NotFound)]
        );
    }

    struct Echo;

    #[async_trait]
    impl BatchFn<u32, u32> for Echo {
        async fn load(&self, keys: &[u32], _cancel: CancellationToken) -> anyhow::Result<Fetched<u32, u32>> {
            Ok(Fetched::Aligned(keys.iter().map(|k| Ok(Some(*k))).collect()))
        }
    }

    #[tokio::test]
    async fn test_arc_forwards() {
        let shared: Arc<dyn BatchFn<u32, u32>> = Arc::new(Echo);
        let fetched = shared.load(&[4, 5], CancellationToken::new()).await.unwrap();
        let outcomes: Vec<_> = fetched.normalize(&[4, 5]).unwrap().into_iter().map(Result::unwrap).collect();
        assert_eq!(outcomes, vec![Loaded::Found(4), Loaded::Found(5)]);
    }
}
