use std::fmt::Debug;
use std::hash::Hash;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::config::LoaderConfig;
use crate::core::handler::BatchFn;
use crate::error::ConfigError;
use crate::loader::Loader;

/// # RequestScope
///
/// The lifetime of one top-level unit of work, typically one API request.
///
/// Loaders built from a scope share its cancellation token. When the scope
/// finishes (explicitly or by being dropped) every such loader closes: callers
/// still waiting on a collecting batch get [`LoadError::Closed`], in-flight
/// fetches see their token cancelled, and further loads fail fast.
///
/// [`LoadError::Closed`]: crate::LoadError::Closed
///
/// # Example
///
/// ```
/// # use async_trait::async_trait;
/// # use coalesce::{BatchFn, Fetched, LoadError, Loader, LoaderConfig, RequestScope};
/// # use tokio_util::sync::CancellationToken;
/// # struct Names;
/// # #[async_trait]
/// # impl BatchFn<u32, String> for Names {
/// #     async fn load(&self, keys: &[u32], _c: CancellationToken) -> anyhow::Result<Fetched<u32, String>> {
/// #         Ok(Fetched::found(keys.iter().map(|k| (*k, k.to_string()))))
/// #     }
/// # }
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scope = RequestScope::new();
/// let names: Loader<u32, String> = scope.loader(Names, LoaderConfig::default()).unwrap();
///
/// assert!(names.load(1).await.is_ok());
///
/// scope.finish();
/// assert!(matches!(names.load(2).await, Err(LoadError::Closed)));
/// # }
/// ```
#[derive(Debug)]
pub struct RequestScope {
    id: Uuid,
    cancel: CancellationToken,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::with_parent(&CancellationToken::new())
    }

    /// A scope that also ends when `parent` is cancelled, e.g. on server shutdown.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        let scope = Self {
            id: Uuid::new_v4(),
            cancel: parent.child_token(),
        };
        tracing::debug!(scope = %scope.id, "request scope started");
        scope
    }

    /// Identifier for correlating log lines of one request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A token cancelled when this scope ends, for collaborators outside the loaders.
    pub fn token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_finished(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Builds a loader bound to this scope.
    pub fn loader<K, V, F>(&self, batch_fn: F, config: LoaderConfig) -> Result<Loader<K, V>, ConfigError>
    where
        K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: BatchFn<K, V>,
    {
        Loader::with_cancellation(batch_fn, config, self.cancel.child_token())
    }

    /// Ends the scope and closes every loader built from it.
    pub fn finish(self) {
        drop(self);
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            tracing::debug!(scope = %self.id, "request scope finished");
        }
    }
}
