//! The injected page source contract.
//!
//! The engine never fetches anything itself; the host hands it a
//! `PageSource` and the fetcher drives it one request at a time. Sources
//! signal expected failures by returning `LoadResult::Failure`: the
//! result is data, and one failed page never tears the pipeline down.

use std::future::Future;

use futures::future::BoxFuture;

use crate::error::LoadError;

/// Which axis a load serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadType {
    /// Start over from the initial key.
    Refresh,
    /// Extend the list at the end from the current next key.
    Append,
}

/// One load request.
#[derive(Clone, Debug)]
pub struct LoadParams<K> {
    pub load_type: LoadType,
    pub key: K,
    pub page_size: usize,
}

/// One load response.
#[derive(Clone, Debug)]
pub enum LoadResult<T, K> {
    /// A page of items; `next_key: None` means the source is exhausted
    /// in the append direction.
    Success { items: Vec<T>, next_key: Option<K> },
    /// The load failed; the axis enters `Failure` and waits for retry.
    Failure { error: LoadError },
}

/// Abstract data source: the only thing the engine knows about where
/// items come from.
pub trait PageSource<T, K>: Send + Sync {
    fn load(&self, params: LoadParams<K>) -> BoxFuture<'static, LoadResult<T, K>>;
}

// Closures returning futures are sources; tests and hosts inject
// `move |params| async move { .. }` directly.
impl<T, K, F, Fut> PageSource<T, K> for F
where
    F: Fn(LoadParams<K>) -> Fut + Send + Sync,
    Fut: Future<Output = LoadResult<T, K>> + Send + 'static,
{
    fn load(&self, params: LoadParams<K>) -> BoxFuture<'static, LoadResult<T, K>> {
        Box::pin(self(params))
    }
}
