use std::collections::HashMap;
use std::future::Future;

use bytes::Bytes;
use futures::future::BoxFuture;

/// What a [`Loader`] returns: a value for every key it knows about.
///
/// Requested keys missing from the map are confirmed misses and get negatively cached.
pub type LoadResult = anyhow::Result<HashMap<String, Bytes>>;

/// The origin the cache shields.
///
/// A loader is invoked at most once per lookup, with all keys no tier could answer.
/// Concurrent lookups of the same key each invoke the loader, implementations wanting
/// request coalescing can wrap another loader and deduplicate in-flight keys.
pub trait Loader: Send + Sync + 'static {
    fn load<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, LoadResult>;
}

impl<F, Fut> Loader for F
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult> + Send + 'static,
{
    fn load<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, LoadResult> {
        Box::pin(self(keys.to_vec()))
    }
}
