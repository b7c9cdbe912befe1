//! Loader contract: the user-supplied source of truth behind a group.
//!
//! A loader is invoked on a full cache miss for a key this node owns. It must
//! be safe to call concurrently for different keys. An error means "value
//! currently unobtainable" and is never cached.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::cache::{Tier, TieredStore};

#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, key: &[u8]) -> anyhow::Result<Bytes>;
}

#[async_trait]
impl<L: Loader + ?Sized> Loader for Arc<L> {
    async fn load(&self, key: &[u8]) -> anyhow::Result<Bytes> {
        (**self).load(key).await
    }
}

/// Adapts an async closure into a [`Loader`].
pub struct FnLoader<F> {
    f: F,
}

impl<F, Fut> FnLoader<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Loader for FnLoader<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    async fn load(&self, key: &[u8]) -> anyhow::Result<Bytes> {
        (self.f)(Bytes::copy_from_slice(key)).await
    }
}

/// Shorthand for `Arc::new(FnLoader::new(f))`.
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn Loader>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    Arc::new(FnLoader::new(f))
}

/// Wraps a loader with an explicitly supplied expiring store.
///
/// Hits in the store skip the inner loader; misses load and populate it. Paired
/// with a zero-quota group this puts all caching and expiry in the hands of the
/// wrapped store.
pub struct CachingLoader<L> {
    inner: L,
    store: Arc<TieredStore>,
}

impl<L: Loader> CachingLoader<L> {
    pub fn new(inner: L, store: Arc<TieredStore>) -> Self {
        Self { inner, store }
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }
}

#[async_trait]
impl<L: Loader> Loader for CachingLoader<L> {
    async fn load(&self, key: &[u8]) -> anyhow::Result<Bytes> {
        if let Some(value) = self.store.get(key) {
            trace!("served from wrapped store");
            return Ok(value);
        }
        let value = self.inner.load(key).await?;
        self.store
            .set(Bytes::copy_from_slice(key), value.clone(), Tier::Main);
        Ok(value)
    }
}
