//! A two-tier read-through cache.
//!
//! A [`TieredCache`] sits in front of a [`Loader`] and answers batch lookups from a bounded
//! in-process tier and a shared remote tier such as Redis, loading only what neither tier can
//! answer. Loader misses are remembered as well, and stale values are served as a fallback
//! when nothing fresher is available.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use levelcache::config::LocalTierConfig;
//! use levelcache::{CacheOptions, Loader, TieredCache};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let loader = |keys: Vec<String>| async move {
//!     let values: HashMap<String, Bytes> = keys
//!         .into_iter()
//!         .map(|key| {
//!             let value = Bytes::from(format!("value of {key}"));
//!             (key, value)
//!         })
//!         .collect();
//!     Ok::<_, anyhow::Error>(values)
//! };
//!
//! let options = CacheOptions {
//!     local: Some(LocalTierConfig {
//!         capacity: 1000,
//!         fresh_ttl: Duration::from_secs(60),
//!         negative_ttl: Duration::from_secs(10),
//!     }),
//!     loader: Some(Arc::new(loader) as Arc<dyn Loader>),
//!     ..Default::default()
//! };
//! let cache = TieredCache::new("users", options)?;
//!
//! let lookup = cache.mget(&["alice".into(), "bob".into()]).await;
//! assert_eq!(lookup.values.len(), 2);
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod metrics;

pub mod codec;
pub mod config;
mod engine;
mod error;
pub mod loader;
pub mod local;
pub mod logging;
pub mod remote;


pub use codec::Compression;
pub use config::{Config, ConfigError};
pub use engine::{CacheOptions, Lookup, RemoteTierOptions, TieredCache};
pub use error::Error;
pub use loader::{LoadResult, Loader};
pub use remote::{MemoryStore, RedisStore, RemoteError, RemoteStore};
