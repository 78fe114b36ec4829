//! Helpers for testing the cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test, e.g. `let dir = levelcache_test::tempdir()`.
//!
//!  - Tests talking to a real Redis use [`redis_url!`] and are skipped when
//!    `LEVELCACHE_TEST_REDIS_URL` is not set.

use std::sync::{Arc, Mutex};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `levelcache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("levelcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Records the batches of keys a loader was called with.
#[derive(Debug, Clone, Default)]
pub struct KeyRecorder {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl KeyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call, with its keys sorted.
    pub fn record(&self, keys: &[String]) {
        let mut keys = keys.to_vec();
        keys.sort();
        self.calls.lock().unwrap().push(keys);
    }

    /// Returns all calls recorded since the last invocation of this method.
    pub fn take(&self) -> Vec<Vec<String>> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// The number of calls recorded so far, without resetting them.
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Returns the url of the Redis instance to test against, if configured.
pub fn redis_url() -> Option<String> {
    std::env::var("LEVELCACHE_TEST_REDIS_URL")
        .ok()
        .filter(|url| !url.is_empty())
}

/// Evaluates to the test Redis url, or returns from the calling test if there is none.
#[macro_export]
macro_rules! redis_url {
    () => {
        match $crate::redis_url() {
            Some(url) => url,
            None => {
                println!("Skipping due to missing LEVELCACHE_TEST_REDIS_URL");
                return;
            }
        }
    };
}
