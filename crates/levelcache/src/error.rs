use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::RemoteError;

/// An error surfaced by a cache operation.
///
/// Read failures of either tier are never surfaced, they turn into misses. Only the loader,
/// the write-back into the remote tier and deletions report errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The loader failed. Values collected from the tiers are still returned.
    #[error("loader failed")]
    Loader(#[source] anyhow::Error),
    /// Writing to the remote tier failed. Local writes of the same call are kept.
    #[error("failed to write to the remote tier")]
    RemoteWrite(#[source] RemoteError),
    /// Deleting from the remote tier failed. Local deletions of the same call are kept.
    #[error("failed to delete from the remote tier")]
    RemoteDelete(#[source] RemoteError),
}
