//! Error type shared by the map, its reclamation machinery and the facades.

use thiserror::Error;

/// Result alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures a caller can observe.
///
/// Point operations on the map are infallible: keys and values cannot be
/// absent by construction, so there is no invalid-argument case to report.
#[derive(Error, Debug)]
pub enum Error {
    /// Cleaning was stopped while a drain loop was waiting for notices.
    ///
    /// Drain loops treat this as their exit condition; map operations never
    /// return it.
    #[error("reclamation was stopped")]
    Cancelled,

    /// The dedicated cleaner thread could not be started.
    #[error("failed to spawn cleaner thread: {0}")]
    Spawn(#[from] std::io::Error),
}
