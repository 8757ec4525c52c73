use thiserror::Error;

/// Result alias for calls made through a [`FetcherHandle`](crate::FetcherHandle).
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Errors returned by the [`FetcherHandle`](crate::FetcherHandle).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherError {
    /// The fetcher was shut down and no longer accepts work.
    #[error("Fetcher terminated.")]
    Terminated,
}
