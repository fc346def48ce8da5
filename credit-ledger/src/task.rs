//! Bridge from async callers to blocking RocksDB work

use crate::Error;

/// Run blocking store work on tokio's blocking pool.
///
/// Once submitted the closure runs to completion even if the awaiting future
/// is dropped, so a caller-side timeout means "outcome unknown".
pub async fn run_blocking<T, E, F>(f: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<Error> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(E::from(Error::Concurrency(format!(
            "blocking task failed: {}",
            join_err
        )))),
    }
}
