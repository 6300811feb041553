pub mod config;
pub mod error;
pub mod paths;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::DataPaths;

/// Run blocking store or model work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
