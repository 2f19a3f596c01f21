//! Statement execution helpers

use keel_db::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;

/// Await `fut`, failing with [`DbError::Timeout`] once `timeout` elapses.
pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DbError::Timeout {
                seconds: limit.as_secs(),
            })?,
        None => fut.await,
    }
}
