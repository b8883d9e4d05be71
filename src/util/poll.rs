use std::{future::Future, time::Duration};

use tokio::runtime::Runtime;

use crate::model::error::TransportError;

/// Drives `future` to completion on `runtime`, failing with a timeout once
/// `deadline` has elapsed.
pub fn poll_until_ready_error<Fut, T>(
    runtime: &Runtime,
    deadline: Option<Duration>,
    future: Fut,
) -> Result<T, TransportError>
where
    Fut: Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(limit) => runtime.block_on(async {
            match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::timeout(format!(
                    "deadline of {:?} exceeded",
                    limit
                ))),
            }
        }),
        None => runtime.block_on(future),
    }
}

pub fn poll_until_ready<Fut, T>(runtime: &Runtime, future: Fut) -> T
where
    Fut: Future<Output = T>,
{
    runtime.block_on(future)
}
