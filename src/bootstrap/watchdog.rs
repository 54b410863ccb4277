use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Arms a single-shot timer: `fire` runs after `timeout` unless `token` is cancelled first.
///
/// A cancel racing the expiry may lose; `fire` must re-check the state it guards.
pub(crate) fn arm<F, Fut>(handle: &Handle, timeout: Duration, token: CancellationToken, fire: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    handle.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => fire().await,
        }
    });
}
