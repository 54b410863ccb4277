use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Bounded pool for stage-two work.
///
/// Tasks are spawned on a captured runtime handle, so submission works from
/// registry threads that are not tokio workers. With a limit, at most `n`
/// submitted futures run at once; the rest wait for a permit.
#[derive(Clone, Debug)]
pub(crate) struct WorkerPool {
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
}

impl WorkerPool {
    pub(crate) fn new(handle: Handle, limit: Option<usize>) -> Self {
        Self {
            handle,
            permits: limit.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let _permit = match permits {
                Some(sem) => match sem.acquire_owned().await {
                    Ok(p) => Some(p),
                    Err(_) => return,
                },
                None => None,
            };
            work.await;
        });
    }
}
