use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

/// Run `size` workers that pull from `rx` until the sender side is
/// dropped and the queue drains, then wait for all of them.
pub(crate) async fn run<T, F, Fut>(size: usize, rx: mpsc::Receiver<T>, work: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let rx = Arc::new(Mutex::new(rx));
    let work = Arc::new(work);

    let mut workers = JoinSet::new();
    for _ in 0..size {
        let rx = Arc::clone(&rx);
        let work = Arc::clone(&work);
        workers.spawn(async move {
            loop {
                let next = rx.lock().await.recv().await;
                let Some(task) = next else {
                    break;
                };
                work(task).await;
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "upgrade worker stopped abnormally");
        }
    }
}
