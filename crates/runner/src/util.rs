use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `f` over `items` with at most `limit` futures in flight.
///
/// Output order matches input order: every task writes to its own slot.
pub async fn bounded<T, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<Fut::Output>
where
    F: Fn(T) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let sem = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    let len = items.len();

    for (idx, item) in items.into_iter().enumerate() {
        let sem = sem.clone();
        let fut = f(item);
        set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            (idx, fut.await)
        });
    }

    let mut slots: Vec<Option<Fut::Output>> = (0..len).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, out)) => slots[idx] = Some(out),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => tracing::warn!("pool task cancelled: {e}"),
        }
    }
    slots.into_iter().flatten().collect()
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub fn elapsed_ms(since: tokio::time::Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
