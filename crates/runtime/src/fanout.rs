//! Bounded-parallel fan-out.
//!
//! Every multi-bucket or multi-queue dispatch goes through these
//! helpers: at most `limit` futures in flight, short-circuiting on the
//! first error. The limit comes from validated configuration, so a
//! zero limit is a programming error and treated as 1.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

/// Drives `futures` with at most `limit` in flight, collecting results
/// in input order.
///
/// # Errors
///
/// Returns the first error encountered; remaining in-flight futures are
/// dropped.
pub async fn try_join_bounded<T, E, Fut>(
    limit: usize,
    futures: Vec<Fut>,
) -> Result<Vec<T>, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let limit = limit.max(1);
    let total = futures.len();
    let mut results: Vec<Option<T>> = Vec::with_capacity(total);
    results.resize_with(total, || None);

    // One closure builds every tagged future so the FuturesUnordered
    // holds a single concrete type.
    let tag = |index: usize, fut: Fut| async move { (index, fut.await) };

    let mut pending = futures.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();

    for (index, fut) in pending.by_ref().take(limit) {
        in_flight.push(tag(index, fut));
    }

    while let Some((index, result)) = in_flight.next().await {
        results[index] = Some(result?);
        if let Some((index, fut)) = pending.next() {
            in_flight.push(tag(index, fut));
        }
    }

    // Every slot was filled exactly once above.
    Ok(results.into_iter().flatten().collect())
}

/// Applies `f` to each item with at most `limit` in flight, discarding
/// results.
///
/// # Errors
///
/// Returns the first error encountered.
pub async fn try_for_each_bounded<T, E, F, Fut>(
    limit: usize,
    items: impl IntoIterator<Item = T>,
    mut f: F,
) -> Result<(), E>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let futures: Vec<_> = items.into_iter().map(&mut f).collect();
    try_join_bounded(limit, futures).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        // Later items complete first; order must still match the input.
        let futures: Vec<_> = (0..8u64)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_millis(8 - i)).await;
                Ok::<_, ()>(i)
            })
            .collect();
        let results = try_join_bounded(3, futures).await.expect("all succeed");
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_in_flight_count_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..20)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }
            })
            .collect();

        try_join_bounded(4, futures).await.expect("all succeed");
        assert!(peak.load(Ordering::SeqCst) <= 4, "peak {} exceeded limit", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_first_error_short_circuits() {
        let started = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..10)
            .map(|i| {
                let started = Arc::clone(&started);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 0 { Err("boom") } else {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(())
                    }
                }
            })
            .collect();

        let result = try_join_bounded(2, futures).await;
        assert_eq!(result.expect_err("fails fast"), "boom");
        assert!(started.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let futures: Vec<std::future::Ready<Result<(), ()>>> = Vec::new();
        let results = try_join_bounded(4, futures).await.expect("empty ok");
        assert!(results.is_empty());
    }
}
