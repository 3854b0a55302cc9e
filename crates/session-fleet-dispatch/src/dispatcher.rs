//! Sliding-window dispatcher.
//!
//! A batch is split into scheduling units. Each unit is either a single
//! operation or the ordered chain of operations sharing a group key.
//! Units are admitted in submission order by a semaphore that belongs to
//! the dispatcher, so every batch run through the same dispatcher (or a
//! clone of it) shares one window of `ceiling` units. A unit runs its
//! operations one after another on its own task. Results are buffered by
//! input index, so the output lines up with the input no matter which
//! unit finishes first.

use std::{
    collections::HashMap, future::Future, hash::Hash, panic::AssertUnwindSafe, sync::Arc,
    time::Instant,
};

use futures::FutureExt;
use session_fleet_core::DispatchError;
use tokio::sync::Semaphore;

/// Bounded-concurrency executor.
///
/// Clones share the admission window.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ceiling: usize,
    window: Arc<Semaphore>,
}

type Chain<F> = Vec<(usize, F)>;

impl Dispatcher {
    /// Create a dispatcher running at most `ceiling` units at once.
    ///
    /// The ceiling is kept within `1..=Semaphore::MAX_PERMITS`.
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        let clamped = ceiling.clamp(1, Semaphore::MAX_PERMITS);
        if clamped != ceiling {
            tracing::warn!(
                requested = ceiling,
                using = clamped,
                "concurrency ceiling out of range"
            );
        }
        Self {
            ceiling: clamped,
            window: Arc::new(Semaphore::new(clamped)),
        }
    }

    /// Maximum number of units in flight across all batches.
    #[must_use]
    pub const fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Run independent operations.
    ///
    /// Slot `i` of the output holds the outcome of `ops[i]`. A failing or
    /// panicking operation only affects its own slot.
    pub async fn run<T, E, F, Fut>(&self, ops: Vec<F>) -> Vec<Result<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<DispatchError> + Send + 'static,
    {
        let len = ops.len();
        let units = ops.into_iter().enumerate().map(|op| vec![op]).collect();
        self.run_units(units, len).await
    }

    /// Run operations tagged with a group key.
    ///
    /// Operations sharing a key run strictly one after another in
    /// submission order; each completes before the next starts, and a
    /// failure or panic in one does not stop the rest. Different keys run
    /// in parallel under the same ceiling.
    pub async fn run_grouped<K, T, E, F, Fut>(&self, ops: Vec<(K, F)>) -> Vec<Result<T, E>>
    where
        K: Eq + Hash,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<DispatchError> + Send + 'static,
    {
        let len = ops.len();
        let mut unit_of: HashMap<K, usize> = HashMap::new();
        let mut units: Vec<Chain<F>> = Vec::new();

        for (index, (key, op)) in ops.into_iter().enumerate() {
            let unit = *unit_of.entry(key).or_insert_with(|| {
                units.push(Vec::new());
                units.len() - 1
            });
            units[unit].push((index, op));
        }

        self.run_units(units, len).await
    }

    async fn run_units<T, E, F, Fut>(&self, units: Vec<Chain<F>>, len: usize) -> Vec<Result<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<DispatchError> + Send + 'static,
    {
        let started = Instant::now();
        let unit_count = units.len();
        let mut handles = Vec::with_capacity(unit_count);

        for chain in units {
            let indices: Vec<usize> = chain.iter().map(|(index, _)| *index).collect();
            // Admission happens here, in submission order.
            let permit = Arc::clone(&self.window).acquire_owned().await.ok();
            tracing::debug!(first = ?indices.first(), ops = indices.len(), "unit admitted");

            let handle = tokio::spawn(async move {
                let mut results = Vec::with_capacity(chain.len());
                for (index, op) in chain {
                    results.push(run_isolated(index, op).await);
                }
                drop(permit);
                results
            });
            handles.push((indices, handle));
        }

        let mut slots: Vec<Option<Result<T, E>>> = (0..len).map(|_| None).collect();
        for (indices, handle) in handles {
            match handle.await {
                Ok(results) => {
                    for (index, result) in indices.into_iter().zip(results) {
                        slots[index] = Some(result);
                    }
                }
                Err(err) => {
                    let panicked = err.is_panic();
                    tracing::warn!(ops = ?indices, panicked, "unit did not complete");
                    for index in indices {
                        let failure = if panicked {
                            DispatchError::Panicked { index }
                        } else {
                            DispatchError::Cancelled { index }
                        };
                        slots[index] = Some(Err(E::from(failure)));
                    }
                }
            }
        }

        let results: Vec<Result<T, E>> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| Err(E::from(DispatchError::Cancelled { index })))
            })
            .collect();

        tracing::debug!(
            units = unit_count,
            ops = len,
            failed = results.iter().filter(|r| r.is_err()).count(),
            elapsed = ?started.elapsed(),
            "batch complete"
        );
        results
    }
}

/// Run one operation, turning a panic into a `Panicked` slot.
async fn run_isolated<T, E, F, Fut>(index: usize, op: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DispatchError>,
{
    AssertUnwindSafe(async move { op().await })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::warn!(index, "operation panicked");
            Err(E::from(DispatchError::Panicked { index }))
        })
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(session_fleet_core::config::DEFAULT_MAX_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use rand::Rng;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Failed(usize),
        Dispatch(DispatchError),
    }

    impl From<DispatchError> for TestError {
        fn from(err: DispatchError) -> Self {
            Self::Dispatch(err)
        }
    }

    /// Counts concurrent entries, like an instrumented transport.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        async fn hold(&self, delay: Duration) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn random_delays(n: usize, max_ms: u64) -> Vec<Duration> {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| Duration::from_millis(rng.random_range(0..=max_ms)))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_ceiling() {
        let gauge = Arc::new(Gauge::default());
        let ops: Vec<_> = (0..40)
            .map(|i| {
                let gauge = Arc::clone(&gauge);
                move || async move {
                    gauge.hold(Duration::from_millis(5)).await;
                    Ok::<usize, TestError>(i)
                }
            })
            .collect();

        let results = Dispatcher::new(4).run(ops).await;

        assert_eq!(results.len(), 40);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 4);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_output_follows_input_order() {
        let delays = random_delays(50, 15);
        let ops: Vec<_> = delays
            .into_iter()
            .enumerate()
            .map(|(i, delay)| {
                move || async move {
                    tokio::time::sleep(delay).await;
                    Ok::<usize, TestError>(i)
                }
            })
            .collect();

        let results = Dispatcher::new(8).run(ops).await;
        let values: Vec<usize> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_is_isolated() {
        let ops: Vec<_> = (0..10)
            .map(|i| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    if i == 3 {
                        Err(TestError::Failed(i))
                    } else {
                        Ok(i * 10)
                    }
                }
            })
            .collect();

        let results = Dispatcher::new(3).run(ops).await;

        for (i, result) in results.iter().enumerate() {
            if i == 3 {
                assert_eq!(result, &Err(TestError::Failed(3)));
            } else {
                assert_eq!(result, &Ok(i * 10));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panic_is_recorded_per_slot() {
        let ops: Vec<_> = (0..4)
            .map(|i| {
                move || async move {
                    assert!(i != 1, "boom");
                    Ok::<usize, TestError>(i)
                }
            })
            .collect();

        let results = Dispatcher::new(1).run(ops).await;

        assert_eq!(results[0], Ok(0));
        assert_eq!(
            results[1],
            Err(TestError::Dispatch(DispatchError::Panicked { index: 1 }))
        );
        assert_eq!(results[2], Ok(2));
        assert_eq!(results[3], Ok(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_groups_run_sequentially_in_submission_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let active: Arc<Vec<AtomicUsize>> = Arc::new((0..3).map(|_| AtomicUsize::new(0)).collect());
        let overlap = Arc::new(AtomicUsize::new(0));
        let delays = random_delays(30, 6);

        // Interleave three groups: 0,1,2,0,1,2,...
        let ops: Vec<_> = delays
            .into_iter()
            .enumerate()
            .map(|(i, delay)| {
                let group = i % 3;
                let log = Arc::clone(&log);
                let active = Arc::clone(&active);
                let overlap = Arc::clone(&overlap);
                let op = move || async move {
                    if active[group].fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    log.lock().unwrap().push((group, i));
                    tokio::time::sleep(delay).await;
                    active[group].fetch_sub(1, Ordering::SeqCst);
                    Ok::<usize, TestError>(i)
                };
                (group, op)
            })
            .collect();

        let results = Dispatcher::new(3).run_grouped(ops).await;

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        let values: Vec<usize> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..30).collect::<Vec<_>>());

        let log = log.lock().unwrap();
        for group in 0..3 {
            let order: Vec<usize> = log
                .iter()
                .filter(|(g, _)| *g == group)
                .map(|(_, i)| *i)
                .collect();
            let expected: Vec<usize> = (0..30).filter(|i| i % 3 == group).collect();
            assert_eq!(order, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_inside_group_does_not_stop_chain() {
        let ops: Vec<_> = (0..4)
            .map(|i| {
                let op = move || async move {
                    if i == 1 {
                        Err(TestError::Failed(i))
                    } else {
                        Ok(i)
                    }
                };
                ("session", op)
            })
            .collect();

        let results = Dispatcher::new(2).run_grouped(ops).await;
        assert_eq!(
            results,
            vec![Ok(0), Err(TestError::Failed(1)), Ok(2), Ok(3)]
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let ops: Vec<fn() -> std::future::Ready<Result<(), TestError>>> = Vec::new();
        let results = Dispatcher::new(2).run(ops).await;
        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panic_inside_group_keeps_other_outcomes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ops: Vec<_> = (0..3)
            .map(|i| {
                let calls = Arc::clone(&calls);
                let op = move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    assert!(i != 1, "boom");
                    Ok::<usize, TestError>(i)
                };
                ("session", op)
            })
            .collect();

        let results = Dispatcher::new(2).run_grouped(ops).await;

        assert_eq!(
            results,
            vec![
                Ok(0),
                Err(TestError::Dispatch(DispatchError::Panicked { index: 1 })),
                Ok(2),
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_batches_share_the_window() {
        let gauge = Arc::new(Gauge::default());
        let dispatcher = Dispatcher::new(3);
        let batch = |gauge: &Arc<Gauge>| -> Vec<_> {
            (0..12)
                .map(|i| {
                    let gauge = Arc::clone(gauge);
                    move || async move {
                        gauge.hold(Duration::from_millis(10)).await;
                        Ok::<usize, TestError>(i)
                    }
                })
                .collect()
        };
        let second = dispatcher.clone();

        let (a, b) = tokio::join!(dispatcher.run(batch(&gauge)), second.run(batch(&gauge)));

        assert!(a.iter().chain(&b).all(Result::is_ok));
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_ceiling_is_kept_in_range() {
        assert_eq!(Dispatcher::new(0).ceiling(), 1);
        assert_eq!(Dispatcher::new(usize::MAX).ceiling(), Semaphore::MAX_PERMITS);
        assert_eq!(
            session_fleet_core::config::MAX_CONCURRENCY,
            Semaphore::MAX_PERMITS
        );
        assert_eq!(Dispatcher::default().ceiling(), 10);
    }

    #[tokio::test]
    async fn test_huge_ceiling_still_runs() {
        let ops = vec![|| async { Ok::<usize, TestError>(7) }];
        let results = Dispatcher::new(usize::MAX).run(ops).await;
        assert_eq!(results, vec![Ok(7)]);
    }
}
