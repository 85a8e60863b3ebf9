// ── Refresher ──
//
// Single-flight, TTL-cached wrapper around a fallible producer, used to
// throttle upstream polling. After repeated failures the next attempt is
// deferred according to a backoff schedule.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CoreError;

/// Configured intervals are scaled by this factor so that a poll running
/// at the same cadence never finds the value a hair too fresh.
const INTERVAL_SCALE: f64 = 0.95;

type Producer<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, CoreError>> + Send + Sync>;

struct RefreshState<T> {
    value: Option<T>,
    last_refresh: Option<Instant>,
    last_failure: Option<Instant>,
    failures: u32,
    /// Outcome of the most recent producer call, handed to callers that
    /// queued behind it.
    last_outcome: Option<Result<T, String>>,
}

pub struct Refresher<T> {
    producer: Producer<T>,
    interval: Duration,
    failure_threshold: u32,
    backoff: Vec<Duration>,
    failing: AtomicBool,
    attempts: AtomicU64,
    state: Mutex<RefreshState<T>>,
}

impl<T> Refresher<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(producer: F, interval: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        Self {
            producer: Arc::new(move || producer().boxed()),
            interval: interval.mul_f64(INTERVAL_SCALE),
            failure_threshold: 1,
            backoff: Vec::new(),
            failing: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            state: Mutex::new(RefreshState {
                value: None,
                last_refresh: None,
                last_failure: None,
                failures: 0,
                last_outcome: None,
            }),
        }
    }

    /// Defer producer calls once `threshold` consecutive failures have
    /// occurred. After the k-th failure the wait is `backoff[k - 1]`,
    /// with the last element reused once the schedule runs out.
    pub fn with_failure_backoff(mut self, threshold: u32, backoff: Vec<Duration>) -> Self {
        self.failure_threshold = threshold.max(1);
        self.backoff = backoff;
        self
    }

    /// Effective (scaled) interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the failure threshold has been crossed since the last
    /// success.
    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    pub async fn cached(&self) -> Option<T> {
        self.state.lock().await.value.clone()
    }

    /// Return the cached value while fresh, otherwise call the producer.
    pub async fn refresh(&self) -> Result<T, CoreError> {
        let ticket = self.attempts.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;

        // Someone refreshed while we queued on the lock: share their result.
        if self.attempts.load(Ordering::SeqCst) != ticket {
            if let Some(outcome) = &state.last_outcome {
                return outcome.clone().map_err(CoreError::Refresh);
            }
        }

        if let (Some(value), Some(at)) = (&state.value, state.last_refresh) {
            if at.elapsed() < self.interval {
                return Ok(value.clone());
            }
        }

        if let Some(wait) = self.backoff_delay(&state) {
            let waited = state.last_failure.map_or(wait, |at| at.elapsed());
            if waited < wait {
                debug!(
                    failures = state.failures,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "refresh deferred by backoff"
                );
                return state.value.clone().ok_or(CoreError::RefreshDeferred);
            }
        }

        let outcome = (self.producer)().await;
        let now = Instant::now();
        let result = match outcome {
            Ok(value) => {
                state.value = Some(value.clone());
                state.last_refresh = Some(now);
                state.last_failure = None;
                state.failures = 0;
                self.failing.store(false, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                state.failures = state.failures.saturating_add(1);
                state.last_failure = Some(now);
                if state.failures >= self.failure_threshold {
                    self.failing.store(true, Ordering::SeqCst);
                }
                warn!(failures = state.failures, error = %e, "refresh failed");
                Err(e.to_string())
            }
        };

        state.last_outcome = Some(result.clone());
        self.attempts.fetch_add(1, Ordering::SeqCst);
        result.map_err(CoreError::Refresh)
    }

    /// Force the next `refresh` to call the producer.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.last_refresh = None;
        state.last_failure = None;
        state.failures = 0;
        state.last_outcome = None;
        self.failing.store(false, Ordering::SeqCst);
    }

    fn backoff_delay(&self, state: &RefreshState<T>) -> Option<Duration> {
        if state.failures < self.failure_threshold {
            return None;
        }
        let index = usize::try_from(state.failures - 1).unwrap_or(usize::MAX);
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_producer(
        fail: bool,
    ) -> (
        impl Fn() -> BoxFuture<'static, Result<u32, CoreError>> + Send + Sync + 'static,
        Arc<AtomicUsize>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let producer = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if fail {
                    Err(CoreError::Internal("device offline".into()))
                } else {
                    Ok(u32::try_from(n).unwrap())
                }
            }
            .boxed()
        };
        (producer, calls)
    }

    async fn at(ms: u64, start: Instant) {
        tokio::time::sleep_until(start + Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn serves_cached_value_within_interval() {
        let (producer, calls) = counting_producer(false);
        let refresher = Refresher::new(producer, Duration::from_millis(100));
        assert_eq!(refresher.interval(), Duration::from_millis(95));

        assert_eq!(refresher.refresh().await.unwrap(), 0);
        tokio::time::advance(Duration::from_millis(90)).await;
        assert_eq!(refresher.refresh().await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(refresher.refresh().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forces_producer_call() {
        let (producer, calls) = counting_producer(false);
        let refresher = Refresher::new(producer, Duration::from_secs(60));
        refresher.refresh().await.unwrap();
        refresher.reset().await;
        assert_eq!(refresher.refresh().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_producer_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let refresher = Arc::new(Refresher::new(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CoreError>(7_u32)
                }
            },
            Duration::from_secs(1),
        ));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let refresher = Arc::clone(&refresher);
                tokio::spawn(async move { refresher.refresh().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_defers_producer_after_failures() {
        let (producer, calls) = counting_producer(true);
        let refresher = Refresher::new(producer, Duration::from_millis(25)).with_failure_backoff(
            1,
            vec![
                Duration::from_millis(15),
                Duration::from_millis(25),
                Duration::from_millis(35),
            ],
        );
        let start = Instant::now();

        assert!(matches!(refresher.refresh().await, Err(CoreError::Refresh(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(refresher.is_failing());

        at(10, start).await;
        assert!(matches!(refresher.refresh().await, Err(CoreError::RefreshDeferred)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        at(20, start).await;
        assert!(refresher.refresh().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        at(30, start).await;
        assert!(matches!(refresher.refresh().await, Err(CoreError::RefreshDeferred)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        at(50, start).await;
        assert!(refresher.refresh().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(refresher.is_failing());
    }

    #[tokio::test(start_paused = true)]
    async fn deferral_returns_last_known_good_value() {
        let fail = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let refresher = Refresher::new(
            move || {
                let fail = flag.load(Ordering::SeqCst);
                async move {
                    if fail {
                        Err(CoreError::Internal("timeout".into()))
                    } else {
                        Ok(42_u32)
                    }
                }
            },
            Duration::from_millis(10),
        )
        .with_failure_backoff(1, vec![Duration::from_millis(100)]);

        assert_eq!(refresher.refresh().await.unwrap(), 42);
        fail.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(refresher.refresh().await.is_err());

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(refresher.refresh().await.unwrap(), 42);

        fail.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(refresher.refresh().await.unwrap(), 42);
        assert!(!refresher.is_failing());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_flag_waits_for_threshold() {
        let (producer, _calls) = counting_producer(true);
        let refresher = Refresher::new(producer, Duration::from_millis(10))
            .with_failure_backoff(3, vec![Duration::from_millis(5)]);

        for _ in 0..2 {
            assert!(refresher.refresh().await.is_err());
            assert!(!refresher.is_failing());
        }
        assert!(refresher.refresh().await.is_err());
        assert!(refresher.is_failing());
    }
}
