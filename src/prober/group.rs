//! Bounded-concurrency task group

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use super::ProbeResult;
use crate::context::ProbeContext;
use crate::error::ProbeError;

/// Runs submitted probe tasks with at most `limit` executing at once
///
/// Tasks are spawned as soon as they are added and wait for a permit before
/// starting. Once the group's context is cancelled, tasks still waiting for a
/// permit are abandoned without running; tasks already running are left to
/// observe the cancellation themselves.
pub struct ProbeGroup {
    ctx: ProbeContext,
    limit: usize,
    limiter: Arc<Semaphore>,
    tasks: JoinSet<Option<ProbeResult>>,
}

impl ProbeGroup {
    /// Create a group bound to `ctx`; a `limit` of zero is treated as one
    pub fn new(ctx: ProbeContext, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            ctx,
            limit,
            limiter: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tasks submitted but not yet reaped by [`next`](Self::next)
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Queue a task; it starts once a concurrency slot is free
    pub fn add<F, Fut>(&mut self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ProbeResult> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        let limiter = self.limiter.clone();

        self.tasks.spawn(async move {
            // The permit is held until the task finishes.
            let _permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => return None,
                permit = limiter.acquire_owned() => permit.ok()?,
            };
            if ctx.is_cancelled() {
                return None;
            }
            Some(task().await)
        });
    }

    /// Next completion in arrival order
    ///
    /// Returns `None` once every task has been reaped or the context is done.
    pub async fn next(&mut self) -> Option<ProbeResult> {
        loop {
            let joined = tokio::select! {
                biased;
                _ = self.ctx.cancelled() => return None,
                joined = self.tasks.join_next() => joined?,
            };

            match joined {
                Ok(Some(result)) => return Some(result),
                Ok(None) => debug!("Probe task abandoned after cancellation"),
                Err(e) if e.is_panic() => {
                    return Some(Err(ProbeError::TaskPanicked(e.to_string())));
                }
                Err(e) => debug!("Probe task aborted: {}", e),
            }
        }
    }

    /// Wait for every remaining task (or cancellation) and collect the results
    pub async fn drain(mut self) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.pending());
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }
}

impl Drop for ProbeGroup {
    fn drop(&mut self) {
        // Let in-flight transfers wind down on their own instead of aborting them.
        self.tasks.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::prober::BytesTransferred;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks how many tasks run at once and the high-water mark
    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn gauged_task(
        gauge: Arc<Gauge>,
        bytes: u64,
        delay: Duration,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, ProbeResult> + Send + 'static {
        move || {
            Box::pin(async move {
                gauge.enter();
                tokio::time::sleep(delay).await;
                gauge.exit();
                Ok(BytesTransferred(bytes))
            })
        }
    }

    async fn succeed(bytes: u64) -> ProbeResult {
        Ok(BytesTransferred(bytes))
    }

    async fn fail() -> ProbeResult {
        Err(ProbeError::Upload {
            url: "http://localhost/upload".to_string(),
            source: TransportError::Status { status: 500 },
        })
    }

    async fn boom() -> ProbeResult {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        for limit in [1, 2, 3, 5, 8] {
            for count in [0, 1, 4, 13] {
                let gauge = Arc::new(Gauge::default());
                let mut group = ProbeGroup::new(ProbeContext::new(), limit);
                for _ in 0..count {
                    group.add(gauged_task(gauge.clone(), 1, Duration::from_millis(5)));
                }

                let results = group.drain().await;
                assert_eq!(results.len(), count);
                assert!(gauge.peak.load(Ordering::SeqCst) <= limit);
                assert_eq!(gauge.started.load(Ordering::SeqCst), count);
                assert_eq!(gauge.running.load(Ordering::SeqCst), 0);
            }
        }
    }

    #[tokio::test]
    async fn test_limit_reached_with_enough_tasks() {
        let gauge = Arc::new(Gauge::default());
        let mut group = ProbeGroup::new(ProbeContext::new(), 4);
        for _ in 0..16 {
            group.add(gauged_task(gauge.clone(), 1, Duration::from_millis(20)));
        }
        group.drain().await;
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_limit_is_one() {
        let group = ProbeGroup::new(ProbeContext::new(), 0);
        assert_eq!(group.limit(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_others() {
        let mut group = ProbeGroup::new(ProbeContext::new(), 2);
        group.add(fail);
        group.add(|| succeed(10));
        group.add(|| succeed(20));

        let results = group.drain().await;
        assert_eq!(results.len(), 3);
        let ok: u64 = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|b| b.0)
            .sum();
        assert_eq!(ok, 30);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_submission() {
        let mut group = ProbeGroup::new(ProbeContext::new(), 1);
        group.add(|| succeed(1));
        assert_eq!(group.next().await.unwrap().unwrap(), BytesTransferred(1));
        assert_eq!(group.pending(), 0);

        group.add(|| succeed(2));
        assert_eq!(group.pending(), 1);
        assert_eq!(group.next().await.unwrap().unwrap(), BytesTransferred(2));
        assert!(group.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let ctx = ProbeContext::new();
        ctx.cancel();

        let gauge = Arc::new(Gauge::default());
        let mut group = ProbeGroup::new(ctx, 3);
        for _ in 0..10 {
            group.add(gauged_task(gauge.clone(), 1, Duration::from_millis(1)));
        }

        assert!(group.next().await.is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gauge.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_new_starts() {
        let ctx = ProbeContext::new();
        let gauge = Arc::new(Gauge::default());
        let mut group = ProbeGroup::new(ctx.clone(), 1);
        group.add(gauged_task(gauge.clone(), 1, Duration::from_millis(1)));
        for _ in 0..9 {
            group.add(gauged_task(gauge.clone(), 1, Duration::from_secs(60)));
        }

        assert!(group.next().await.unwrap().is_ok());
        ctx.cancel();

        let rest = tokio::time::timeout(Duration::from_secs(5), group.drain())
            .await
            .expect("drain should return promptly after cancellation");
        assert!(rest.is_empty());
        // At most the one task that grabbed the freed permit was running.
        assert!(gauge.started.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let mut group = ProbeGroup::new(ProbeContext::new(), 2);
        group.add(boom);
        group.add(|| succeed(5));

        let results = group.drain().await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ProbeError::TaskPanicked(_)))));
    }
}
