//! Sample collection and speed aggregation

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BytesPerSecond, ProbeGroup};
use crate::error::ProbeError;

/// Terminal state of a probing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Completed,
    Cancelled,
}

/// Running totals owned by the collector
#[derive(Debug, Default)]
struct Tally {
    total_bytes: u64,
    successes: usize,
    failures: usize,
    last_error: Option<ProbeError>,
}

/// Drive `group` to completion and return the aggregate upload speed
///
/// Every completion updates a running `total_bytes / elapsed` estimate that is
/// offered to `stream` without blocking: a full channel drops the reading and
/// a closed one is not written to again. Collection stops when all tasks have
/// finished or the group's context is done; an early stop still yields the
/// estimate for the samples gathered so far. The run fails only when no task
/// succeeded and at least one failed, in which case the last failure is
/// returned.
pub async fn speed_collect(
    mut group: ProbeGroup,
    stream: Option<&mpsc::Sender<BytesPerSecond>>,
) -> Result<BytesPerSecond, ProbeError> {
    let start = Instant::now();
    let mut stream = stream;
    let mut tally = Tally::default();

    info!(
        "Collecting samples from {} probe tasks (concurrency: {})",
        group.pending(),
        group.limit()
    );

    while let Some(result) = group.next().await {
        match result {
            Ok(bytes) => {
                tally.total_bytes += bytes.0;
                tally.successes += 1;
            }
            Err(e) => {
                warn!("Probe task failed: {}", e);
                tally.failures += 1;
                tally.last_error = Some(e);
            }
        }

        let estimate =
            BytesPerSecond::from_total(tally.total_bytes, start.elapsed().as_secs_f64());
        if let Some(tx) = stream {
            match tx.try_send(estimate) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("Estimate stream full, dropping {}", estimate);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Estimate stream closed, no further readings will be sent");
                    stream = None;
                }
            }
        }
    }

    let elapsed = start.elapsed();
    let state = if group.pending() == 0 {
        RunState::Completed
    } else {
        RunState::Cancelled
    };
    let estimate = BytesPerSecond::from_total(tally.total_bytes, elapsed.as_secs_f64());

    info!(
        "Probe run {:?}: {} bytes in {:.3}s ({} ok, {} failed, {} unfinished) = {}",
        state,
        tally.total_bytes,
        elapsed.as_secs_f64(),
        tally.successes,
        tally.failures,
        group.pending(),
        estimate
    );

    if tally.total_bytes == 0 {
        if let Some(e) = tally.last_error {
            return Err(e);
        }
    }

    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProbeContext;
    use crate::error::TransportError;
    use crate::prober::{BytesTransferred, ProbeResult};
    use std::time::Duration;

    async fn succeed_after(bytes: u64, delay: Duration) -> ProbeResult {
        tokio::time::sleep(delay).await;
        Ok(BytesTransferred(bytes))
    }

    async fn fail(status: u16) -> ProbeResult {
        Err(ProbeError::Upload {
            url: "http://localhost/upload".to_string(),
            source: TransportError::Status { status },
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_is_sum_of_successes() {
        let mut group = ProbeGroup::new(ProbeContext::new(), 5);
        // Longest first, so completions arrive in reverse submission order.
        for (i, bytes) in [100u64, 200, 300, 400].into_iter().enumerate() {
            let delay = Duration::from_millis(40 - 10 * i as u64);
            group.add(move || succeed_after(bytes, delay));
        }
        group.add(|| fail(500));

        let speed = speed_collect(group, None).await.unwrap();
        // 1000 bytes over 40ms
        assert!((speed.as_f64() - 25_000.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_tasks_stream_and_final() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut group = ProbeGroup::new(ProbeContext::new(), 2);
        group.add(|| succeed_after(1000, Duration::from_millis(10)));
        group.add(|| succeed_after(2000, Duration::from_millis(20)));

        let speed = speed_collect(group, Some(&tx)).await.unwrap();
        drop(tx);

        let mut readings = Vec::new();
        while let Some(r) = rx.recv().await {
            readings.push(r);
        }
        assert_eq!(readings.len(), 2);
        assert!((readings[0].as_f64() - 100_000.0).abs() < 1e-6);
        // 3000 bytes over 20ms
        assert!((speed.as_f64() - 150_000.0).abs() < 1e-6);
        assert_eq!(readings[1], speed);
    }

    #[tokio::test]
    async fn test_all_failures_return_error() {
        let mut group = ProbeGroup::new(ProbeContext::new(), 5);
        for _ in 0..9 {
            group.add(|| fail(500));
        }
        group.add(|| fail(503));

        let err = speed_collect(group, None).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Upload {
                source: TransportError::Status { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_partial_failure_is_ok() {
        let mut group = ProbeGroup::new(ProbeContext::new(), 5);
        for _ in 0..9 {
            group.add(|| fail(500));
        }
        group.add(|| succeed_after(500, Duration::from_millis(5)));

        let speed = speed_collect(group, None).await.unwrap();
        assert!(speed.as_f64() > 0.0);
    }

    #[tokio::test]
    async fn test_no_tasks_is_zero() {
        let group = ProbeGroup::new(ProbeContext::new(), 2);
        let speed = speed_collect(group, None).await.unwrap();
        assert_eq!(speed, BytesPerSecond(0.0));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_zero_without_error() {
        let ctx = ProbeContext::new();
        ctx.cancel();
        let mut group = ProbeGroup::new(ctx, 2);
        for _ in 0..4 {
            group.add(|| succeed_after(1000, Duration::from_millis(1)));
        }

        let speed = speed_collect(group, None).await.unwrap();
        assert_eq!(speed, BytesPerSecond(0.0));
    }

    #[tokio::test]
    async fn test_cancel_after_first_completion_returns_promptly() {
        let ctx = ProbeContext::new();
        let (tx, mut rx) = mpsc::channel(16);
        let mut group = ProbeGroup::new(ctx.clone(), 5);
        group.add(|| succeed_after(1000, Duration::from_millis(5)));
        for _ in 0..9 {
            group.add(|| succeed_after(1_000_000, Duration::from_secs(60)));
        }

        let canceller = tokio::spawn(async move {
            let first = rx.recv().await;
            ctx.cancel();
            first
        });

        let speed = tokio::time::timeout(Duration::from_secs(5), speed_collect(group, Some(&tx)))
            .await
            .expect("run should stop promptly after cancellation")
            .unwrap();

        assert!(canceller.await.unwrap().is_some());
        assert!(speed.as_f64() > 0.0);
        // Only the first 1000-byte sample can have been counted.
        assert!(speed.as_f64() <= 1000.0 / 0.005);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_run() {
        let ctx = ProbeContext::with_timeout(Duration::from_secs(2));
        let mut group = ProbeGroup::new(ctx, 2);
        group.add(|| succeed_after(4000, Duration::from_secs(1)));
        group.add(|| succeed_after(4000, Duration::from_secs(10)));

        let speed = speed_collect(group, None).await.unwrap();
        // 4000 bytes, cut off by the deadline at 2s
        assert!((speed.as_f64() - 2000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_full_stream_does_not_block() {
        let (tx, _rx) = mpsc::channel(1);
        let mut group = ProbeGroup::new(ProbeContext::new(), 4);
        for _ in 0..20 {
            group.add(|| succeed_after(10, Duration::from_millis(1)));
        }

        let speed = tokio::time::timeout(Duration::from_secs(5), speed_collect(group, Some(&tx)))
            .await
            .expect("full stream must not stall collection")
            .unwrap();
        assert!(speed.as_f64() > 0.0);
    }

    #[tokio::test]
    async fn test_closed_stream_is_ignored() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut group = ProbeGroup::new(ProbeContext::new(), 2);
        group.add(|| succeed_after(10, Duration::from_millis(1)));
        group.add(|| succeed_after(10, Duration::from_millis(1)));

        assert!(speed_collect(group, Some(&tx)).await.is_ok());
    }
}
