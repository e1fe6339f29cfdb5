use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("нет активного рантайма tokio")]
    NoRuntime,
    #[error("период таймера должен быть больше нуля")]
    ZeroPeriod,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic driver with at most one armed timer.
///
/// The first tick fires immediately. Ticks that fall behind are skipped, so a
/// slow callback never causes a burst of catch-up calls. A tick already in
/// progress when the timer is stopped runs to completion; no later tick starts.
#[derive(Default)]
pub struct Ticker {
    running: Option<Running>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer, replacing any previous one. `on_tick` receives the tick number.
    pub fn start<F, Fut>(&mut self, period: Duration, mut on_tick: F) -> Result<(), SchedulerError>
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        self.stop();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut seq = 0_u64;

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        on_tick(seq).await;
                        seq += 1;
                    }
                }
            }
            debug!(ticks = seq, "таймер остановлен");
        });

        self.running = Some(Running { token, handle });
        Ok(())
    }

    /// Disarms the timer. Calling it on a stopped ticker is a no-op.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicU64>) -> impl FnMut(u64) -> std::future::Ready<()> + Send {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_then_periodic() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut ticker = Ticker::new();
        ticker
            .start(Duration::from_secs(1), counting(&counter))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(ticker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_leaves_a_single_timer() {
        let first = Arc::new(AtomicU64::new(0));
        let second = Arc::new(AtomicU64::new(0));
        let mut ticker = Ticker::new();
        ticker.start(Duration::from_secs(1), counting(&first)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        ticker.start(Duration::from_secs(1), counting(&second)).unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_halts_ticks() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut ticker = Ticker::new();
        ticker.stop();
        ticker.start(Duration::from_secs(1), counting(&counter)).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        ticker.stop();
        ticker.stop();
        let seen = counter.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
        assert!(!ticker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_running_tick_finish() {
        let started = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicU64::new(0));
        let mut ticker = Ticker::new();
        {
            let (started, finished) = (started.clone(), finished.clone());
            ticker
                .start(Duration::from_secs(1), move |_| {
                    let (started, finished) = (started.clone(), finished.clone());
                    async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(800)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        ticker.stop();
        assert!(!ticker.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_without_runtime_is_an_error() {
        let mut ticker = Ticker::new();
        let err = ticker
            .start(Duration::from_secs(1), |_| std::future::ready(()))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoRuntime));
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let mut ticker = Ticker::new();
        let err = ticker
            .start(Duration::ZERO, |_| std::future::ready(()))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ZeroPeriod));
    }
}
