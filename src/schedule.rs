//! Owned, cancellable periodic tasks.
//!
//! Every repeating job in the player (metadata resolution, price polling) runs
//! on a [`Periodic`]. The owner holds the value; dropping it or calling
//! [`Periodic::cancel`] stops the job before its next tick.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct Periodic {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Periodic {
    /// Runs `job` immediately, then once per `period` until cancelled.
    ///
    /// A run that outlasts the period delays the next tick instead of bursting.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = job() => {}
                }
            }
            tracing::debug!(task = name, "periodic task stopped");
        });

        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
        Self {
            name,
            token,
            handle,
        }
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!(task = self.name, "periodic task cancelled");
        }
        self.token.cancel();
        self.handle.abort();
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(period: Duration) -> (Periodic, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let task = Periodic::spawn("test", period, move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, runs)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_every_period() {
        let (_task, runs) = counting(Duration::from_secs(10));
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(25)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_further_runs() {
        let (task, runs) = counting(Duration::from_secs(10));
        settle().await;
        task.cancel();

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let (task, runs) = counting(Duration::from_secs(1));
        settle().await;
        drop(task);

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
