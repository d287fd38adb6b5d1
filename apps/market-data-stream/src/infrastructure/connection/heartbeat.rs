//! Heartbeat Scheduler
//!
//! Periodic keep-alive task owned by the connection engine. The scheduler
//! only knows how to tick; what a tick does (state check, message, send) is a
//! callback supplied by the engine.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodic timer task that can be re-armed with a new period.
///
/// The first tick fires one full period after arming. Dropping the scheduler
/// stops it.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    period_tx: watch::Sender<Duration>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatScheduler {
    /// Spawn the timer task. `on_tick` runs to completion before the next
    /// tick is awaited; ticks missed meanwhile are skipped.
    pub fn start<F>(period: Duration, on_tick: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let (period_tx, period_rx) = watch::channel(period);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(period_rx, cancel.clone(), on_tick));

        tracing::debug!(period_ms = period.as_millis(), "Heartbeat scheduler started");

        Self {
            period_tx,
            cancel,
            handle,
        }
    }

    /// Restart the timer with `period`; the next tick fires one period from now.
    pub fn rearm(&self, period: Duration) {
        self.period_tx.send_replace(period);
        tracing::debug!(period_ms = period.as_millis(), "Heartbeat scheduler re-armed");
    }

    /// Current period.
    #[must_use]
    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Whether the timer task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the timer task.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn interval_from_now(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run<F>(mut period_rx: watch::Receiver<Duration>, cancel: CancellationToken, on_tick: F)
where
    F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    let mut interval = interval_from_now(*period_rx.borrow_and_update());

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Heartbeat scheduler stopped");
                break;
            }
            changed = period_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                interval = interval_from_now(*period_rx.borrow_and_update());
            }
            _ = interval.tick() => {
                on_tick().await;
            }
        }
    }
}
