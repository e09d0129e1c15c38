//! Background task that periodically rotates expired courts.

use crate::scheduler::Scheduler;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

pub struct SweepHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stops the task after its current pass, if any, completes.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            error!("Sweep task ended abnormally: {e}");
        }
    }
}

pub fn spawn(scheduler: Scheduler, period: Duration) -> SweepHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!(period_ms = period.as_millis() as u64, "Starting sweep task");
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticks.tick() => match scheduler.sweep().await {
                    Ok(report) if report.rotated.is_empty() && report.failures == 0 => {}
                    Ok(report) => debug!(
                        rotated = report.rotated.len(),
                        locks_refreshed = report.locks_refreshed,
                        failures = report.failures,
                        "Sweep pass done"
                    ),
                    Err(e) => error!("Sweep failed: {e}"),
                },
                _ = &mut stop_rx => break,
            }
        }
        info!("Sweep task stopped");
    });

    SweepHandle { stop_tx, task }
}
