use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// Per-question countdown. Remaining time is always derived from the start
/// instant, never decremented, so tick jitter cannot accumulate.
#[derive(Debug)]
pub struct Timer {
    tick: Duration,
    remaining: Arc<watch::Sender<Duration>>,
    state: TimerState,
}

#[derive(Debug)]
enum TimerState {
    Stopped { remaining: Duration },
    Running {
        started_at: Instant,
        limit: Duration,
        task: JoinHandle<()>,
    },
}

/// Resolves once the running countdown reaches zero. Never resolves if the
/// timer is stopped first.
#[derive(Debug)]
pub struct Expiry(oneshot::Receiver<()>);

impl Expiry {
    pub async fn wait(self) {
        if self.0.await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Timer {
    pub fn new(tick: Duration) -> Timer {
        let (remaining, _) = watch::channel(Duration::ZERO);

        Timer {
            tick,
            remaining: Arc::new(remaining),
            state: TimerState::Stopped {
                remaining: Duration::ZERO,
            },
        }
    }

    pub fn start(&mut self, limit: Duration) -> Expiry {
        self.stop();

        let started_at = Instant::now();
        let (expired_tx, expired_rx) = oneshot::channel();
        let remaining = self.remaining.clone();
        let tick = self.tick;

        remaining.send_replace(limit);

        let task = tokio::spawn(async move {
            let publish = async {
                let mut ticks = time::interval(tick);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticks.tick().await;
                    remaining.send_replace(limit.saturating_sub(started_at.elapsed()));
                }
            };

            tokio::select! {
                _ = time::sleep_until(started_at + limit) => {}
                _ = publish => {}
            }

            remaining.send_replace(Duration::ZERO);
            let _ = expired_tx.send(());
        });

        self.state = TimerState::Running {
            started_at,
            limit,
            task,
        };

        Expiry(expired_rx)
    }

    pub fn stop(&mut self) {
        if let TimerState::Running { task, .. } = &self.state {
            task.abort();
            let remaining = self.remaining();
            self.remaining.send_replace(remaining);
            self.state = TimerState::Stopped { remaining };
        }
    }

    pub fn remaining(&self) -> Duration {
        match &self.state {
            TimerState::Stopped { remaining } => *remaining,
            TimerState::Running {
                started_at, limit, ..
            } => limit.saturating_sub(started_at.elapsed()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.remaining.subscribe()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(50);

    #[tokio::test(start_paused = true)]
    async fn remaining_is_measured_from_start() {
        let mut timer = Timer::new(TICK);
        let _expiry = timer.start(Duration::from_secs(20));

        time::advance(Duration::from_secs(5)).await;
        assert_eq!(timer.remaining(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_fires_at_the_limit() {
        let mut timer = Timer::new(TICK);
        let started = Instant::now();

        timer.start(Duration::from_secs(12)).wait().await;

        assert_eq!(started.elapsed(), Duration::from_secs(12));
        assert_eq!(timer.remaining(), Duration::ZERO);
        assert_eq!(*timer.subscribe().borrow(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_expires() {
        let mut timer = Timer::new(TICK);
        let expiry = timer.start(Duration::from_secs(1));

        time::advance(Duration::from_millis(400)).await;
        timer.stop();
        timer.stop();

        assert!(!timer.is_running());
        assert_eq!(timer.remaining(), Duration::from_millis(600));
        assert!(time::timeout(Duration::from_secs(5), expiry.wait())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_publish_remaining_time() {
        let mut timer = Timer::new(TICK);
        let mut remaining = timer.subscribe();
        let _expiry = timer.start(Duration::from_secs(2));

        time::sleep(Duration::from_millis(500)).await;
        remaining.changed().await.unwrap();

        let seen = *remaining.borrow();
        assert!(seen <= Duration::from_millis(1600));
        assert!(seen > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_countdown() {
        let mut timer = Timer::new(TICK);
        let first = timer.start(Duration::from_secs(1));
        let second = timer.start(Duration::from_secs(3));

        assert!(time::timeout(Duration::from_secs(2), first.wait())
            .await
            .is_err());
        second.wait().await;
        assert_eq!(timer.remaining(), Duration::ZERO);
    }
}
