use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};

use crate::core::metrics::ATTEMPT_COUNTDOWNS_ACTIVE;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub(crate) enum CountdownState {
    Running { remaining_seconds: u64 },
    Expired,
}

impl CountdownState {
    pub(crate) fn remaining_seconds(self) -> u64 {
        match self {
            Self::Running { remaining_seconds } => remaining_seconds,
            Self::Expired => 0,
        }
    }
}

/// One-per-second countdown owned by an attempt view.
///
/// The expiry callback runs at most once, inside the countdown task. Dropping
/// or cancelling the countdown aborts the task, so no tick or callback can
/// fire afterwards.
pub(crate) struct Countdown {
    state: watch::Receiver<CountdownState>,
    task: JoinHandle<()>,
}

impl Countdown {
    pub(crate) fn start<F>(remaining_seconds: u64, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = watch::channel(CountdownState::Running { remaining_seconds });
        let task = tokio::spawn(run(remaining_seconds, tx, on_expire));

        Self { state: rx, task }
    }

    pub(crate) fn state(&self) -> CountdownState {
        *self.state.borrow()
    }

    #[cfg(test)]
    pub(crate) fn is_expired(&self) -> bool {
        matches!(self.state(), CountdownState::Expired)
    }

    #[cfg(test)]
    pub(crate) fn subscribe(&self) -> watch::Receiver<CountdownState> {
        self.state.clone()
    }

    pub(crate) fn cancel(&self) {
        self.task.abort();
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ActiveCountdown;

impl ActiveCountdown {
    fn acquire() -> Self {
        metrics::gauge!(ATTEMPT_COUNTDOWNS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveCountdown {
    fn drop(&mut self) {
        metrics::gauge!(ATTEMPT_COUNTDOWNS_ACTIVE).decrement(1.0);
    }
}

async fn run<F>(mut remaining: u64, tx: watch::Sender<CountdownState>, on_expire: F)
where
    F: FnOnce() + Send + 'static,
{
    let _active = ActiveCountdown::acquire();

    if remaining > 0 {
        let mut tick = interval_at(Instant::now() + TICK, TICK);
        while remaining > 0 {
            tick.tick().await;
            remaining -= 1;
            if remaining > 0 {
                tx.send_replace(CountdownState::Running { remaining_seconds: remaining });
            }
        }
    }

    tx.send_replace(CountdownState::Expired);
    tracing::debug!("countdown expired");
    on_expire();
}
