//! Named wall-clock tick events.
//!
//! Pure time source: fires [`Tick`] values on a broadcast channel at fixed
//! intervals. Consumers that fall behind miss ticks; nothing waits for them.

use tokio::sync::broadcast;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;

/// A named interval tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Every minute.
    Minute,
    /// Every five minutes.
    FiveMinutes,
    /// Every thirty minutes.
    HalfHour,
    /// Every hour.
    Hour,
}

impl Tick {
    /// The interval this tick fires at.
    #[must_use]
    pub fn period(&self) -> Duration {
        match self {
            Tick::Minute => Duration::from_secs(60),
            Tick::FiveMinutes => Duration::from_secs(5 * 60),
            Tick::HalfHour => Duration::from_secs(30 * 60),
            Tick::Hour => Duration::from_secs(60 * 60),
        }
    }
}

/// Broadcasts ticks until shut down.
pub struct Clock {
    sender: broadcast::Sender<Tick>,
}

impl Clock {
    /// Spawn the tick tasks.
    #[must_use]
    pub fn spawn(shutdown: CancellationToken) -> Self {
        let (sender, _) = broadcast::channel(16);

        for tick in [Tick::Minute, Tick::FiveMinutes, Tick::HalfHour, Tick::Hour] {
            let sender = sender.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut timer = interval(tick.period());
                // The immediate first tick of a fresh interval is not a
                // wall-clock boundary.
                timer.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = timer.tick() => {
                            let _ = sender.send(tick);
                        }
                    }
                }
            });
        }

        Clock { sender }
    }

    /// Subscribe to all ticks.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.sender.subscribe()
    }
}
