use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::debug;

use crate::cli::config::ReconnectSettings;
use crate::progress::model::TaskId;

/// Bounded, linearly growing reconnect delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reconnect attempts allowed after consecutive closures
    pub max_attempts: u32,

    /// Delay unit; attempt `n` waits `n * base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

impl From<&ReconnectSettings> for RetryPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self::new(settings.max_attempts, Duration::from_millis(settings.base_delay_ms))
    }
}

/// Identifies a scheduled reopen.
///
/// The reopen only fires if both the task id and the epoch still match
/// the connection manager when the delay elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTicket {
    pub task_id: TaskId,
    pub epoch: u64,
    pub attempt: u32,
}

/// Deferred delivery of a reopen back to the event loop
pub trait Scheduler {
    fn schedule(&mut self, ticket: RetryTicket, delay: Duration);
}

/// Timer-backed scheduler feeding tickets back into an event loop.
///
/// Pending timers hold only a weak sender and never keep the loop alive.
pub struct TokioScheduler<T> {
    events: WeakUnboundedSender<T>,
}

impl<T> TokioScheduler<T>
where
    T: From<RetryTicket> + Send + 'static,
{
    pub fn new(events: WeakUnboundedSender<T>) -> Self {
        Self { events }
    }
}

impl<T> Scheduler for TokioScheduler<T>
where
    T: From<RetryTicket> + Send + 'static,
{
    fn schedule(&mut self, ticket: RetryTicket, delay: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let delivered = events
                .upgrade()
                .map_or(false, |events| events.send(T::from(ticket)).is_ok());
            if !delivered {
                debug!("Event loop gone before reconnect timer fired");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(6));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
    }

    #[test]
    fn ceiling_counts_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_delivers_after_delay() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RetryTicket>();
        let mut scheduler = TokioScheduler::new(tx.downgrade());
        let ticket = RetryTicket {
            task_id: TaskId::new("t1"),
            epoch: 1,
            attempt: 1,
        };

        scheduler.schedule(ticket.clone(), Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_timer_does_not_hold_the_loop_open() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RetryTicket>();
        let mut scheduler = TokioScheduler::new(tx.downgrade());
        scheduler.schedule(
            RetryTicket {
                task_id: TaskId::new("t1"),
                epoch: 1,
                attempt: 1,
            },
            Duration::from_secs(60),
        );

        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn built_from_settings() {
        let settings = ReconnectSettings {
            max_attempts: 3,
            base_delay_ms: 500,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    }
}
