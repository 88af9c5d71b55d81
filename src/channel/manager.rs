use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channel::retry::{RetryPolicy, RetryTicket, Scheduler};
use crate::channel::transport::{ConnectionId, Connector, StreamEndpoint};
use crate::error::TransportError;
use crate::progress::model::TaskId;

/// State of the progress channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    /// Closed unexpectedly, reopen scheduled
    BackingOff,
}

impl ConnectionStatus {
    /// Badge text shown next to the task
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Live Connected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Error => "Connection Error",
            ConnectionStatus::BackingOff => "Reconnecting...",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a channel closure led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Closure of a channel that is no longer active
    Ignored,
    /// The task was cancelled or superseded; nothing to do
    Idle,
    /// A reopen was scheduled
    Retrying { attempt: u32, delay: Duration },
    /// Retry ceiling reached; the user has to start over
    GaveUp(TransportError),
}

#[derive(Debug, Clone)]
struct ActiveChannel {
    id: ConnectionId,
    task_id: TaskId,
}

/// Owns the single progress channel and its retry loop
pub struct ConnectionManager<C, S> {
    /// Physical transport
    connector: C,

    /// Delivers scheduled reopens
    scheduler: S,

    /// Where task channels live
    endpoint: StreamEndpoint,

    /// Reconnect ceiling and delays
    policy: RetryPolicy,

    status: ConnectionStatus,

    /// Task the client currently follows; cleared by `close`
    current_task: Option<TaskId>,

    /// Channel that is connecting or connected
    channel: Option<ActiveChannel>,

    /// Reconnects since the last successful open
    attempts: u32,

    /// Bumped whenever the followed task changes or is dropped
    epoch: u64,

    next_connection: u64,
}

impl<C: Connector, S: Scheduler> ConnectionManager<C, S> {
    pub fn new(connector: C, scheduler: S, endpoint: StreamEndpoint, policy: RetryPolicy) -> Self {
        Self {
            connector,
            scheduler,
            endpoint,
            policy,
            status: ConnectionStatus::Disconnected,
            current_task: None,
            channel: None,
            attempts: 0,
            epoch: 0,
            next_connection: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn current_task(&self) -> Option<&TaskId> {
        self.current_task.as_ref()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Whether events from `connection` still belong to the followed task
    pub fn is_active(&self, connection: ConnectionId) -> bool {
        self.channel.as_ref().map_or(false, |c| c.id == connection)
    }

    /// Open the channel for `task_id`, replacing any channel already open
    pub fn open(&mut self, task_id: TaskId) -> Result<ConnectionId, TransportError> {
        if let Some(previous) = self.channel.take() {
            if previous.task_id != task_id {
                info!("Closing channel for task {} in favour of {}", previous.task_id, task_id);
            }
            self.connector.disconnect(previous.id);
        }

        if self.current_task.as_ref() != Some(&task_id) {
            self.epoch += 1;
            self.attempts = 0;
        }
        self.current_task = Some(task_id.clone());

        let url = match self.endpoint.for_task(&task_id) {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot open progress channel: {}", e);
                self.status = ConnectionStatus::Error;
                return Err(e);
            }
        };

        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        self.channel = Some(ActiveChannel { id, task_id });
        self.status = ConnectionStatus::Connecting;
        self.connector.connect(id, url);

        Ok(id)
    }

    /// Transport finished its handshake
    pub fn on_opened(&mut self, connection: ConnectionId) -> bool {
        if !self.is_active(connection) {
            debug!("Ignoring open of stale channel {}", connection);
            return false;
        }
        self.status = ConnectionStatus::Connected;
        self.attempts = 0;
        true
    }

    /// Transport-level failure; the closure that follows drives any retry
    pub fn on_failed(&mut self, connection: ConnectionId, error: &TransportError) {
        if !self.is_active(connection) {
            debug!("Ignoring failure of stale channel {}: {}", connection, error);
            return;
        }
        warn!("Progress channel {} error: {}", connection, error);
        self.status = ConnectionStatus::Error;
    }

    /// Channel closed for any reason
    pub fn on_closed(&mut self, connection: ConnectionId) -> CloseOutcome {
        let closed = match self.channel.take() {
            Some(active) if active.id == connection => active,
            other => {
                self.channel = other;
                return CloseOutcome::Ignored;
            }
        };
        self.status = ConnectionStatus::Disconnected;
        // the transport has finished with it; release its task
        self.connector.disconnect(closed.id);

        if self.current_task.as_ref() != Some(&closed.task_id) {
            return CloseOutcome::Idle;
        }

        if !self.policy.allows(self.attempts) {
            let failure = TransportError::RetriesExhausted {
                attempts: self.attempts,
            };
            error!("Giving up on task {}: {}", closed.task_id, failure);
            return CloseOutcome::GaveUp(failure);
        }

        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        info!(
            "Channel for task {} closed, reconnect attempt {} in {:?}",
            closed.task_id, self.attempts, delay
        );
        self.scheduler.schedule(
            RetryTicket {
                task_id: closed.task_id,
                epoch: self.epoch,
                attempt: self.attempts,
            },
            delay,
        );
        self.status = ConnectionStatus::BackingOff;

        CloseOutcome::Retrying {
            attempt: self.attempts,
            delay,
        }
    }

    /// A scheduled reopen came due; stale tickets are dropped
    pub fn on_retry_due(&mut self, ticket: RetryTicket) -> Result<Option<ConnectionId>, TransportError> {
        let still_current = ticket.epoch == self.epoch
            && self.current_task.as_ref() == Some(&ticket.task_id)
            && self.channel.is_none();

        if !still_current {
            debug!("Dropping stale reopen for task {}", ticket.task_id);
            return Ok(None);
        }

        info!("Reconnecting attempt {} for task {}", ticket.attempt, ticket.task_id);
        self.open(ticket.task_id).map(Some)
    }

    /// Explicit close: no reopen will fire for the task afterwards
    pub fn close(&mut self) {
        if let Some(active) = self.channel.take() {
            info!("Closing progress channel for task {}", active.task_id);
            self.connector.disconnect(active.id);
        }
        self.current_task = None;
        self.attempts = 0;
        self.epoch += 1;
        self.status = ConnectionStatus::Disconnected;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn last_ticket<C: Connector>(manager: &ConnectionManager<C, ManualScheduler>) -> RetryTicket {
        manager.scheduler().scheduled.last().unwrap().0.clone()
    }

    #[test]
    fn open_connects_to_task_path() {
        let mut manager = manager();
        let id = manager.open(TaskId::new("t1")).unwrap();

        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(manager.connector().connects.len(), 1);
        assert_eq!(manager.connector().connects[0].0, id);
        assert_eq!(manager.connector().connects[0].1.as_str(), "ws://localhost:8000/ws/t1");

        assert!(manager.on_opened(id));
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn opening_another_task_closes_the_first() {
        let mut manager = manager();
        let first = manager.open(TaskId::new("t1")).unwrap();
        manager.on_opened(first);

        let second = manager.open(TaskId::new("t2")).unwrap();
        assert_eq!(manager.connector().disconnects, vec![first]);
        assert_eq!(manager.current_task(), Some(&TaskId::new("t2")));

        // the superseded channel's late closure changes nothing
        assert_eq!(manager.on_closed(first), CloseOutcome::Ignored);
        assert!(manager.scheduler().scheduled.is_empty());
        assert!(manager.is_active(second));
    }

    #[test]
    fn unexpected_close_schedules_retry_for_same_task() {
        let mut manager = manager();
        let id = manager.open(TaskId::new("t1")).unwrap();
        manager.on_opened(id);

        let outcome = manager.on_closed(id);
        assert_eq!(
            outcome,
            CloseOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(manager.status(), ConnectionStatus::BackingOff);
        assert_eq!(manager.scheduler().scheduled.len(), 1);

        let ticket = last_ticket(&manager);
        assert_eq!(ticket.task_id, TaskId::new("t1"));
        assert_eq!(ticket.attempt, 1);

        let reopened = manager.on_retry_due(ticket).unwrap().unwrap();
        assert_ne!(reopened, id);
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(manager.connector().connects.len(), 2);
        assert_eq!(manager.connector().connects[1].1.as_str(), "ws://localhost:8000/ws/t1");

        // a successful open resets the counter
        manager.on_opened(reopened);
        assert_eq!(manager.attempts(), 0);
    }

    #[test]
    fn closed_channel_is_released() {
        let mut manager = manager();
        let id = manager.open(TaskId::new("t1")).unwrap();
        manager.on_opened(id);
        manager.on_closed(id);

        let ticket = last_ticket(&manager);
        let reopened = manager.on_retry_due(ticket).unwrap().unwrap();
        manager.on_closed(reopened);

        assert_eq!(manager.connector().disconnects, vec![id, reopened]);
    }

    #[test]
    fn stops_after_retry_ceiling() {
        let mut manager = manager();
        let mut id = manager.open(TaskId::new("t1")).unwrap();
        manager.on_opened(id);

        for attempt in 1..=5 {
            match manager.on_closed(id) {
                CloseOutcome::Retrying { attempt: a, delay } => {
                    assert_eq!(a, attempt);
                    assert_eq!(delay, Duration::from_secs(2 * u64::from(attempt)));
                }
                other => panic!("expected retry, got {:?}", other),
            }
            let ticket = last_ticket(&manager);
            id = manager.on_retry_due(ticket).unwrap().unwrap();
        }

        let outcome = manager.on_closed(id);
        assert_eq!(
            outcome,
            CloseOutcome::GaveUp(TransportError::RetriesExhausted { attempts: 5 })
        );
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.scheduler().scheduled.len(), 5);
        assert_eq!(manager.connector().connects.len(), 6);
    }

    #[test]
    fn close_prevents_pending_retry() {
        let mut manager = manager();
        let id = manager.open(TaskId::new("t1")).unwrap();
        manager.on_closed(id);
        let ticket = last_ticket(&manager);

        manager.close();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.current_task(), None);

        assert_eq!(manager.on_retry_due(ticket).unwrap(), None);
        assert_eq!(manager.connector().connects.len(), 1);
    }

    #[test]
    fn retry_for_same_task_id_after_cancel_and_relaunch_is_stale() {
        let mut manager = manager();
        let id = manager.open(TaskId::new("t1")).unwrap();
        manager.on_closed(id);
        let ticket = last_ticket(&manager);

        manager.close();
        let fresh = manager.open(TaskId::new("t1")).unwrap();

        assert_eq!(manager.on_retry_due(ticket).unwrap(), None);
        assert!(manager.is_active(fresh));
        assert_eq!(manager.connector().connects.len(), 2);
    }

    #[test]
    fn explicit_close_ignores_late_closure() {
        let mut manager = manager();
        let id = manager.open(TaskId::new("t1")).unwrap();
        manager.on_opened(id);
        manager.close();

        assert_eq!(manager.connector().disconnects, vec![id]);
        assert_eq!(manager.on_closed(id), CloseOutcome::Ignored);
        assert!(manager.scheduler().scheduled.is_empty());
    }

    #[test]
    fn transport_error_sets_status_without_reopening() {
        let mut manager = manager();
        let id = manager.open(TaskId::new("t1")).unwrap();
        manager.on_failed(id, &TransportError::Connect("refused".into()));

        assert_eq!(manager.status(), ConnectionStatus::Error);
        assert_eq!(manager.connector().connects.len(), 1);
        assert!(manager.scheduler().scheduled.is_empty());
    }

    #[test]
    fn labels_match_badge_text() {
        assert_eq!(ConnectionStatus::Connected.label(), "Live Connected");
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "Disconnected");
    }
}
