//! Search session core: launches tasks and routes channel traffic.
//!
//! Everything here runs on one event loop. Async results (launch
//! responses, channel events, retry timers) come back in as plain method
//! calls, each checked against the session's current identity before it
//! touches state.

use chrono::Utc;
use std::mem;
use tracing::{debug, info, warn};

use crate::channel::manager::{CloseOutcome, ConnectionManager, ConnectionStatus};
use crate::channel::retry::{RetryTicket, Scheduler};
use crate::channel::transport::{ChannelEvent, ChannelEventKind, ConnectionId, Connector};
use crate::cli::config::SearchSettings;
use crate::error::{LaunchError, ValidationError};
use crate::progress::aggregator::{self, Verdict};
use crate::progress::event::classify;
use crate::progress::model::{TaskId, TaskProgress};
use crate::session::launcher::CreateTaskRequest;
use crate::utils::metrics::SessionMetrics;

/// Per-search options sent with the creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: u32,
    pub use_ai_analysis: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from(SearchSettings::default())
    }
}

impl From<SearchSettings> for SearchOptions {
    fn from(settings: SearchSettings) -> Self {
        Self {
            max_results: settings.max_results,
            use_ai_analysis: settings.use_ai_analysis,
        }
    }
}

/// A creation request waiting to be sent; `id` guards against late replies
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchTicket {
    pub id: u64,
    pub request: CreateTaskRequest,
}

/// Everything the presentation layer needs to draw the current search
#[derive(Debug, Clone)]
pub struct SessionView {
    pub progress: TaskProgress,
    pub connection: ConnectionStatus,
    pub reconnect_attempts: u32,
    /// Form-level or connectivity message for the user
    pub notice: Option<String>,
    /// Reconnects ran out; the task will not be followed any further
    pub connection_lost: bool,
    pub metrics: SessionMetrics,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            progress: TaskProgress::initial(),
            connection: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            notice: None,
            connection_lost: false,
            metrics: SessionMetrics::new(),
        }
    }
}

/// Check a task description before anything touches the network
pub fn validate_search(description: &str, options: &SearchOptions) -> Result<String, ValidationError> {
    let task = description.trim();
    if task.is_empty() {
        return Err(ValidationError::EmptyDescription);
    }
    if options.max_results == 0 {
        return Err(ValidationError::NoResultsRequested);
    }
    Ok(task.to_string())
}

/// Owns the one live [`TaskProgress`] and the channel that feeds it
pub struct SearchSession<C, S> {
    progress: TaskProgress,
    connection: ConnectionManager<C, S>,
    /// Launch whose reply is still awaited
    pending_launch: Option<u64>,
    launches: u64,
    notice: Option<String>,
    connection_lost: bool,
    metrics: SessionMetrics,
}

impl<C: Connector, S: Scheduler> SearchSession<C, S> {
    pub fn new(connection: ConnectionManager<C, S>) -> Self {
        Self {
            progress: TaskProgress::initial(),
            connection,
            pending_launch: None,
            launches: 0,
            notice: None,
            connection_lost: false,
            metrics: SessionMetrics::new(),
        }
    }

    pub fn progress(&self) -> &TaskProgress {
        &self.progress
    }

    pub fn connection(&self) -> &ConnectionManager<C, S> {
        &self.connection
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn is_launching(&self) -> bool {
        self.pending_launch.is_some()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            progress: self.progress.clone(),
            connection: self.connection.status(),
            reconnect_attempts: self.connection.attempts(),
            notice: self.notice.clone(),
            connection_lost: self.connection_lost,
            metrics: self.metrics.clone(),
        }
    }

    /// Validate and prepare a new search.
    ///
    /// Drops whatever task was followed before; the returned ticket must be
    /// handed back to [`SearchSession::finish_launch`] with the reply.
    pub fn start_search(
        &mut self,
        description: &str,
        options: SearchOptions,
    ) -> Result<LaunchTicket, ValidationError> {
        let task = match validate_search(description, &options) {
            Ok(task) => task,
            Err(e) => {
                self.notice = Some(e.to_string());
                return Err(e);
            }
        };

        self.connection.close();
        self.progress = TaskProgress::initial();
        self.notice = None;
        self.connection_lost = false;
        self.metrics.reset();

        self.launches += 1;
        self.pending_launch = Some(self.launches);
        info!("Launching search: {}", task);

        Ok(LaunchTicket {
            id: self.launches,
            request: CreateTaskRequest {
                task,
                max_results: options.max_results,
                use_ai_analysis: options.use_ai_analysis,
            },
        })
    }

    /// Apply the task-launching service's reply.
    ///
    /// Returns false when the reply belongs to a launch that was cancelled
    /// or superseded; such replies are discarded.
    pub fn finish_launch(&mut self, ticket: u64, outcome: Result<TaskId, LaunchError>) -> bool {
        if self.pending_launch != Some(ticket) {
            debug!("Discarding late reply for launch {}", ticket);
            return false;
        }
        self.pending_launch = None;

        match outcome {
            Ok(task_id) => {
                info!("Search started as task {}", task_id);
                self.progress = aggregator::begin_task(mem::take(&mut self.progress), task_id.clone());
                match self.connection.open(task_id) {
                    Ok(_) => self.metrics.record_open(),
                    Err(e) => self.notice = Some(e.to_string()),
                }
            }
            Err(e) => {
                let message = format!("Failed to start search: {}", e);
                warn!("{}", message);
                self.progress = aggregator::record_launch_failure(mem::take(&mut self.progress), message.clone());
                self.notice = Some(message);
            }
        }
        true
    }

    /// Forget the current task: close the channel and reset the progress
    pub fn cancel_search(&mut self) {
        if let Some(task_id) = self.connection.current_task() {
            info!("Cancelling search {}", task_id);
        }
        self.connection.close();
        self.progress = TaskProgress::initial();
        self.pending_launch = None;
        self.notice = None;
        self.connection_lost = false;
    }

    pub fn handle_channel(&mut self, event: ChannelEvent) {
        let ChannelEvent { connection, kind } = event;
        match kind {
            ChannelEventKind::Opened => {
                if self.connection.on_opened(connection) {
                    self.notice = None;
                }
            }
            ChannelEventKind::Message(text) => self.handle_message(connection, &text),
            ChannelEventKind::Failed(error) => {
                let was_active = self.connection.is_active(connection);
                self.connection.on_failed(connection, &error);
                if was_active {
                    self.notice = Some("Connection error. Retrying...".to_string());
                }
            }
            ChannelEventKind::Closed { reason } => {
                if let Some(reason) = &reason {
                    debug!("Channel {} closed: {}", connection, reason);
                }
                match self.connection.on_closed(connection) {
                    CloseOutcome::Retrying { .. } => self.metrics.record_reconnect(),
                    CloseOutcome::GaveUp(failure) => {
                        self.notice = Some(failure.to_string());
                        self.connection_lost = true;
                    }
                    CloseOutcome::Idle | CloseOutcome::Ignored => {}
                }
            }
        }
    }

    /// A reconnect timer fired
    pub fn handle_retry(&mut self, ticket: RetryTicket) {
        match self.connection.on_retry_due(ticket) {
            Ok(Some(_)) => self.metrics.record_open(),
            Ok(None) => {}
            Err(e) => self.notice = Some(e.to_string()),
        }
    }

    fn handle_message(&mut self, connection: ConnectionId, text: &str) {
        if !self.connection.is_active(connection) {
            debug!("Dropping message from stale channel {}", connection);
            return;
        }

        let inbound = match classify(text, Utc::now()) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Dropping undecodable message on {}: {}", connection, e);
                self.metrics.record_decode_failure();
                return;
            }
        };

        let kind = inbound.event.kind();
        let (next, verdict) = aggregator::fold(mem::take(&mut self.progress), inbound);
        self.progress = next;

        match verdict {
            Verdict::Applied => self.metrics.record_applied(kind),
            Verdict::Regressed { from, to } => {
                warn!("Progress went backwards from {} to {}; applying latest snapshot", from, to);
                self.metrics.record_regression(kind);
            }
            Verdict::Rejected(reason) => {
                warn!("Rejected inconsistent '{}' event: {}", kind, reason);
                self.metrics.record_rejected();
            }
        }
    }
}
