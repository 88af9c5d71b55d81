//! Async driver for [`SearchSession`].
//!
//! Launch replies, channel traffic and retry timers are all funnelled into
//! one unbounded queue and applied in order. After every input the driver
//! publishes a fresh [`SessionView`] on a watch channel.
//!
//! Only [`SessionHandle`]s hold the queue's strong senders. Everything the
//! driver spawns holds a weak one, so dropping the last handle stops it.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::manager::ConnectionManager;
use crate::channel::retry::{RetryPolicy, RetryTicket, TokioScheduler};
use crate::channel::transport::{ChannelEvent, StreamEndpoint, WsConnector};
use crate::error::{LaunchError, SearchError};
use crate::progress::model::TaskId;
use crate::session::initiator::{validate_search, LaunchTicket, SearchOptions, SearchSession, SessionView};
use crate::session::launcher::TaskLauncher;

/// Everything the driver reacts to
#[derive(Debug)]
pub enum SessionInput {
    Start {
        description: String,
        options: SearchOptions,
    },
    Cancel,
    Launched {
        ticket: u64,
        outcome: Result<TaskId, LaunchError>,
    },
    Channel(ChannelEvent),
    RetryDue(RetryTicket),
    Shutdown,
}

impl From<ChannelEvent> for SessionInput {
    fn from(event: ChannelEvent) -> Self {
        SessionInput::Channel(event)
    }
}

impl From<RetryTicket> for SessionInput {
    fn from(ticket: RetryTicket) -> Self {
        SessionInput::RetryDue(ticket)
    }
}

pub type LiveSession = SearchSession<WsConnector<SessionInput>, TokioScheduler<SessionInput>>;

/// Owns the session and applies inputs one at a time
pub struct SessionDriver {
    session: LiveSession,
    launcher: Arc<dyn TaskLauncher>,
    inputs: mpsc::UnboundedReceiver<SessionInput>,
    loopback: mpsc::WeakUnboundedSender<SessionInput>,
    view: watch::Sender<SessionView>,
}

/// Cloneable front end of a running session
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<SessionInput>,
    view: watch::Receiver<SessionView>,
}

impl SessionDriver {
    pub fn new(
        launcher: Arc<dyn TaskLauncher>,
        endpoint: StreamEndpoint,
        policy: RetryPolicy,
    ) -> (Self, SessionHandle) {
        let (sender, inputs) = mpsc::unbounded_channel();
        let loopback = sender.downgrade();
        let connection = ConnectionManager::new(
            WsConnector::new(loopback.clone()),
            TokioScheduler::new(loopback.clone()),
            endpoint,
            policy,
        );
        let session = SearchSession::new(connection);
        let (view, view_rx) = watch::channel(session.view());

        let handle = SessionHandle {
            inputs: sender,
            view: view_rx,
        };
        let driver = Self {
            session,
            launcher,
            inputs,
            loopback,
            view,
        };
        (driver, handle)
    }

    /// Process inputs until [`SessionInput::Shutdown`] or the last handle
    /// is dropped
    pub async fn run(mut self) {
        info!("Search session started");

        while let Some(input) = self.inputs.recv().await {
            let stop = matches!(input, SessionInput::Shutdown);
            self.apply(input);
            self.view.send_replace(self.session.view());
            if stop {
                break;
            }
        }

        self.session.cancel_search();
        info!("Search session stopped");
    }

    fn apply(&mut self, input: SessionInput) {
        match input {
            SessionInput::Start { description, options } => {
                match self.session.start_search(&description, options) {
                    Ok(ticket) => self.launch(ticket),
                    Err(e) => debug!("Search not started: {}", e),
                }
            }
            SessionInput::Cancel => self.session.cancel_search(),
            SessionInput::Launched { ticket, outcome } => {
                self.session.finish_launch(ticket, outcome);
            }
            SessionInput::Channel(event) => self.session.handle_channel(event),
            SessionInput::RetryDue(ticket) => self.session.handle_retry(ticket),
            SessionInput::Shutdown => self.session.cancel_search(),
        }
    }

    fn launch(&self, ticket: LaunchTicket) {
        let launcher = Arc::clone(&self.launcher);
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let outcome = launcher.launch(&ticket.request).await;
            match loopback.upgrade() {
                Some(sender) => {
                    let _ = sender.send(SessionInput::Launched {
                        ticket: ticket.id,
                        outcome,
                    });
                }
                None => debug!("Session gone before launch {} replied", ticket.id),
            }
        });
    }
}

/// Spawn a driver on the current runtime
pub fn spawn_session(
    launcher: Arc<dyn TaskLauncher>,
    endpoint: StreamEndpoint,
    policy: RetryPolicy,
) -> (SessionHandle, JoinHandle<()>) {
    let (driver, handle) = SessionDriver::new(launcher, endpoint, policy);
    let task = tokio::spawn(driver.run());
    (handle, task)
}

impl SessionHandle {
    /// Start a new search, replacing whatever is being followed.
    ///
    /// Input is validated here so the caller hears about an empty
    /// description straight away.
    pub fn start_search(&self, description: &str, options: SearchOptions) -> Result<(), SearchError> {
        validate_search(description, &options)?;
        self.send(SessionInput::Start {
            description: description.to_string(),
            options,
        })
    }

    pub fn cancel_search(&self) -> Result<(), SearchError> {
        self.send(SessionInput::Cancel)
    }

    /// Cancel the current task and stop the driver
    pub fn shutdown(&self) -> Result<(), SearchError> {
        self.send(SessionInput::Shutdown)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Latest published view
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    fn send(&self, input: SessionInput) -> Result<(), SearchError> {
        self.inputs.send(input).map_err(|_| SearchError::SessionClosed)
    }
}
