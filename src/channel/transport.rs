use std::collections::HashMap;
use std::fmt;

use futures::StreamExt;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;
use crate::progress::model::TaskId;

/// Identity of one physical channel; a reopen gets a new id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the transport reports about a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    Opened,
    Message(String),
    Failed(TransportError),
    Closed { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub connection: ConnectionId,
    pub kind: ChannelEventKind,
}

/// Opens and tears down physical channels.
///
/// Implementations report back asynchronously through [`ChannelEvent`]s;
/// every successful or failed `connect` ends with exactly one `Closed`
/// unless `disconnect` is called first.
pub trait Connector {
    fn connect(&mut self, connection: ConnectionId, url: Url);
    fn disconnect(&mut self, connection: ConnectionId);
}

/// Base address of the progress channel; tasks live at `{base}/ws/{task_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    base: Url,
}

impl StreamEndpoint {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Channel URL for one task, with the id encoded as a single path segment
    pub fn for_task(&self, task_id: &TaskId) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Endpoint {
                task_id: task_id.to_string(),
                reason: format!("{} cannot carry a path", self.base),
            })?
            .pop_if_empty()
            .push("ws")
            .push(task_id.as_str());
        Ok(url)
    }
}

/// Convert an HTTP service address into the matching WebSocket scheme
pub fn http_to_ws_url(http_url: &Url) -> Url {
    let mut url = http_url.clone();
    let scheme = match http_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    };
    // http(s) -> ws(s) keeps the URL "special", so set_scheme accepts it
    let _ = url.set_scheme(scheme);
    url
}

/// WebSocket transport over tokio-tungstenite.
///
/// Each channel runs in its own task and forwards what it sees to the
/// session's event loop. Only a weak sender is held, so open channels never
/// keep that loop alive on their own.
pub struct WsConnector<T> {
    events: WeakUnboundedSender<T>,
    channels: HashMap<ConnectionId, JoinHandle<()>>,
}

impl<T> WsConnector<T>
where
    T: From<ChannelEvent> + Send + 'static,
{
    pub fn new(events: WeakUnboundedSender<T>) -> Self {
        Self {
            events,
            channels: HashMap::new(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.channels.len()
    }
}

impl<T> Connector for WsConnector<T>
where
    T: From<ChannelEvent> + Send + 'static,
{
    fn connect(&mut self, connection: ConnectionId, url: Url) {
        self.channels.retain(|_, handle| !handle.is_finished());

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let emit = |kind: ChannelEventKind| match events.upgrade() {
                Some(events) => {
                    let _ = events.send(T::from(ChannelEvent { connection, kind }));
                }
                None => debug!("Event loop gone, dropping event for {}", connection),
            };

            debug!("Connecting {} to {}", connection, url);
            let mut stream = match connect_async(url.as_str()).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    emit(ChannelEventKind::Failed(TransportError::Connect(e.to_string())));
                    emit(ChannelEventKind::Closed { reason: None });
                    return;
                }
            };

            info!("Progress channel {} connected to {}", connection, url);
            emit(ChannelEventKind::Opened);

            let mut reason = None;

            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => emit(ChannelEventKind::Message(text)),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => emit(ChannelEventKind::Message(text)),
                        Err(_) => debug!("Dropping non-UTF-8 binary frame on {}", connection),
                    },
                    Ok(Message::Close(frame)) => {
                        reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Progress channel {} failed: {}", connection, e);
                        emit(ChannelEventKind::Failed(TransportError::Stream(e.to_string())));
                        break;
                    }
                }
            }

            emit(ChannelEventKind::Closed { reason });
        });

        self.channels.insert(connection, handle);
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(handle) = self.channels.remove(&connection) {
            debug!("Dropping progress channel {}", connection);
            handle.abort();
        }
    }
}

impl<T> Drop for WsConnector<T> {
    fn drop(&mut self) {
        for (_, handle) in self.channels.drain() {
            handle.abort();
        }
    }
}
