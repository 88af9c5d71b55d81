pub mod manager;
pub mod retry;
pub mod transport;

// Re-export common types
pub use manager::{CloseOutcome, ConnectionManager, ConnectionStatus};
pub use retry::{RetryPolicy, RetryTicket, Scheduler, TokioScheduler};
pub use transport::{ChannelEvent, ChannelEventKind, ConnectionId, Connector, StreamEndpoint, WsConnector};
