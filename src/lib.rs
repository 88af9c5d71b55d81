//! Client for long-running search tasks.
//!
//! A search is created over HTTP and then followed through a per-task
//! WebSocket channel. Inbound events are classified, folded into a single
//! [`progress::TaskProgress`] and republished to whoever renders it.

pub mod channel;
pub mod cli;
pub mod error;
pub mod progress;
pub mod session;
pub mod utils;

pub use error::{DecodeError, LaunchError, SearchError, TaskError, TransportError, ValidationError};
pub use progress::{TaskId, TaskProgress, TaskStatus};
pub use session::{spawn_session, SearchOptions, SessionHandle, SessionView};
