//! Starting searches and following them to the end.

pub mod initiator;
pub mod launcher;
pub mod runtime;

pub use initiator::{validate_search, LaunchTicket, SearchOptions, SearchSession, SessionView};
pub use launcher::{CreateTaskRequest, HttpLauncher, TaskLauncher};
pub use runtime::{spawn_session, SessionDriver, SessionHandle, SessionInput};
