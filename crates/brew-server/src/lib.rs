//! # brew-server
//!
//! Tea-round coordination over WebSockets.
//!
//! Each kettle is a single task owning its round state; drinkers talk to it
//! through a command channel and receive replies through a bounded mailbox
//! drained by their connection's writer.
//!
//! - **Hub**: process-wide registry of live kettles
//! - **Kettle**: one round at a time, one maker per round
//! - **Connection**: read/write loops with keep-alive and deadlines
//! - **Mirror**: best-effort store updates and offer notifications
//! - **Directory**: participant and kettle registration for notifications

#![deny(unsafe_code)]

pub mod connection;
pub mod directory;
pub mod drinker;
pub mod error;
pub mod hub;
pub mod kettle;
pub mod mirror;
pub mod notify;
pub mod server;
pub mod shutdown;

pub use connection::{serve_drinker, ConnectionLimits};
pub use drinker::{Drinker, DrinkerAgent, Mailbox, MailboxError};
pub use error::ApiError;
pub use hub::Hub;
pub use kettle::{Kettle, KettleConfig, KettleHandle, RoundSnapshot, RoundStatus};
pub use mirror::{spawn_mirror, MirrorConfig, RoundMirror};
pub use notify::{LogNotifier, Notifier, NotifyError};
pub use server::{AppState, BrewServer, HealthResponse};
pub use shutdown::ShutdownCoordinator;
