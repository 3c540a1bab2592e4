//! # brew-core
//!
//! Shared vocabulary for the kettle server: branded identifiers, the JSON
//! wire protocol spoken over the drinker WebSocket, and the error types that
//! cross crate boundaries.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::{KettleError, ProtocolError};
pub use ids::{DrinkerId, KettleId};
pub use protocol::{Command, DrinkRequest, Response, ResponseStatus, RoundEvent};
