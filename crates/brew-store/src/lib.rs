pub mod error;
pub mod geo;
pub mod kettles;
pub mod memory;

pub use error::StoreError;
pub use geo::Location;
pub use kettles::{KettleRecord, KettleStore, ParticipantRecord};
pub use memory::MemoryKettleStore;
