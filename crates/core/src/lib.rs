//! Solarsync core: domain models, the entity registry and the sync contracts
//! shared by the local store and the cloud transport.

pub mod errors;
pub mod sync;

pub use errors::{DatabaseError, Error, Result, SyncError};
