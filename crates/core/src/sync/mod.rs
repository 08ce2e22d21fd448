//! Sync domain models and contracts.

mod checkpoint;
mod clock_gate;
mod entitlement;
mod entity;
mod payload;
mod ports;
mod record;

pub use checkpoint::*;
pub use clock_gate::*;
pub use entitlement::*;
pub use entity::*;
pub use payload::*;
pub use ports::*;
pub use record::*;
