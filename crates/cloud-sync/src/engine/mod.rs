//! Push, pull, clock gate and the orchestrator that sequences them.

mod gate;
mod orchestrator;
mod pull;
mod push;
mod report;

#[cfg(test)]
mod testing;

pub use gate::*;
pub use orchestrator::*;
pub use pull::*;
pub use push::*;
pub use report::*;
