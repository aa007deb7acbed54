//! Handlers for each job kind.

mod maintenance;
mod process;

pub use maintenance::{EntityMergeHandler, LeaseReclaimHandler, SprintExpiryHandler};
pub use process::ProcessInteractionHandler;
