//! Reconciliation engine for painting a ghost image onto a shared canvas.

pub mod api;
pub mod bot;
pub mod canvas;
pub mod error;
pub mod http;
pub mod local;
pub mod placement;
pub mod reconcile;
pub mod target;
pub mod tiles;

#[cfg(test)]
mod testing;

pub use api::{Collaborators, EnergyBudget, GhostImage, Session};
pub use bot::{BotState, BotStatus, EngineSettings, GhostBot, LoopExit, LoopStats, StartOutcome};
pub use error::{EngineError, EngineResult};
pub use target::FilterPolicy;
