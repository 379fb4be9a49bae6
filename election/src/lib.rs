//! A leader-election node.
//!
//! Candidates race for leadership through a coordination service: each one
//! registers an ephemeral, sequential node and the lowest sequence leads.
//! The leader proves it is alive by writing heartbeat markers into a local
//! directory, keeping only the newest few.
//!
//! The node is a small state machine (see [`states`]) whose states and
//! shared resources are built lazily, once, by a [`ResourceFactory`] and
//! driven by a [`LoopRunner`] until cancelled or out of options.

pub mod candidacy;
pub mod config;
pub mod error;
pub mod factory;
pub mod heartbeat;
pub mod retention;
pub mod runner;
pub mod states;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{ElectionError, ResourceError};
pub use factory::ResourceFactory;
pub use runner::LoopRunner;
pub use states::{AutomataState, State, StateKind};
