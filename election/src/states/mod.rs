//! The election state machine.
//!
//! Each state runs one step of the protocol and names its successor, which
//! it obtains from the [`ResourceFactory`](crate::factory::ResourceFactory)
//! rather than building it. The runner keeps asking the current state for
//! the next one until a state answers with none.

pub mod attempter;
pub mod empty;
pub mod failover;
pub mod init;
pub mod leader;
pub mod stopping;

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ElectionError, ResourceError};
use crate::factory::ResourceFactory;

pub use attempter::AttempterState;
pub use empty::EmptyState;
pub use failover::FailoverState;
pub use init::InitState;
pub use leader::LeaderState;
pub use stopping::StoppingState;

/// A shared, memoized state.
pub type State = Arc<dyn AutomataState>;

/// What a state run resolves to: the next state, none to finish, or an
/// error that aborts the runner.
pub type Transition = Result<Option<State>, ElectionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Empty,
    Init,
    Attempter,
    Leader,
    Failover,
    Stopping,
}

impl StateKind {
    pub fn name(self) -> &'static str {
        match self {
            StateKind::Empty => "Empty",
            StateKind::Init => "Init",
            StateKind::Attempter => "Attempter",
            StateKind::Leader => "Leader",
            StateKind::Failover => "Failover",
            StateKind::Stopping => "Stopping",
        }
    }

    /// Value of the `subsystem` field on the state's log events.
    pub fn subsystem(self) -> &'static str {
        match self {
            StateKind::Empty => "EmptyState",
            StateKind::Init => "InitState",
            StateKind::Attempter => "AttempterState",
            StateKind::Leader => "LeaderState",
            StateKind::Failover => "FailoverState",
            StateKind::Stopping => "StoppingState",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait AutomataState: Send + Sync {
    fn kind(&self) -> StateKind;

    /// Runs this state to its transition.
    ///
    /// Cancellation is not an error: a state that observes `cancel` hands
    /// over to the stopping state.
    async fn run(&self, cancel: &CancellationToken) -> Transition;
}

impl fmt::Debug for dyn AutomataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}State", self.kind())
    }
}

/// A state's non-owning reference back to its factory.
///
/// The factory memoizes the states, so states must not keep it alive.
#[derive(Clone)]
pub struct FactoryHandle(Weak<ResourceFactory>);

impl FactoryHandle {
    pub fn new(factory: Weak<ResourceFactory>) -> Self {
        Self(factory)
    }

    pub fn upgrade(&self) -> Result<Arc<ResourceFactory>, ResourceError> {
        self.0.upgrade().ok_or(ResourceError::FactoryDropped)
    }
}
