//! Lazily built, memoized resources of one election node.
//!
//! The [`ResourceFactory`] owns the configuration, the root logging span, the
//! coordination connection and one memo cell per state. States get their
//! siblings and the shared connection only through it.
//!
//! Attempter, Leader and Stopping are built against the connection that is
//! installed when they are first requested. Installing a different connection
//! invalidates those three cells, so a state bound to a superseded session is
//! never handed out again.

mod memo_cell;

use std::sync::{Arc, Mutex, PoisonError, Weak};

use coordination::{Connection, Connector};
use tracing::{debug, info_span, Span};

pub use memo_cell::MemoCell;

use crate::config::Config;
use crate::error::{ElectionError, ResourceError};
use crate::states::{
    AttempterState, EmptyState, FactoryHandle, FailoverState, InitState, LeaderState, State,
    StateKind, StoppingState,
};

pub struct ResourceFactory {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    connection: Mutex<Option<Connection>>,
    logger: MemoCell<Span>,
    empty: MemoCell<State>,
    init: MemoCell<State>,
    attempter: MemoCell<State>,
    leader: MemoCell<State>,
    failover: MemoCell<State>,
    stopping: MemoCell<State>,
    this: Weak<ResourceFactory>,
}

impl ResourceFactory {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config: Arc::new(config),
            connector,
            connection: Mutex::new(None),
            logger: MemoCell::new("logger"),
            empty: MemoCell::new("Empty"),
            init: MemoCell::new("Init"),
            attempter: MemoCell::new("Attempter"),
            leader: MemoCell::new("Leader"),
            failover: MemoCell::new("Failover"),
            stopping: MemoCell::new("Stopping"),
            this: this.clone(),
        })
    }

    /// Like [`ResourceFactory::new`], rejecting a configuration that fails
    /// [`Config::validate`].
    pub fn validated(
        config: Config,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>, ElectionError> {
        config.validate()?;
        Ok(Self::new(config, connector))
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn logger(&self) -> Result<Span, ResourceError> {
        self.logger
            .get_or_init(|| Ok(info_span!("election", node = %self.config.node_name())))
    }

    /// Opens a new session with the configured servers and dial timeout.
    ///
    /// The session is not installed; see [`ResourceFactory::set_connection`].
    pub async fn dial(&self) -> Result<Connection, ElectionError> {
        let timeout = self.config.dial_timeout();
        match tokio::time::timeout(timeout, self.connector.connect(self.config.servers(), timeout))
            .await
        {
            Ok(dialed) => dialed.map_err(ElectionError::Connection),
            Err(_) => Err(ElectionError::Connection(
                coordination::CoordinationError::Timeout(timeout),
            )),
        }
    }

    pub fn connection(&self) -> Option<Connection> {
        self.lock_connection().clone()
    }

    /// Installs `connection` as the shared session.
    ///
    /// If it differs from the installed one, the connection-dependent states
    /// are invalidated and the superseded connection is returned so the
    /// caller can close it. Installing the same session again is a no-op.
    pub fn set_connection(&self, connection: Connection) -> Option<Connection> {
        let replaced = {
            let mut current = self.lock_connection();
            if matches!(current.as_ref(), Some(installed) if installed.id() == connection.id()) {
                return None;
            }
            current.replace(connection)
        };

        let attempter = self.attempter.invalidate();
        let leader = self.leader.invalidate();
        let stopping = self.stopping.invalidate();
        debug!(
            attempter,
            leader,
            stopping,
            replaced = replaced.as_ref().map(|c| c.id()),
            "connection installed, dependent states invalidated"
        );
        replaced
    }

    /// Forgets the installed connection if it is session `id`.
    ///
    /// Used once the session has been closed; memoized states are left alone.
    pub fn release_connection(&self, id: coordination::SessionId) -> Option<Connection> {
        let mut current = self.lock_connection();
        match current.as_ref() {
            Some(installed) if installed.id() == id => current.take(),
            _ => None,
        }
    }

    pub fn empty_state(&self) -> Result<State, ResourceError> {
        self.empty.get_or_init(|| {
            let span = self.state_span(StateKind::Empty)?;
            Ok(Arc::new(EmptyState::new(span)) as State)
        })
    }

    pub fn init_state(&self) -> Result<State, ResourceError> {
        self.init.get_or_init(|| {
            let span = self.state_span(StateKind::Init)?;
            Ok(Arc::new(InitState::new(span, self.config.clone(), self.handle())) as State)
        })
    }

    pub fn attempter_state(&self) -> Result<State, ResourceError> {
        self.attempter.get_or_init(|| {
            let span = self.state_span(StateKind::Attempter)?;
            let connection = self.connection().ok_or(ResourceError::NoConnection)?;
            Ok(Arc::new(AttempterState::new(
                span,
                self.config.clone(),
                connection,
                self.handle(),
            )) as State)
        })
    }

    pub fn leader_state(&self) -> Result<State, ResourceError> {
        self.leader.get_or_init(|| {
            let span = self.state_span(StateKind::Leader)?;
            let connection = self.connection().ok_or(ResourceError::NoConnection)?;
            Ok(Arc::new(LeaderState::new(
                span,
                self.config.clone(),
                connection,
                self.handle(),
            )) as State)
        })
    }

    pub fn failover_state(&self) -> Result<State, ResourceError> {
        self.failover.get_or_init(|| {
            let span = self.state_span(StateKind::Failover)?;
            Ok(Arc::new(FailoverState::new(span, self.config.clone(), self.handle())) as State)
        })
    }

    /// The stopping state; unlike Attempter and Leader it may be built
    /// before any connection exists.
    pub fn stopping_state(&self) -> Result<State, ResourceError> {
        self.stopping.get_or_init(|| {
            let span = self.state_span(StateKind::Stopping)?;
            Ok(Arc::new(StoppingState::new(span, self.connection(), self.handle())) as State)
        })
    }

    fn state_span(&self, kind: StateKind) -> Result<Span, ResourceError> {
        let root = self.logger()?;
        Ok(info_span!(parent: &root, "state", subsystem = kind.subsystem()))
    }

    fn handle(&self) -> FactoryHandle {
        FactoryHandle::new(self.this.clone())
    }

    fn lock_connection(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
