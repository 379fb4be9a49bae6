//! The coordination-service contract the election core is written against.
//!
//! A [`Connector`] dials the service and hands back a [`Connection`], a shared
//! handle to one live [`Session`]. Every node operation goes through the
//! session; ephemeral nodes live exactly as long as the session that created
//! them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;

/// Identifier the service assigns to a session.
pub type SessionId = u64;

/// A shared handle to a live session.
pub type Connection = Arc<dyn Session>;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// What a watch observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(String),
    Deleted(String),
    /// The session that registered the watch ended before it fired.
    SessionClosed,
}

/// A one-shot subscription to a node's existence.
#[derive(Debug)]
pub struct Watch {
    receiver: oneshot::Receiver<WatchEvent>,
}

impl Watch {
    pub fn new(receiver: oneshot::Receiver<WatchEvent>) -> Self {
        Self { receiver }
    }

    /// Waits until the watch fires.
    ///
    /// A watch whose sender went away without firing reports
    /// [`WatchEvent::SessionClosed`].
    pub async fn changed(self) -> WatchEvent {
        self.receiver.await.unwrap_or(WatchEvent::SessionClosed)
    }
}

#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    fn id(&self) -> SessionId;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Creates a node and returns its full path.
    ///
    /// Sequential modes append a zero-padded, per-parent increasing counter
    /// to `path`.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Lists the names (not full paths) of the children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Like [`Session::exists`], additionally registering a one-shot watch
    /// that fires when the node is created or deleted.
    async fn exists_watch(&self, path: &str) -> Result<(bool, Watch)>;

    /// Ends the session. Ephemeral nodes it owns are removed right away.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new session against any of `servers`, giving up after `dial_timeout`.
    async fn connect(&self, servers: &[String], dial_timeout: Duration) -> Result<Connection>;
}
