//! Sessions on a ZooKeeper ensemble.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};
use zookeeper_client as zk;

use crate::error::{CoordinationError, Result};
use crate::session::{Connection, Connector, CreateMode, Session, SessionId, Watch, WatchEvent};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Dials a ZooKeeper ensemble over the network.
#[derive(Debug, Clone, Default)]
pub struct ZooKeeperConnector;

#[async_trait]
impl Connector for ZooKeeperConnector {
    async fn connect(&self, servers: &[String], dial_timeout: Duration) -> Result<Connection> {
        let cluster = servers.join(",");
        let client = tokio::time::timeout(dial_timeout, zk::Client::connect(&cluster))
            .await
            .map_err(|_| CoordinationError::Timeout(dial_timeout))?
            .map_err(|e| CoordinationError::Unavailable(format!("{}: {}", cluster, e)))?;

        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        info!(session = id, cluster = %cluster, "zookeeper session established");
        Ok(Arc::new(ZooKeeperSession {
            id,
            client: Mutex::new(Some(client)),
        }))
    }
}

/// A live ZooKeeper session.
///
/// The id is local to this process; the server-side id is not exposed.
pub struct ZooKeeperSession {
    id: SessionId,
    client: Mutex<Option<zk::Client>>,
}

impl fmt::Debug for ZooKeeperSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZooKeeperSession").field("id", &self.id).finish()
    }
}

impl ZooKeeperSession {
    fn client(&self) -> Result<zk::Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CoordinationError::Closed(self.id))
    }

    fn error(&self, path: &str, e: zk::Error) -> CoordinationError {
        map_error(self.id, path, e)
    }
}

#[async_trait]
impl Session for ZooKeeperSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let client = self.client()?;
        let stat = client
            .check_stat(path)
            .await
            .map_err(|e| self.error(path, e))?;
        Ok(stat.is_some())
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let client = self.client()?;
        let options = zk_mode(mode).with_acls(zk::Acls::anyone_all());
        let (_, sequence) = client
            .create(path, data, &options)
            .await
            .map_err(|e| match e {
                // ZooKeeper reports a missing parent as NoNode on create
                zk::Error::NoNode => CoordinationError::NoParent(path.to_string()),
                other => self.error(path, other),
            })?;
        if mode.is_sequential() {
            Ok(format!("{}{}", path, sequence))
        } else {
            Ok(path.to_string())
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let client = self.client()?;
        client
            .list_children(path)
            .await
            .map_err(|e| self.error(path, e))
    }

    async fn exists_watch(&self, path: &str) -> Result<(bool, Watch)> {
        let client = self.client()?;
        let (stat, watcher) = client
            .check_and_watch_stat(path)
            .await
            .map_err(|e| self.error(path, e))?;

        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            let event = watcher.changed().await;
            debug!(path = %event.path, kind = ?event.event_type, "zookeeper watch fired");
            let _ = sender.send(watch_event(event));
        });
        Ok((stat.is_some(), Watch::new(receiver)))
    }

    async fn close(&self) -> Result<()> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CoordinationError::Closed(self.id))?;
        // the session ends with its last client handle
        drop(client);
        info!(session = self.id, "zookeeper session closed");
        Ok(())
    }
}

fn zk_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::PersistentSequential => zk::CreateMode::PersistentSequential,
        CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
    }
}

fn watch_event(event: zk::WatchedEvent) -> WatchEvent {
    match event.event_type {
        zk::EventType::NodeCreated => WatchEvent::Created(event.path),
        zk::EventType::NodeDeleted => WatchEvent::Deleted(event.path),
        _ => WatchEvent::SessionClosed,
    }
}

fn map_error(session: SessionId, path: &str, e: zk::Error) -> CoordinationError {
    match e {
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::ConnectionLoss => CoordinationError::ConnectionLoss,
        zk::Error::SessionExpired => CoordinationError::SessionExpired(session),
        zk::Error::ClientClosed => CoordinationError::Closed(session),
        other => CoordinationError::Unavailable(other.to_string()),
    }
}
