use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use actix::Addr;
use async_trait::async_trait;

use crate::ensemble::Ensemble;
use crate::error::{CoordinationError, Result};
use crate::session::{Connection, Connector, CreateMode, Session, SessionId, Watch};
use crate::EnsembleRequest;

/// A session on an in-process [`Ensemble`].
pub struct MemorySession {
    id: SessionId,
    ensemble: Addr<Ensemble>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession").field("id", &self.id).finish()
    }
}

impl MemorySession {
    async fn request(&self, request: EnsembleRequest) -> Result<crate::Reply> {
        self.ensemble.send(request).await?
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (exists, _) = self
            .request(EnsembleRequest::Exists {
                session: self.id,
                path: path.to_string(),
                watch: false,
            })
            .await?
            .into_exists()?;
        Ok(exists)
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        self.request(EnsembleRequest::Create {
            session: self.id,
            path: path.to_string(),
            data: data.to_vec(),
            mode,
        })
        .await?
        .into_created()
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.request(EnsembleRequest::Children {
            session: self.id,
            path: path.to_string(),
        })
        .await?
        .into_children()
    }

    async fn exists_watch(&self, path: &str) -> Result<(bool, Watch)> {
        match self
            .request(EnsembleRequest::Exists {
                session: self.id,
                path: path.to_string(),
                watch: true,
            })
            .await?
            .into_exists()?
        {
            (exists, Some(watch)) => Ok((exists, watch)),
            (_, None) => Err(CoordinationError::ConnectionLoss),
        }
    }

    async fn close(&self) -> Result<()> {
        self.request(EnsembleRequest::Close { session: self.id })
            .await?
            .into_done()
    }
}

/// Dials an in-process [`Ensemble`].
#[derive(Clone)]
pub struct MemoryConnector {
    ensemble: Addr<Ensemble>,
}

impl MemoryConnector {
    pub fn new(ensemble: Addr<Ensemble>) -> Self {
        Self { ensemble }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, servers: &[String], dial_timeout: Duration) -> Result<Connection> {
        let request = self.ensemble.send(EnsembleRequest::Connect {
            servers: servers.to_vec(),
        });
        let id = tokio::time::timeout(dial_timeout, request)
            .await
            .map_err(|_| CoordinationError::Timeout(dial_timeout))???
            .into_session()?;
        Ok(Arc::new(MemorySession {
            id,
            ensemble: self.ensemble.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::MemoryEnsemble;
    use crate::session::WatchEvent;

    fn servers() -> Vec<String> {
        vec!["zoo1:2181".to_string(), "zoo2:2181".to_string()]
    }

    async fn dial(ensemble: &MemoryEnsemble) -> Connection {
        ensemble
            .connector()
            .connect(&servers(), Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[actix_rt::test]
    async fn test_sessions_get_distinct_ids() {
        let ensemble = MemoryEnsemble::start(servers());
        let first = dial(&ensemble).await;
        let second = dial(&ensemble).await;
        assert_ne!(first.id(), second.id());
    }

    #[actix_rt::test]
    async fn test_any_matching_server_accepts_the_dial() {
        let ensemble = MemoryEnsemble::start(vec!["zoo2:2181".to_string()]);
        assert!(ensemble
            .connector()
            .connect(&servers(), Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[actix_rt::test]
    async fn test_offline_dial_is_unavailable() {
        let ensemble = MemoryEnsemble::start(servers());
        ensemble.set_online(false).await.unwrap();
        let err = ensemble
            .connector()
            .connect(&servers(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, CoordinationError::Unavailable("zoo1:2181,zoo2:2181".into()));

        ensemble.set_online(true).await.unwrap();
        assert!(ensemble
            .connector()
            .connect(&servers(), Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[actix_rt::test]
    async fn test_close_deletes_ephemeral_nodes() {
        let ensemble = MemoryEnsemble::start(servers());
        let owner = dial(&ensemble).await;
        let watcher = dial(&ensemble).await;

        owner.create("/election", &[], CreateMode::Persistent).await.unwrap();
        let node = owner
            .create("/election/guid-n_", b"candidate", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(node, "/election/guid-n_0000000000");
        assert!(watcher.exists(&node).await.unwrap());

        let (exists, watch) = watcher.exists_watch(&node).await.unwrap();
        assert!(exists);

        owner.close().await.unwrap();
        assert_eq!(watch.changed().await, WatchEvent::Deleted(node.clone()));
        assert!(!watcher.exists(&node).await.unwrap());
        assert!(watcher.exists("/election").await.unwrap());
        assert!(watcher.children("/election").await.unwrap().is_empty());

        assert_eq!(
            owner.children("/election").await.unwrap_err(),
            CoordinationError::Closed(owner.id())
        );
        assert_eq!(
            owner.close().await.unwrap_err(),
            CoordinationError::Closed(owner.id())
        );
    }

    #[actix_rt::test]
    async fn test_expired_session_is_reported() {
        let ensemble = MemoryEnsemble::start(servers());
        let session = dial(&ensemble).await;
        ensemble.expire(session.id()).await.unwrap();
        assert_eq!(
            session.exists("/").await.unwrap_err(),
            CoordinationError::SessionExpired(session.id())
        );
    }

    #[actix_rt::test]
    async fn test_watch_on_missing_node_fires_on_create() {
        let ensemble = MemoryEnsemble::start(servers());
        let session = dial(&ensemble).await;

        let (exists, watch) = session.exists_watch("/election").await.unwrap();
        assert!(!exists);
        session.create("/election", &[], CreateMode::Persistent).await.unwrap();
        assert_eq!(watch.changed().await, WatchEvent::Created("/election".into()));
    }
}
