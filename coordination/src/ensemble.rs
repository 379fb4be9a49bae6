//! An in-process coordination ensemble.
//!
//! [`Ensemble`] is an actor owning a hierarchical node tree with ephemeral and
//! sequential nodes and one-shot existence watches. It backs the tests and the
//! local-cluster binary; [`MemoryEnsemble`] is the cloneable handle used to
//! dial it and to inject failures.

use std::collections::{BTreeMap, HashMap};

use actix::{Actor, Addr, Context, Handler};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::{CoordinationError, Result};
use crate::memory_session::MemoryConnector;
use crate::session::{CreateMode, SessionId, Watch, WatchEvent};
use crate::{EnsembleRequest, Reply};

const ROOT: &str = "/";

// Node payloads are accepted but not retained; nothing reads them back.
struct Node {
    owner: Option<SessionId>,
    next_sequence: u64,
}

impl Node {
    fn new(owner: Option<SessionId>) -> Self {
        Self {
            owner,
            next_sequence: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Live,
    Expired,
    Closed,
}

struct PendingWatch {
    owner: SessionId,
    sender: oneshot::Sender<WatchEvent>,
}

pub struct Ensemble {
    servers: Vec<String>,
    online: bool,
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, SessionState>,
    watches: HashMap<String, Vec<PendingWatch>>,
    next_session: SessionId,
    lost_creates: u32,
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some(ROOT),
        Some(0) | None => None,
        Some(index) => Some(&path[..index]),
    }
}

fn valid_path(path: &str) -> bool {
    path == ROOT || (path.starts_with('/') && !path.ends_with('/') && !path.contains("//"))
}

impl Ensemble {
    pub fn new(servers: Vec<String>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), Node::new(None));
        Self {
            servers,
            online: true,
            nodes,
            sessions: HashMap::new(),
            watches: HashMap::new(),
            next_session: 1,
            lost_creates: 0,
        }
    }

    fn connect(&mut self, servers: &[String]) -> Result<Reply> {
        if !self.online || !servers.iter().any(|s| self.servers.contains(s)) {
            return Err(CoordinationError::Unavailable(servers.join(",")));
        }
        let session = self.next_session;
        self.next_session += 1;
        self.sessions.insert(session, SessionState::Live);
        info!(session, "session established");
        Ok(Reply::Connected(session))
    }

    fn check_session(&self, session: SessionId) -> Result<()> {
        if !self.online {
            return Err(CoordinationError::ConnectionLoss);
        }
        match self.sessions.get(&session) {
            Some(SessionState::Live) => Ok(()),
            Some(SessionState::Closed) => Err(CoordinationError::Closed(session)),
            Some(SessionState::Expired) | None => Err(CoordinationError::SessionExpired(session)),
        }
    }

    fn exists(&mut self, session: SessionId, path: String, watch: bool) -> Result<Reply> {
        self.check_session(session)?;
        let exists = self.nodes.contains_key(&path);
        let watch = watch.then(|| {
            self.prune_watches();
            let (sender, receiver) = oneshot::channel();
            self.watches.entry(path).or_default().push(PendingWatch {
                owner: session,
                sender,
            });
            Watch::new(receiver)
        });
        Ok(Reply::Exists { exists, watch })
    }

    fn create(
        &mut self,
        session: SessionId,
        path: String,
        mode: CreateMode,
    ) -> Result<Reply> {
        self.check_session(session)?;
        if !valid_path(&path) || path == ROOT {
            return Err(CoordinationError::NoNode(path));
        }
        let parent_path = parent_of(&path).ok_or_else(|| CoordinationError::NoParent(path.clone()))?;
        let parent = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| CoordinationError::NoParent(path.clone()))?;
        if parent.owner.is_some() {
            // ephemeral nodes cannot have children
            return Err(CoordinationError::NoParent(path));
        }

        let path = if mode.is_sequential() {
            let sequence = parent.next_sequence;
            parent.next_sequence += 1;
            format!("{}{:010}", path, sequence)
        } else {
            path
        };
        if self.nodes.contains_key(&path) {
            return Err(CoordinationError::NodeExists(path));
        }

        let owner = mode.is_ephemeral().then_some(session);
        self.nodes.insert(path.clone(), Node::new(owner));
        debug!(session, path = %path, ?mode, "node created");
        self.fire(&path, WatchEvent::Created(path.clone()));

        if self.lost_creates > 0 {
            self.lost_creates -= 1;
            debug!(session, path = %path, "dropping create reply");
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(Reply::Created(path))
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        if !self.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        let prefix = if path == ROOT {
            ROOT.to_string()
        } else {
            format!("{}/", path)
        };
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter_map(|key| {
                let name = &key[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
            })
            .collect())
    }

    fn end_session(&mut self, session: SessionId, state: SessionState) -> Result<Reply> {
        match self.sessions.get(&session) {
            Some(SessionState::Live) => {}
            Some(SessionState::Closed) => return Err(CoordinationError::Closed(session)),
            Some(SessionState::Expired) | None => {
                return Err(CoordinationError::SessionExpired(session))
            }
        }
        self.sessions.insert(session, state);

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.nodes.remove(path);
            self.fire(path, WatchEvent::Deleted(path.clone()));
        }

        for pending in self.watches.values_mut() {
            let (mine, others): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|watch| watch.owner == session);
            *pending = others;
            for watch in mine {
                let _ = watch.sender.send(WatchEvent::SessionClosed);
            }
        }
        self.watches.retain(|_, pending| !pending.is_empty());

        info!(
            session,
            removed = owned.len(),
            watches = self.pending_watches(),
            ?state,
            "session ended"
        );
        Ok(Reply::Done)
    }

    fn prune_watches(&mut self) {
        self.watches.retain(|_, pending| {
            pending.retain(|watch| !watch.sender.is_closed());
            !pending.is_empty()
        });
    }

    fn pending_watches(&self) -> usize {
        self.watches.values().map(Vec::len).sum()
    }

    fn fire(&mut self, path: &str, event: WatchEvent) {
        if let Some(pending) = self.watches.remove(path) {
            for watch in pending {
                // The watcher may have stopped listening, which is fine.
                let _ = watch.sender.send(event.clone());
            }
        }
    }
}

impl Actor for Ensemble {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        info!(servers = %self.servers.join(","), "ensemble started");
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        info!("ensemble stopped");
    }
}

impl Handler<EnsembleRequest> for Ensemble {
    type Result = Result<Reply>;

    fn handle(&mut self, msg: EnsembleRequest, _ctx: &mut Context<Self>) -> Self::Result {
        match msg {
            EnsembleRequest::Connect { servers } => self.connect(&servers),
            EnsembleRequest::Exists {
                session,
                path,
                watch,
            } => self.exists(session, path, watch),
            EnsembleRequest::Create {
                session,
                path,
                data: _,
                mode,
            } => self.create(session, path, mode),
            EnsembleRequest::Children { session, path } => {
                self.check_session(session)?;
                self.children(&path).map(Reply::Children)
            }
            EnsembleRequest::Close { session } => self.end_session(session, SessionState::Closed),
            EnsembleRequest::Expire { session } => self.end_session(session, SessionState::Expired),
            EnsembleRequest::SetOnline { online } => {
                info!(online, "ensemble availability changed");
                self.online = online;
                Ok(Reply::Done)
            }
            EnsembleRequest::LoseCreates { count } => {
                self.lost_creates = count;
                Ok(Reply::Done)
            }
            EnsembleRequest::Inspect { path } => self.children(&path).map(Reply::Children),
        }
    }
}

/// Handle to a running [`Ensemble`] actor.
#[derive(Clone)]
pub struct MemoryEnsemble {
    addr: Addr<Ensemble>,
}

impl MemoryEnsemble {
    /// Starts an ensemble answering on `servers`.
    ///
    /// Must be called from within a running actix system.
    pub fn start(servers: Vec<String>) -> Self {
        Self {
            addr: Ensemble::new(servers).start(),
        }
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector::new(self.addr.clone())
    }

    /// Takes the ensemble offline (dials fail, requests lose their connection)
    /// or brings it back.
    pub async fn set_online(&self, online: bool) -> Result<()> {
        self.addr
            .send(EnsembleRequest::SetOnline { online })
            .await??
            .into_done()
    }

    pub async fn expire(&self, session: SessionId) -> Result<()> {
        self.addr
            .send(EnsembleRequest::Expire { session })
            .await??
            .into_done()
    }

    /// Makes the next `count` creates report [`CoordinationError::ConnectionLoss`]
    /// after they were applied.
    pub async fn lose_creates(&self, count: u32) -> Result<()> {
        self.addr
            .send(EnsembleRequest::LoseCreates { count })
            .await??
            .into_done()
    }

    /// Lists the children of `path` without going through a session.
    pub async fn inspect(&self, path: &str) -> Result<Vec<String>> {
        self.addr
            .send(EnsembleRequest::Inspect {
                path: path.to_string(),
            })
            .await??
            .into_children()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::Connector;

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/election"), Some("/"));
        assert_eq!(parent_of("/election/n_0000000001"), Some("/election"));
        assert_eq!(parent_of("/"), None);
        assert_eq!(parent_of("election"), None);
    }

    #[test]
    fn test_sequential_names_are_per_parent() {
        let mut ensemble = Ensemble::new(vec!["zoo1:2181".into()]);
        let session = ensemble.connect(&["zoo1:2181".into()]).unwrap().into_session().unwrap();
        ensemble
            .create(session, "/a".into(), CreateMode::Persistent)
            .unwrap();
        ensemble
            .create(session, "/b".into(), CreateMode::Persistent)
            .unwrap();

        let first = ensemble
            .create(session, "/a/n_".into(), CreateMode::EphemeralSequential)
            .unwrap()
            .into_created()
            .unwrap();
        let second = ensemble
            .create(session, "/a/n_".into(), CreateMode::EphemeralSequential)
            .unwrap()
            .into_created()
            .unwrap();
        let other = ensemble
            .create(session, "/b/n_".into(), CreateMode::PersistentSequential)
            .unwrap()
            .into_created()
            .unwrap();

        assert_eq!(first, "/a/n_0000000000");
        assert_eq!(second, "/a/n_0000000001");
        assert_eq!(other, "/b/n_0000000000");
        assert_eq!(
            ensemble.children("/a").unwrap(),
            vec!["n_0000000000".to_string(), "n_0000000001".to_string()]
        );
    }

    #[test]
    fn test_create_errors() {
        let mut ensemble = Ensemble::new(vec!["zoo1:2181".into()]);
        let session = ensemble.connect(&["zoo1:2181".into()]).unwrap().into_session().unwrap();
        ensemble
            .create(session, "/election".into(), CreateMode::Persistent)
            .unwrap();

        assert_eq!(
            ensemble
                .create(session, "/election".into(), CreateMode::Persistent)
                .unwrap_err(),
            CoordinationError::NodeExists("/election".into())
        );
        assert_eq!(
            ensemble
                .create(session, "/missing/n_".into(), CreateMode::Ephemeral)
                .unwrap_err(),
            CoordinationError::NoParent("/missing/n_".into())
        );
    }

    #[tokio::test]
    async fn test_expire_removes_ephemeral_nodes_and_fires_watches() {
        let mut ensemble = Ensemble::new(vec!["zoo1:2181".into()]);
        let owner = ensemble.connect(&["zoo1:2181".into()]).unwrap().into_session().unwrap();
        let watcher = ensemble.connect(&["zoo1:2181".into()]).unwrap().into_session().unwrap();
        ensemble
            .create(owner, "/election".into(), CreateMode::Persistent)
            .unwrap();
        let node = ensemble
            .create(owner, "/election/n_".into(), CreateMode::EphemeralSequential)
            .unwrap()
            .into_created()
            .unwrap();

        let (exists, watch) = ensemble
            .exists(watcher, node.clone(), true)
            .unwrap()
            .into_exists()
            .unwrap();
        assert!(exists);
        let watch = watch.unwrap();

        ensemble.end_session(owner, SessionState::Expired).unwrap();

        assert!(ensemble.children("/election").unwrap().is_empty());
        assert!(ensemble.nodes.contains_key("/election"));
        assert_eq!(watch.changed().await, WatchEvent::Deleted(node));
        assert_eq!(
            ensemble.check_session(owner).unwrap_err(),
            CoordinationError::SessionExpired(owner)
        );
    }

    #[test]
    fn test_offline_ensemble_rejects_dials_and_requests() {
        let mut ensemble = Ensemble::new(vec!["zoo1:2181".into()]);
        let session = ensemble.connect(&["zoo1:2181".into()]).unwrap().into_session().unwrap();
        ensemble.online = false;

        assert_eq!(
            ensemble.connect(&["zoo1:2181".into()]).unwrap_err(),
            CoordinationError::Unavailable("zoo1:2181".into())
        );
        assert_eq!(
            ensemble.check_session(session),
            Err(CoordinationError::ConnectionLoss)
        );
    }

    #[test]
    fn test_unknown_servers_are_unavailable() {
        let mut ensemble = Ensemble::new(vec!["zoo1:2181".into()]);
        assert_eq!(
            ensemble.connect(&["elsewhere:2181".into()]).unwrap_err(),
            CoordinationError::Unavailable("elsewhere:2181".into())
        );
    }

    #[actix_rt::test]
    async fn test_lost_create_is_applied() {
        let ensemble = MemoryEnsemble::start(vec!["zoo1:2181".into()]);
        ensemble.lose_creates(1).await.unwrap();

        let session = ensemble
            .connector()
            .connect(&["zoo1:2181".into()], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            session.create("/election", &[], CreateMode::Persistent).await,
            Err(CoordinationError::ConnectionLoss)
        );
        assert_eq!(ensemble.inspect("/").await.unwrap(), vec!["election".to_string()]);
    }

    #[test]
    fn test_abandoned_watches_do_not_pile_up() {
        let mut ensemble = Ensemble::new(vec!["zoo1:2181".into()]);
        let session = ensemble.connect(&["zoo1:2181".into()]).unwrap().into_session().unwrap();
        ensemble
            .create(session, "/election".into(), CreateMode::Persistent)
            .unwrap();

        for _ in 0..1000 {
            let (_, watch) = ensemble
                .exists(session, "/election".into(), true)
                .unwrap()
                .into_exists()
                .unwrap();
            drop(watch);
        }
        assert_eq!(ensemble.pending_watches(), 1);

        // a watch left on a vanished path goes once another is registered
        let (_, stale) = ensemble
            .exists(session, "/gone".into(), true)
            .unwrap()
            .into_exists()
            .unwrap();
        drop(stale);
        let (_, live) = ensemble
            .exists(session, "/election".into(), true)
            .unwrap()
            .into_exists()
            .unwrap();
        assert_eq!(ensemble.pending_watches(), 1);
        assert!(ensemble.watches.contains_key("/election"));
        drop(live);
    }
}
