use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coordination::{
    Connection, Connector, CoordinationError, CreateMode, MemoryEnsemble, Session, SessionId,
    Watch,
};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::Config;

pub(crate) const SERVER: &str = "zoo1:2181";

pub(crate) fn servers() -> Vec<String> {
    vec![SERVER.to_string()]
}

pub(crate) fn quick_config(dir: &Path) -> Config {
    Config::new(servers())
        .with_dial_timeout(Duration::from_secs(1))
        .with_heartbeat_interval(Duration::from_millis(20))
        .with_attempter_poll_interval(Duration::from_millis(100))
        .with_heartbeat_dir(dir)
        .with_failover_backoff(vec![Duration::ZERO, Duration::from_millis(10)])
}

pub(crate) fn start_ensemble() -> MemoryEnsemble {
    MemoryEnsemble::start(servers())
}

/// A session that accepts everything and remembers nothing.
#[derive(Debug)]
pub(crate) struct StubSession {
    id: SessionId,
    closed: AtomicUsize,
}

impl StubSession {
    pub(crate) fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) fn stub_session(id: SessionId) -> Arc<StubSession> {
    Arc::new(StubSession {
        id,
        closed: AtomicUsize::new(0),
    })
}

pub(crate) fn stub_connection(id: SessionId) -> Connection {
    stub_session(id)
}

#[async_trait]
impl Session for StubSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn exists(&self, _path: &str) -> coordination::Result<bool> {
        Ok(true)
    }

    async fn create(&self, path: &str, _data: &[u8], _mode: CreateMode) -> coordination::Result<String> {
        Ok(path.to_string())
    }

    async fn children(&self, _path: &str) -> coordination::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn exists_watch(&self, _path: &str) -> coordination::Result<(bool, Watch)> {
        let (_sender, receiver) = oneshot::channel();
        Ok((true, Watch::new(receiver)))
    }

    async fn close(&self) -> coordination::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A connector whose first `failures` dials fail; later dials hand out stub
/// sessions with increasing ids. Records when each dial happened.
pub(crate) struct ScriptedConnector {
    failures: usize,
    attempts: Mutex<Vec<Instant>>,
    next_id: AtomicU64,
}

impl ScriptedConnector {
    pub(crate) fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            attempts: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(100),
        }
    }

    pub(crate) fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::always_failing()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, servers: &[String], _dial_timeout: Duration) -> coordination::Result<Connection> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Instant::now());
            attempts.len()
        };
        if attempt <= self.failures {
            return Err(CoordinationError::Unavailable(servers.join(",")));
        }
        Ok(stub_connection(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}
