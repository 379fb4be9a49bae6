extern crate actix;
pub mod ensemble;
pub mod error;
pub mod memory_session;
pub mod session;
pub mod zookeeper;
use actix::Message;

pub use ensemble::{Ensemble, MemoryEnsemble};
pub use error::{CoordinationError, Result};
pub use memory_session::{MemoryConnector, MemorySession};
pub use session::{Connection, Connector, CreateMode, Session, SessionId, Watch, WatchEvent};
pub use zookeeper::{ZooKeeperConnector, ZooKeeperSession};

/// A request handled by the in-process [`Ensemble`] actor.
///
/// Node requests carry the id of the session issuing them; administrative
/// requests (`SetOnline`, `Expire`, `LoseCreates`, `Inspect`) do not go
/// through a session.
#[derive(Debug, Message)]
#[rtype(result = "crate::error::Result<Reply>")]
pub enum EnsembleRequest {
    Connect {
        servers: Vec<String>,
    },
    Exists {
        session: SessionId,
        path: String,
        watch: bool,
    },
    Create {
        session: SessionId,
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Children {
        session: SessionId,
        path: String,
    },
    Close {
        session: SessionId,
    },
    Expire {
        session: SessionId,
    },
    SetOnline {
        online: bool,
    },
    LoseCreates {
        count: u32,
    },
    Inspect {
        path: String,
    },
}

#[derive(Debug)]
pub enum Reply {
    Connected(SessionId),
    Exists { exists: bool, watch: Option<Watch> },
    Created(String),
    Children(Vec<String>),
    Done,
}

impl Reply {
    fn unexpected(self) -> CoordinationError {
        tracing::error!(reply = ?self, "unexpected ensemble reply");
        CoordinationError::ConnectionLoss
    }

    pub fn into_session(self) -> Result<SessionId> {
        match self {
            Reply::Connected(session) => Ok(session),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_exists(self) -> Result<(bool, Option<Watch>)> {
        match self {
            Reply::Exists { exists, watch } => Ok((exists, watch)),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_created(self) -> Result<String> {
        match self {
            Reply::Created(path) => Ok(path),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_children(self) -> Result<Vec<String>> {
        match self {
            Reply::Children(children) => Ok(children),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_done(self) -> Result<()> {
        match self {
            Reply::Done => Ok(()),
            other => Err(other.unexpected()),
        }
    }
}
