//! Candidacy nodes under the election namespace.
//!
//! Every candidate owns one ephemeral, sequential node named
//! `_c_<guid>-guid-n_<sequence>` under [`ELECTION_PATH`]. The candidate whose
//! node carries the lowest sequence is the leader; every other candidate
//! watches the node right before its own.

use coordination::{CoordinationError, CreateMode, Session};
use rand::Rng;
use tracing::{debug, info};

use crate::error::{ElectionError, Result};

/// Well-known parent of all candidacy nodes.
pub const ELECTION_PATH: &str = "/election";

pub const CANDIDATE_PREFIX: &str = "guid-n_";

const PROTECTED_MARKER: &str = "_c_";

const CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionNode {
    path: String,
    sequence: u64,
}

impl ElectionNode {
    /// Parses a child `name` of `namespace`.
    ///
    /// Returns `None` for names without a numeric sequence suffix.
    pub fn parse(namespace: &str, name: &str) -> Option<Self> {
        let (_, suffix) = name.rsplit_once(CANDIDATE_PREFIX)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            path: format!("{}/{}", namespace, name),
            sequence: suffix.parse().ok()?,
        })
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let (namespace, name) = path.rsplit_once('/')?;
        Self::parse(namespace, name)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.rsplit_once('/').map_or(&self.path, |(_, name)| name)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Where a candidate stands among the current candidacy nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Standing {
    Leader,
    /// Some node has a lower sequence; `predecessor` is the next lower one.
    Follower { predecessor: ElectionNode },
    Absent,
}

/// Parses `children` of `namespace` and orders them by sequence, ascending.
///
/// Children that are not candidacy nodes are skipped.
pub fn rank(namespace: &str, children: &[String]) -> Vec<ElectionNode> {
    let mut ranked: Vec<ElectionNode> = children
        .iter()
        .filter_map(|name| ElectionNode::parse(namespace, name))
        .collect();
    ranked.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.path.cmp(&b.path)));
    ranked
}

pub fn standing(own: &ElectionNode, ranked: &[ElectionNode]) -> Standing {
    match ranked.iter().position(|node| node.path == own.path) {
        None => Standing::Absent,
        Some(0) => Standing::Leader,
        Some(index) => Standing::Follower {
            predecessor: ranked[index - 1].clone(),
        },
    }
}

/// Makes sure the election namespace exists.
///
/// A concurrent creator winning the race is fine.
pub async fn ensure_namespace(session: &dyn Session) -> Result<()> {
    if session
        .exists(ELECTION_PATH)
        .await
        .map_err(ElectionError::Protocol)?
    {
        return Ok(());
    }
    match session.create(ELECTION_PATH, &[], CreateMode::Persistent).await {
        Ok(_) => {
            info!(namespace = ELECTION_PATH, "created election namespace");
            Ok(())
        }
        Err(CoordinationError::NodeExists(_)) => Ok(()),
        Err(e) => Err(ElectionError::Protocol(e)),
    }
}

/// Creates this candidate's node under `namespace`.
///
/// The node name carries a random guid. When a create fails ambiguously the
/// namespace is searched for that guid before trying again, so a create that
/// was applied but not acknowledged is adopted instead of duplicated. If that
/// search itself fails the create is not retried.
pub async fn create_candidacy(session: &dyn Session, namespace: &str) -> Result<ElectionNode> {
    let guid = protected_guid();
    let prefix = format!(
        "{}/{}{}-{}",
        namespace, PROTECTED_MARKER, guid, CANDIDATE_PREFIX
    );

    let mut last = CoordinationError::ConnectionLoss;
    for attempt in 1..=CREATE_ATTEMPTS {
        match session
            .create(&prefix, &[], CreateMode::EphemeralSequential)
            .await
        {
            Ok(path) => {
                return ElectionNode::from_path(&path).ok_or(ElectionError::MalformedNode(path))
            }
            Err(e) if e.is_transient() => {
                debug!(attempt, guid = %guid, error = %e, "candidacy create was ambiguous");
                let children = session
                    .children(namespace)
                    .await
                    .map_err(ElectionError::Protocol)?;
                if let Some(name) = children.iter().find(|name| name.contains(&guid)) {
                    debug!(attempt, node = %name, "adopting candidacy node");
                    return ElectionNode::parse(namespace, name)
                        .ok_or_else(|| ElectionError::MalformedNode(name.clone()));
                }
                last = e;
            }
            Err(e) => return Err(ElectionError::Protocol(e)),
        }
    }
    Err(ElectionError::Protocol(last))
}

fn protected_guid() -> String {
    let value: u128 = rand::thread_rng().gen();
    format!("{:032x}", value)
}
