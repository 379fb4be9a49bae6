use std::future;
use std::sync::Arc;

use async_trait::async_trait;
use coordination::{Connection, CoordinationError, Watch, WatchEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::{AutomataState, FactoryHandle, StateKind, Transition};
use crate::candidacy::{self, ElectionNode, Standing, ELECTION_PATH};
use crate::config::Config;

/// Outcome of one look at the candidacy nodes.
enum Evaluation {
    Won,
    /// Wait for the predecessor watch (or the poll interval) and look again.
    Wait(Watch),
    /// The predecessor vanished between listing and watching.
    Recheck,
    Lost,
}

/// Runs for leadership: registers a candidacy node and waits until it is the
/// lowest one.
pub struct AttempterState {
    span: Span,
    config: Arc<Config>,
    connection: Connection,
    factory: FactoryHandle,
}

impl AttempterState {
    pub fn new(
        span: Span,
        config: Arc<Config>,
        connection: Connection,
        factory: FactoryHandle,
    ) -> Self {
        Self {
            span,
            config,
            connection,
            factory,
        }
    }

    async fn step(&self, cancel: &CancellationToken) -> Transition {
        let factory = self.factory.upgrade()?;
        info!(session = self.connection.id(), "attempting to become leader");

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("cancelled before registering candidacy");
                return Ok(Some(factory.stopping_state()?));
            }
            created = candidacy::create_candidacy(self.connection.as_ref(), ELECTION_PATH) => created,
        };
        let own = match created {
            Ok(own) => own,
            Err(e) => {
                error!(error = %e, "failed to create candidacy node");
                return Ok(Some(factory.failover_state()?));
            }
        };
        info!(node = own.path(), sequence = own.sequence(), "created candidacy node");

        loop {
            let watch = match self.evaluate(&own).await {
                Ok(Evaluation::Won) => {
                    info!(node = own.path(), "I am the leader");
                    return Ok(Some(factory.leader_state()?));
                }
                Ok(Evaluation::Wait(watch)) => Some(watch),
                Ok(Evaluation::Recheck) => continue,
                Ok(Evaluation::Lost) => {
                    warn!(node = own.path(), "candidacy node is gone");
                    return Ok(Some(factory.failover_state()?));
                }
                Err(
                    e @ (CoordinationError::SessionExpired(_) | CoordinationError::Closed(_)),
                ) => {
                    error!(error = %e, "lost the coordination session");
                    return Ok(Some(factory.failover_state()?));
                }
                Err(e) => {
                    warn!(error = %e, "failed to evaluate candidacy, retrying");
                    None
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cancelled while waiting for leadership");
                    return Ok(Some(factory.stopping_state()?));
                }
                event = changed(watch) => {
                    debug!(?event, "predecessor watch fired");
                }
                _ = tokio::time::sleep(self.config.attempter_poll_interval()) => {
                    debug!("poll interval elapsed, re-checking");
                }
            }
        }
    }

    async fn evaluate(&self, own: &ElectionNode) -> Result<Evaluation, CoordinationError> {
        let children = self.connection.children(ELECTION_PATH).await?;
        let ranked = candidacy::rank(ELECTION_PATH, &children);
        match candidacy::standing(own, &ranked) {
            Standing::Leader => Ok(Evaluation::Won),
            Standing::Absent => Ok(Evaluation::Lost),
            Standing::Follower { predecessor } => {
                let (exists, watch) = self.connection.exists_watch(predecessor.path()).await?;
                if !exists {
                    return Ok(Evaluation::Recheck);
                }
                info!(
                    predecessor = predecessor.path(),
                    candidates = ranked.len(),
                    "watching predecessor"
                );
                Ok(Evaluation::Wait(watch))
            }
        }
    }
}

/// Resolves when `watch` fires; never resolves without one.
async fn changed(watch: Option<Watch>) -> WatchEvent {
    match watch {
        Some(watch) => watch.changed().await,
        None => future::pending().await,
    }
}

#[async_trait]
impl AutomataState for AttempterState {
    fn kind(&self) -> StateKind {
        StateKind::Attempter
    }

    async fn run(&self, cancel: &CancellationToken) -> Transition {
        self.step(cancel).instrument(self.span.clone()).await
    }
}
