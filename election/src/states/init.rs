use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument, Span};

use super::{AutomataState, FactoryHandle, StateKind, Transition};
use crate::candidacy::{self, ELECTION_PATH};
use crate::config::Config;

/// Connects to the coordination service and bootstraps the election namespace.
pub struct InitState {
    span: Span,
    config: Arc<Config>,
    factory: FactoryHandle,
}

impl InitState {
    pub fn new(span: Span, config: Arc<Config>, factory: FactoryHandle) -> Self {
        Self {
            span,
            config,
            factory,
        }
    }

    async fn step(&self, cancel: &CancellationToken) -> Transition {
        let factory = self.factory.upgrade()?;

        let connection = match factory.connection() {
            Some(connection) => connection,
            None => {
                info!(servers = %self.config.servers().join(","), "connecting to coordination service");
                let dialed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("cancelled before connecting");
                        return Ok(Some(factory.stopping_state()?));
                    }
                    dialed = factory.dial() => dialed,
                };
                match dialed {
                    Ok(connection) => {
                        factory.set_connection(connection.clone());
                        connection
                    }
                    Err(e) => {
                        error!(error = %e, "connection failed");
                        return Ok(Some(factory.failover_state()?));
                    }
                }
            }
        };

        if let Err(e) = candidacy::ensure_namespace(connection.as_ref()).await {
            error!(error = %e, namespace = ELECTION_PATH, "namespace bootstrap failed");
            return Ok(Some(factory.failover_state()?));
        }

        info!(session = connection.id(), namespace = ELECTION_PATH, "election namespace ready");
        factory.set_connection(connection);
        Ok(Some(factory.attempter_state()?))
    }
}

#[async_trait]
impl AutomataState for InitState {
    fn kind(&self) -> StateKind {
        StateKind::Init
    }

    async fn run(&self, cancel: &CancellationToken) -> Transition {
        self.step(cancel).instrument(self.span.clone()).await
    }
}
