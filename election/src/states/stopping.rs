use async_trait::async_trait;
use coordination::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument, Span};

use super::{AutomataState, FactoryHandle, StateKind, Transition};

/// Releases the coordination session and ends the run.
pub struct StoppingState {
    span: Span,
    connection: Option<Connection>,
    factory: FactoryHandle,
}

impl StoppingState {
    pub fn new(span: Span, connection: Option<Connection>, factory: FactoryHandle) -> Self {
        Self {
            span,
            connection,
            factory,
        }
    }

    async fn step(&self) -> Transition {
        if let Some(connection) = &self.connection {
            match connection.close().await {
                Ok(()) => info!(session = connection.id(), "session closed"),
                Err(e) => warn!(session = connection.id(), error = %e, "failed to close session"),
            }
            if let Ok(factory) = self.factory.upgrade() {
                factory.release_connection(connection.id());
            }
        }
        info!("application stopped gracefully");
        Ok(None)
    }
}

#[async_trait]
impl AutomataState for StoppingState {
    fn kind(&self) -> StateKind {
        StateKind::Stopping
    }

    async fn run(&self, _cancel: &CancellationToken) -> Transition {
        self.step().instrument(self.span.clone()).await
    }
}
