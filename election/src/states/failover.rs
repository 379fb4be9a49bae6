use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument, Span};

use super::{AutomataState, FactoryHandle, StateKind, Transition};
use crate::config::Config;

/// Re-establishes the coordination session after it was lost.
///
/// Dials once per entry of the configured backoff schedule, waiting that
/// entry's delay first. Gives up and stops once the schedule is exhausted.
pub struct FailoverState {
    span: Span,
    config: Arc<Config>,
    factory: FactoryHandle,
}

impl FailoverState {
    pub fn new(span: Span, config: Arc<Config>, factory: FactoryHandle) -> Self {
        Self {
            span,
            config,
            factory,
        }
    }

    async fn step(&self, cancel: &CancellationToken) -> Transition {
        let factory = self.factory.upgrade()?;
        let schedule = self.config.failover_backoff();

        for (index, delay) in schedule.iter().copied().enumerate() {
            let attempt = index + 1;
            let dialed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempt, "cancelled during failover");
                    return Ok(Some(factory.stopping_state()?));
                }
                dialed = async {
                    tokio::time::sleep(delay).await;
                    factory.dial().await
                } => dialed,
            };

            match dialed {
                Ok(connection) => {
                    info!(attempt, session = connection.id(), "reconnected");
                    if let Some(old) = factory.set_connection(connection) {
                        if let Err(e) = old.close().await {
                            warn!(session = old.id(), error = %e, "closing superseded session failed");
                        }
                    }
                    return Ok(Some(factory.init_state()?));
                }
                Err(e) => warn!(attempt, of = schedule.len(), error = %e, "reconnect failed"),
            }
        }

        error!(attempts = schedule.len(), "could not reconnect, giving up");
        Ok(Some(factory.stopping_state()?))
    }
}

#[async_trait]
impl AutomataState for FailoverState {
    fn kind(&self) -> StateKind {
        StateKind::Failover
    }

    async fn run(&self, cancel: &CancellationToken) -> Transition {
        self.step(cancel).instrument(self.span.clone()).await
    }
}
