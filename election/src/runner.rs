use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument, Span};

use crate::error::{ElectionError, ResourceError, Result};
use crate::factory::ResourceFactory;
use crate::states::{State, StateKind};

/// Drives the state machine one state at a time until a state yields no
/// successor.
pub struct LoopRunner {
    span: Span,
    factory: Arc<ResourceFactory>,
}

impl LoopRunner {
    pub fn new(factory: Arc<ResourceFactory>) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            span: factory.logger()?,
            factory,
        })
    }

    /// Runs from `initial` to completion.
    ///
    /// A state error ends the run and is returned wrapped with the state that
    /// failed. Once `cancel` fires, a run that has not reached the stopping
    /// state is moved there once so the session gets released.
    pub async fn run(&self, cancel: &CancellationToken, initial: State) -> Result<()> {
        self.drive(cancel, initial).instrument(self.span.clone()).await
    }

    async fn drive(&self, cancel: &CancellationToken, initial: State) -> Result<()> {
        let mut current = initial;
        let mut forced_stop = false;

        loop {
            if cancel.is_cancelled() && !forced_stop && current.kind() != StateKind::Stopping {
                warn!(state = %current.kind(), "cancelled, forcing stop");
                current = self.factory.stopping_state()?;
                forced_stop = true;
            }

            let kind = current.kind();
            info!(state = %kind, "start running state");
            match current.run(cancel).await {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    info!(state = %kind, "no new state, finish");
                    return Ok(());
                }
                Err(e) => {
                    error!(state = %kind, error = %e, "state failed");
                    return Err(ElectionError::State {
                        state: kind,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
