use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument, Span};

use super::{AutomataState, StateKind, Transition};

/// Terminal state that does nothing.
pub struct EmptyState {
    span: Span,
}

impl EmptyState {
    pub fn new(span: Span) -> Self {
        Self { span }
    }
}

#[async_trait]
impl AutomataState for EmptyState {
    fn kind(&self) -> StateKind {
        StateKind::Empty
    }

    async fn run(&self, _cancel: &CancellationToken) -> Transition {
        async {
            info!("nothing happened");
            Ok(None)
        }
        .instrument(self.span.clone())
        .await
    }
}
