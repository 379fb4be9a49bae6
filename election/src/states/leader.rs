use std::sync::Arc;

use async_trait::async_trait;
use coordination::Connection;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::{AutomataState, FactoryHandle, StateKind, Transition};
use crate::config::Config;
use crate::heartbeat::HeartbeatWriter;
use crate::retention::RetentionPolicy;

/// Proves liveness while leading: writes a marker every heartbeat interval
/// and keeps the marker directory within its retention capacity.
///
/// Ownership of the lowest candidacy node is not re-checked once leading.
pub struct LeaderState {
    span: Span,
    config: Arc<Config>,
    connection: Connection,
    factory: FactoryHandle,
}

impl LeaderState {
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
        let writer = HeartbeatWriter::new(self.config.heartbeat_dir(), self.connection.id());
        let retention = RetentionPolicy::new(self.config.retention_capacity());

        if let Err(e) = writer.prepare() {
            error!(dir = %writer.dir().display(), error = %e, "cannot create heartbeat directory");
        }
        info!(
            session = self.connection.id(),
            dir = %writer.dir().display(),
            interval = ?self.config.heartbeat_interval(),
            "leading"
        );

        let period = self.config.heartbeat_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(ticks = tick, "cancelled, leaving leadership");
                    return Ok(Some(factory.stopping_state()?));
                }
                _ = ticker.tick() => {
                    beat(&writer, &retention, tick);
                    tick += 1;
                }
            }
        }
    }
}

/// One heartbeat tick. Failures are logged and never end the loop.
fn beat(writer: &HeartbeatWriter, retention: &RetentionPolicy, tick: u64) {
    match writer.write(tick) {
        Ok(path) => debug!(tick, path = %path.display(), "heartbeat written"),
        Err(e) => error!(tick, error = %e, "heartbeat write failed"),
    }

    match retention.enforce(writer.dir()) {
        Ok(report) if !report.removed.is_empty() || report.failed > 0 => debug!(
            kept = report.kept,
            removed = report.removed.len(),
            failed = report.failed,
            "retention pass"
        ),
        Ok(_) => {}
        Err(e) => warn!(tick, error = %e, "retention pass skipped"),
    }
}

#[async_trait]
impl AutomataState for LeaderState {
    fn kind(&self) -> StateKind {
        StateKind::Leader
    }

    async fn run(&self, cancel: &CancellationToken) -> Transition {
        self.step(cancel).instrument(self.span.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ResourceFactory;
    use crate::heartbeat::{is_marker, HeartbeatRecord};
    use crate::test_support::{quick_config, stub_connection, ScriptedConnector};
    use std::fs;
    use std::num::NonZeroUsize;
    use std::path::Path;
    use std::time::Duration;

    fn markers(dir: &Path) -> Vec<std::path::PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| is_marker(&path.file_name().unwrap().to_string_lossy()))
            .collect()
    }

    fn leader(config: Config) -> Arc<ResourceFactory> {
        let factory = ResourceFactory::new(config, Arc::new(ScriptedConnector::default()));
        factory.set_connection(stub_connection(7));
        factory
    }

    #[tokio::test]
    async fn test_writes_markers_within_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let beats = dir.path().join("beats");
        let factory = leader(
            quick_config(&beats).with_retention_capacity(NonZeroUsize::new(3).unwrap()),
        );
        fs::create_dir_all(&beats).unwrap();
        fs::write(beats.join("keep.txt"), "not a marker").unwrap();

        let cancel = CancellationToken::new();
        let state = factory.leader_state().unwrap();
        let token = cancel.clone();
        let running = tokio::spawn(async move { state.run(&token).await });

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        let next = running.await.unwrap().unwrap().unwrap();
        assert_eq!(next.kind(), StateKind::Stopping);

        let written = markers(&beats);
        assert_eq!(written.len(), 3);
        assert!(beats.join("keep.txt").exists());

        let mut reader = csv::Reader::from_path(&written[0]).unwrap();
        let record: HeartbeatRecord = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(record.session_id, 7);
    }

    #[tokio::test]
    async fn test_creates_missing_heartbeat_dir() {
        let dir = tempfile::tempdir().unwrap();
        let beats = dir.path().join("a/b/c");
        let factory = leader(quick_config(&beats));

        let cancel = CancellationToken::new();
        let state = factory.leader_state().unwrap();
        let token = cancel.clone();
        let running = tokio::spawn(async move { state.run(&token).await });

        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        running.await.unwrap().unwrap();
        assert!(!markers(&beats).is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_dir_keeps_leading() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the directory should be
        let beats = dir.path().join("occupied");
        fs::write(&beats, "").unwrap();
        let factory = leader(quick_config(&beats));

        let cancel = CancellationToken::new();
        let state = factory.leader_state().unwrap();
        let token = cancel.clone();
        let running = tokio::spawn(async move { state.run(&token).await });

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(!running.is_finished());
        cancel.cancel();
        let next = running.await.unwrap().unwrap().unwrap();
        assert_eq!(next.kind(), StateKind::Stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_marker_after_one_interval() {
        let dir = tempfile::tempdir().unwrap();
        let beats = dir.path().join("beats");
        let factory = leader(
            quick_config(&beats).with_heartbeat_interval(Duration::from_secs(10)),
        );

        let cancel = CancellationToken::new();
        let state = factory.leader_state().unwrap();
        let token = cancel.clone();
        let running = tokio::spawn(async move { state.run(&token).await });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(markers(&beats).is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(markers(&beats).len(), 1);

        cancel.cancel();
        running.await.unwrap().unwrap();
    }
}
