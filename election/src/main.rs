use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use coordination::{Connector, MemoryEnsemble, ZooKeeperConnector};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use election::config::DEFAULT_HEARTBEAT_DIR;
use election::{Config, LoopRunner, ResourceFactory};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "election")]
#[command(about = "Runs leader-election candidates against a ZooKeeper ensemble")]
struct Args {
    /// Coordination servers, comma separated.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "zoo1:2181,zoo2:2181,zoo3:2181",
        env = "ELECTION_ZK_SERVERS"
    )]
    zk_servers: Vec<String>,

    /// Seconds to wait for a coordination session.
    #[arg(long, default_value_t = 10, env = "ELECTION_DIAL_TIMEOUT")]
    dial_timeout: u64,

    /// Seconds between leader heartbeats.
    #[arg(long, default_value_t = 10, env = "ELECTION_LEADER_TIMEOUT")]
    leader_timeout: u64,

    /// Seconds a follower waits before re-checking its predecessor.
    #[arg(long, default_value_t = 5, env = "ELECTION_ATTEMPTER_TIMEOUT")]
    attempter_timeout: u64,

    /// Directory receiving the leader's heartbeat markers.
    #[arg(long, default_value = DEFAULT_HEARTBEAT_DIR, env = "ELECTION_FILE_DIR")]
    file_dir: PathBuf,

    /// Number of heartbeat markers kept.
    #[arg(long, default_value_t = 10, env = "ELECTION_STORAGE_CAPACITY")]
    storage_capacity: usize,

    /// Candidates to run in this process.
    #[arg(long, default_value_t = 1, env = "ELECTION_CANDIDATES")]
    candidates: usize,

    /// Serve the servers from an in-process ensemble instead of dialing them.
    #[arg(long, env = "ELECTION_LOCAL")]
    local: bool,
}

impl Args {
    fn config(&self, candidate: usize) -> Result<Config> {
        let capacity = NonZeroUsize::new(self.storage_capacity)
            .context("storage capacity must be greater than zero")?;
        let heartbeat_dir = if self.candidates > 1 {
            self.file_dir.join(format!("node-{}", candidate))
        } else {
            self.file_dir.clone()
        };

        Ok(Config::new(self.zk_servers.clone())
            .with_node_name(format!("candidate-{}", candidate))
            .with_dial_timeout(Duration::from_secs(self.dial_timeout))
            .with_heartbeat_interval(Duration::from_secs(self.leader_timeout))
            .with_attempter_poll_interval(Duration::from_secs(self.attempter_timeout))
            .with_heartbeat_dir(heartbeat_dir)
            .with_retention_capacity(capacity))
    }

    fn connector(&self) -> Arc<dyn Connector> {
        if self.local {
            info!(servers = ?self.zk_servers, "using an in-process ensemble");
            Arc::new(MemoryEnsemble::start(self.zk_servers.clone()).connector())
        } else {
            Arc::new(ZooKeeperConnector)
        }
    }
}

#[actix_rt::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.candidates == 0 {
        anyhow::bail!("at least one candidate is required");
    }

    let connector = args.connector();
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    actix_rt::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, stopping"),
            Err(e) => error!(error = %e, "cannot listen for interrupt, stopping"),
        }
        token.cancel();
    });

    let mut running = Vec::with_capacity(args.candidates);
    for candidate in 0..args.candidates {
        let config = args.config(candidate)?;
        let factory = ResourceFactory::validated(config, connector.clone())
            .context("invalid configuration")?;
        let runner = LoopRunner::new(factory.clone()).context("cannot build runner")?;
        let initial = factory.init_state().context("cannot build initial state")?;

        let token = cancel.clone();
        running.push(actix_rt::spawn(async move { runner.run(&token, initial).await }));
    }

    let mut failed = 0;
    for (candidate, handle) in running.into_iter().enumerate() {
        match handle.await.context("candidate task panicked")? {
            Ok(()) => info!(candidate, "candidate finished"),
            Err(e) => {
                error!(candidate, error = %e, "candidate failed");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} candidate(s) failed", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use election::ElectionError;

    #[test]
    fn test_defaults_dial_zookeeper() {
        let args = Args::parse_from(["election"]);
        assert!(!args.local);
        assert_eq!(args.zk_servers, vec!["zoo1:2181", "zoo2:2181", "zoo3:2181"]);
    }

    #[test]
    fn test_local_flag_and_server_list() {
        let args = Args::parse_from(["election", "--local", "--zk-servers", "a:1,b:2"]);
        assert!(args.local);
        assert_eq!(args.zk_servers, vec!["a:1", "b:2"]);
    }

    #[actix_rt::test]
    async fn test_zero_interval_is_rejected_before_running() {
        let args = Args::parse_from(["election", "--local", "--leader-timeout", "0"]);
        let err = ResourceFactory::validated(args.config(0).unwrap(), args.connector())
            .err()
            .unwrap();
        assert!(matches!(err, ElectionError::Config(_)));
    }
}
