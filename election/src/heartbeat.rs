//! Liveness markers written by the leader.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use coordination::SessionId;
use csv::Writer;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const MARKER_PREFIX: &str = "leader_";

const MARKER_EXTENSION: &str = ".csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub written_at_ms: u64,
    pub session_id: SessionId,
    pub tick: u64,
}

/// Writes one marker file per tick into the heartbeat directory.
pub struct HeartbeatWriter {
    dir: PathBuf,
    session_id: SessionId,
}

impl HeartbeatWriter {
    pub fn new<P: AsRef<Path>>(dir: P, session_id: SessionId) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            session_id,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the heartbeat directory and its parents if missing.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Writes the marker for `tick` and returns its path.
    ///
    /// The file is created fresh; an existing file with the same name is an
    /// error rather than being overwritten.
    pub fn write(&self, tick: u64) -> Result<PathBuf> {
        let written_at_ms = unix_millis();
        let path = self.dir.join(marker_name(written_at_ms));
        let file = File::options().write(true).create_new(true).open(&path)?;

        let mut writer = Writer::from_writer(file);
        writer
            .serialize(HeartbeatRecord {
                written_at_ms,
                session_id: self.session_id,
                tick,
            })
            .map_err(io::Error::from)?;
        writer.flush()?;
        Ok(path)
    }
}

/// `leader_<unix-millis>_<6 hex>.csv`
pub fn marker_name(written_at_ms: u64) -> String {
    let salt: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!(
        "{}{}_{:06x}{}",
        MARKER_PREFIX, written_at_ms, salt, MARKER_EXTENSION
    )
}

pub fn is_marker(name: &str) -> bool {
    name.starts_with(MARKER_PREFIX)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
