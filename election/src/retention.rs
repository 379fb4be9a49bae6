use std::fs;
use std::io::{self, ErrorKind};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;

use crate::error::Result;
use crate::heartbeat::is_marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    capacity: NonZeroUsize,
}

/// What a single retention pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub kept: usize,
    pub removed: Vec<PathBuf>,
    pub failed: usize,
}

impl RetentionPolicy {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }

    /// Deletes the oldest markers in `dir` until at most `capacity` remain.
    ///
    /// Only regular files named like markers are counted or deleted. Age is
    /// the modification time, ties broken by name. A marker that cannot be
    /// deleted is logged and counted in [`RetentionReport::failed`]; listing
    /// errors abort the pass.
    pub fn enforce(&self, dir: &Path) -> Result<RetentionReport> {
        let mut markers = list_markers(dir)?;
        let excess = markers.len().saturating_sub(self.capacity.get());
        if excess == 0 {
            return Ok(RetentionReport {
                kept: markers.len(),
                ..RetentionReport::default()
            });
        }

        markers.sort();
        let mut report = RetentionReport::default();
        for (_, _, path) in markers.drain(..excess) {
            match fs::remove_file(&path) {
                Ok(()) => report.removed.push(path),
                // already gone, which is what we wanted
                Err(e) if e.kind() == ErrorKind::NotFound => report.removed.push(path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove old marker");
                    report.failed += 1;
                }
            }
        }
        report.kept = markers.len() + report.failed;
        Ok(report)
    }
}

fn list_markers(dir: &Path) -> io::Result<Vec<(SystemTime, String, PathBuf)>> {
    let mut markers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_marker(&name) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }
        markers.push((metadata.modified()?, name, entry.path()));
    }
    Ok(markers)
}
