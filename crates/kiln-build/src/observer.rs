//! Build progress events

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use kiln_scan::FileId;

/// What happened to one file during a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Compiled,
    UpToDate,
    Failed,
    /// Never started because an earlier compile failed
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub file: FileId,
    pub source: Utf8PathBuf,
    /// Position of the file's level in the schedule
    pub level: usize,
    pub outcome: FileOutcome,
    pub duration: Duration,
    /// Compiler exit code, for failed compiles
    pub exit_code: Option<i32>,
}

/// Receives build events. All methods default to doing nothing.
///
/// Called from worker tasks, so implementations must be thread-safe.
pub trait BuildObserver: Send + Sync {
    fn build_started(&self, _files: usize, _levels: usize) {}

    fn level_started(&self, _position: usize, _files: usize) {}

    fn file_started(&self, _source: &Utf8Path) {}

    fn file_finished(&self, _event: &FileEvent) {}

    fn link_started(&self, _executable: &Utf8Path) {}

    fn link_finished(&self, _success: bool, _duration: Duration) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BuildObserver for NoopObserver {}
