//! Error types for kiln-build.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that end a build
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no source files to build")]
    NoSources,

    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The first compile failure of the build. Other files of the failing
    /// level still ran to completion; later levels never started.
    #[error("compilation of {path} failed (exit code {exit_code})")]
    Compile {
        path: Utf8PathBuf,
        exit_code: i32,
        stdout: String,
        stderr: String,
        /// Total compile failures, this one included
        failed: usize,
        /// Files that were never started because of the failure
        cancelled: usize,
    },

    #[error("linking {executable} failed (exit code {exit_code})")]
    Link {
        executable: Utf8PathBuf,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("compile worker panicked or was cancelled: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl BuildError {
    /// Compiler or linker output captured for this error, if any
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            BuildError::Compile { stdout, stderr, .. } | BuildError::Link { stdout, stderr, .. } => {
                Some((stdout, stderr))
            }
            BuildError::NoSources | BuildError::CreateDir { .. } | BuildError::Worker(_) => None,
        }
    }
}
