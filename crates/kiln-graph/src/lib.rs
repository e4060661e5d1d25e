//! Dependency resolution and level scheduling for kiln
//!
//! [`resolve`] turns a scanned [`SourceSet`](kiln_scan::SourceSet) into a
//! [`Resolution`]: which file exports each module, the transitive closure of
//! modules each file needs, and the file-level dependency graph.
//! [`schedule`] then partitions the files into [`BuildLevel`]s that can be
//! compiled one after the other, every file in a level in parallel.

mod levels;
mod resolve;

use camino::Utf8PathBuf;
use kiln_scan::ModuleName;
use thiserror::Error;

pub use levels::{BuildLevel, LevelPolicy, LevelViolation, schedule, verify_levels};
pub use resolve::{Resolution, UnresolvedImport, resolve};

/// Errors that make a source tree unbuildable
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("module '{module}' is exported by both {first} and {second}")]
    DuplicateExport {
        module: ModuleName,
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    },

    #[error("module import cycle detected: {}", chain(.modules, .files))]
    Cycle {
        /// Modules along the cycle, the first repeated at the end
        modules: Vec<ModuleName>,
        /// Files along the cycle, the first repeated at the end
        files: Vec<Utf8PathBuf>,
    },
}

fn chain(modules: &[ModuleName], files: &[Utf8PathBuf]) -> String {
    if modules.len() == files.len() {
        let names: Vec<&str> = modules.iter().map(ModuleName::as_str).collect();
        names.join(" -> ")
    } else {
        let names: Vec<&str> = files.iter().map(|f| f.as_str()).collect();
        names.join(" -> ")
    }
}
