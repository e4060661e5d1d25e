//! Timestamp-based incremental gate
//!
//! There is no build database: whether a file needs compiling is derived
//! from the modification times of its source and artifacts on every run.

use std::time::SystemTime;

use camino::Utf8Path;
use kiln_scan::ModuleName;

fn modified(path: &Utf8Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True if `output` exists and was modified strictly after `input`.
///
/// A missing or unreadable input counts as not up to date.
pub fn is_up_to_date(input: &Utf8Path, output: &Utf8Path) -> bool {
    match (modified(input), modified(output)) {
        (Some(input), Some(output)) => output > input,
        _ => false,
    }
}

/// True if both exist and `path` was modified strictly after `than`
fn is_newer(path: &Utf8Path, than: &Utf8Path) -> bool {
    match (modified(path), modified(than)) {
        (Some(path), Some(than)) => path > than,
        _ => false,
    }
}

/// Why a file must be compiled (or that it need not be)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    UpToDate,
    /// The object is missing or older than the source
    ObjectOutdated,
    /// The module interface is missing or older than the source
    InterfaceOutdated,
    /// An interface this file imports changed after the object was built
    DependencyChanged { module: ModuleName },
}

impl Staleness {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Staleness::UpToDate)
    }
}

impl std::fmt::Display for Staleness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Staleness::UpToDate => f.write_str("up to date"),
            Staleness::ObjectOutdated => f.write_str("object missing or older than source"),
            Staleness::InterfaceOutdated => f.write_str("interface missing or older than source"),
            Staleness::DependencyChanged { module } => {
                write!(f, "interface of '{module}' changed")
            }
        }
    }
}

/// Decide whether `source` must be recompiled.
///
/// `references` are the built interfaces of every module in the file's
/// dependency closure.
pub fn check<'a>(
    source: &Utf8Path,
    object: &Utf8Path,
    interface: Option<&Utf8Path>,
    references: impl IntoIterator<Item = (&'a ModuleName, &'a Utf8Path)>,
) -> Staleness {
    if !is_up_to_date(source, object) {
        return Staleness::ObjectOutdated;
    }
    if let Some(interface) = interface
        && !is_up_to_date(source, interface)
    {
        return Staleness::InterfaceOutdated;
    }
    for (module, reference) in references {
        if is_newer(reference, object) {
            return Staleness::DependencyChanged {
                module: module.clone(),
            };
        }
    }
    Staleness::UpToDate
}
