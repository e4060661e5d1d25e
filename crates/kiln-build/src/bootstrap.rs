//! Standard library module bootstrap
//!
//! `import std;` names a module no project file exports. When the selected
//! compiler ships the source of that module, it is scanned and added to the
//! source set like any other interface unit, so it gets built (once) in the
//! first level and referenced by its importers.

use camino::{Utf8Path, Utf8PathBuf};
use kiln_scan::{FileId, ScanError, SourceSet, scan_file};
use tracing::{debug, info};

/// The standard library's named modules
pub const STD_MODULES: [&str; 2] = ["std", "std.compat"];

fn imports(sources: &SourceSet, module: &str) -> bool {
    sources
        .iter()
        .any(|(_, file)| file.imported_modules.contains(module))
}

fn exports(sources: &SourceSet, module: &str) -> bool {
    sources
        .iter()
        .any(|(_, file)| file.exported_module.as_ref().is_some_and(|m| m.as_str() == module))
}

/// `std.compat.<ext>` next to the `std` module source
fn compat_source(std_source: &Utf8Path) -> Utf8PathBuf {
    let ext = std_source.extension().unwrap_or("cppm");
    std_source.with_file_name(format!("std.compat.{ext}"))
}

/// Add the standard library module sources `sources` needs.
///
/// Nothing is added when no file imports `std` or `std.compat`, or when the
/// project exports them itself. Returns the ids of the added files.
pub fn bootstrap_std_module(
    sources: &mut SourceSet,
    std_source: &Utf8Path,
) -> Result<Vec<FileId>, ScanError> {
    let wants_compat = imports(sources, "std.compat") && !exports(sources, "std.compat");
    let wants_std = (imports(sources, "std") || wants_compat) && !exports(sources, "std");

    let mut added = Vec::new();
    if wants_std {
        added.push(sources.push(scan_file(std_source)?));
    }
    if wants_compat {
        let compat = compat_source(std_source);
        if compat.is_file() {
            added.push(sources.push(scan_file(&compat)?));
        } else {
            debug!(path = %compat, "std.compat source not shipped with this toolchain");
        }
    }

    if !added.is_empty() {
        info!(source = %std_source, files = added.len(), "added standard library module sources");
    }
    Ok(added)
}
