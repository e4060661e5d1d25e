//! Source scanning for kiln
//!
//! Walks a source tree, reads every compilable file and records which
//! module it exports and which modules it imports. The result is a
//! [`SourceSet`]: an arena of [`SourceFile`]s addressed by [`FileId`],
//! consumed by the dependency resolver.

mod scanner;

use std::borrow::Borrow;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub use scanner::{ScannedDecls, scan_source};

/// File extensions of module interface units
pub const INTERFACE_EXTENSIONS: &[&str] = &["ixx", "cppm", "mpp", "mxx", "ccm", "cxxm", "c++m"];

/// File extensions of ordinary translation units
pub const UNIT_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c++", "c"];

/// Errors that abort scanning
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    InvalidUtf8 { path: Utf8PathBuf },

    #[error("failed to walk {root}: {source}")]
    Walk {
        root: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("non-UTF-8 path under {root}: {path}")]
    NonUtf8Path { root: Utf8PathBuf, path: String },
}

// =============================================================================
// MODULE NAMES
// =============================================================================

/// Name of a C++ module or module partition (`primary` or `primary:part`).
///
/// Cheap to clone; compares and hashes by value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleName(Arc<str>);

impl ModuleName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The primary module name (without any partition)
    pub fn primary(&self) -> &str {
        let name: &str = &self.0;
        name.split_once(':').map_or(name, |(primary, _)| primary)
    }

    /// The partition name, if this names a partition
    pub fn partition(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, part)| part)
    }
}

impl Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for ModuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// Deduplicates module names so every occurrence shares one allocation
#[derive(Debug, Default)]
pub struct ModuleInterner {
    names: HashSet<ModuleName>,
}

impl ModuleInterner {
    pub fn intern(&mut self, name: &str) -> ModuleName {
        if let Some(existing) = self.names.get(name) {
            return existing.clone();
        }
        let name = ModuleName::new(name);
        self.names.insert(name.clone());
        name
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// =============================================================================
// SOURCE FILES
// =============================================================================

/// A scanned source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path to the file (as found while walking, or as given)
    pub path: Utf8PathBuf,
    /// Module this file provides, if it is an interface or partition unit
    pub exported_module: Option<ModuleName>,
    /// Modules imported directly by this file
    pub imported_modules: BTreeSet<ModuleName>,
}

impl SourceFile {
    pub fn new(path: impl Into<Utf8PathBuf>, decls: ScannedDecls) -> Self {
        Self {
            path: path.into(),
            exported_module: decls.exported,
            imported_modules: decls.imports,
        }
    }

    /// Returns true if this file provides a module interface
    pub fn is_interface(&self) -> bool {
        self.exported_module.is_some()
    }
}

/// Stable index of a file inside a [`SourceSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena of scanned files for one build invocation
#[derive(Debug, Default)]
pub struct SourceSet {
    root: Utf8PathBuf,
    files: Vec<SourceFile>,
    interner: ModuleInterner,
}

impl SourceSet {
    /// Create an empty set for sources under `root`
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Vec::new(),
            interner: ModuleInterner::default(),
        }
    }

    /// Add a file, interning its module names
    pub fn push(&mut self, file: SourceFile) -> FileId {
        let exported_module = file
            .exported_module
            .map(|name| self.interner.intern(name.as_str()));
        let imported_modules = file
            .imported_modules
            .iter()
            .map(|name| self.interner.intern(name.as_str()))
            .collect();

        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile {
            path: file.path,
            exported_module,
            imported_modules,
        });
        id
    }

    pub fn get(&self, id: FileId) -> &SourceFile {
        &self.files[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileId, &SourceFile)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, file)| (FileId(i as u32), file))
    }

    pub fn ids(&self) -> impl Iterator<Item = FileId> + use<> {
        (0..self.files.len() as u32).map(FileId)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Root directory the sources were collected from
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of a file relative to the root (the path itself if outside it)
    pub fn relative_path(&self, id: FileId) -> &Utf8Path {
        let path: &Utf8Path = &self.get(id).path;
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Look up a file by path
    pub fn find(&self, path: &Utf8Path) -> Option<FileId> {
        self.iter()
            .find(|(_, file)| file.path.as_path() == path)
            .map(|(id, _)| id)
    }
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Returns true if files with this extension are compiled
pub fn is_source_extension(ext: &str) -> bool {
    INTERFACE_EXTENSIONS.contains(&ext) || UNIT_EXTENSIONS.contains(&ext)
}

/// Read and scan one file
pub fn scan_file(path: &Utf8Path) -> Result<SourceFile, ScanError> {
    let bytes = std::fs::read(path).map_err(|source| ScanError::Read {
        path: path.to_owned(),
        source,
    })?;

    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    let content = std::str::from_utf8(bytes).map_err(|_| ScanError::InvalidUtf8 {
        path: path.to_owned(),
    })?;

    Ok(SourceFile::new(path, scan_source(path, content)))
}

/// Walk `root` recursively and scan every compilable file.
///
/// Traversal order is sorted by file name, so ids are stable across runs
/// of an unchanged tree. The first failure aborts the scan.
pub fn scan_tree(root: &Utf8Path) -> Result<SourceSet, ScanError> {
    let mut set = SourceSet::new(root);

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| ScanError::Walk {
            root: root.to_owned(),
            source,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = Utf8Path::from_path(entry.path()).ok_or_else(|| ScanError::NonUtf8Path {
            root: root.to_owned(),
            path: entry.path().to_string_lossy().into_owned(),
        })?;

        if !path.extension().is_some_and(is_source_extension) {
            continue;
        }

        let file = scan_file(path)?;
        debug!(
            path = %file.path,
            exported = ?file.exported_module,
            imports = ?file.imported_modules,
            "scanned source"
        );
        set.push(file);
    }

    info!(root = %root, files = set.len(), module_names = set.interner.len(), "scanned source tree");
    Ok(set)
}
