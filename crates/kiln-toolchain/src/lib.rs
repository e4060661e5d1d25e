//! Compiler registry for kiln
//!
//! Finds the C++ compilers installed on the host and picks one from a
//! user-supplied spec such as `clang`, `gcc:14` or `msvc:19.40:x64`.
//!
//! - [`discover`] probes `PATH` and returns a [`CompilerCollection`]
//! - [`CompilerSpec::parse`] + [`CompilerCollection::select`] choose a compiler

mod discover;

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use thiserror::Error;

pub use discover::{discover, discover_in, locate_std_module, parse_version_output};

/// Errors that can occur during compiler discovery and selection
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("ill-formed compiler spec '{spec}': expected name[:major[.minor][:arch]]")]
    IllFormedSpec { spec: String },

    #[error("unknown compiler '{name}' (available: {available})")]
    UnknownCompiler { name: String, available: String },

    #[error("no {name} compiler with version {requested} or newer (newest is {newest})")]
    NoMatchingVersion {
        name: String,
        requested: Version,
        newest: Version,
    },

    #[error("no {name} compiler for architecture '{arch}'")]
    NoMatchingArch { name: String, arch: String },

    #[error("no C++ compilers found on PATH")]
    NoCompilers,

    #[error("failed to run {executable}: {source}")]
    Probe {
        executable: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// COMPILERS
// =============================================================================

/// Compiler version; only major and minor take part in selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse `major` or `major.minor`, ignoring any further components
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(minor) => minor.parse().ok()?,
            None => 0,
        };
        Some(Self { major, minor })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Compiler family. Decides the command-line dialect and artifact
/// extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompilerKind {
    Clang,
    Gcc,
    Msvc,
    ClangCl,
}

impl CompilerKind {
    /// Registry name, as used in compiler specs and output directories
    pub fn name(self) -> &'static str {
        match self {
            CompilerKind::Clang => "clang",
            CompilerKind::Gcc => "gcc",
            CompilerKind::Msvc => "msvc",
            CompilerKind::ClangCl => "clang-cl",
        }
    }

    pub fn object_extension(self) -> &'static str {
        match self {
            CompilerKind::Clang | CompilerKind::Gcc => "o",
            CompilerKind::Msvc | CompilerKind::ClangCl => "obj",
        }
    }

    /// Extension of built module interfaces
    pub fn interface_extension(self) -> &'static str {
        match self {
            CompilerKind::Clang | CompilerKind::ClangCl => "pcm",
            CompilerKind::Gcc => "gcm",
            CompilerKind::Msvc => "ifc",
        }
    }

    pub fn executable_suffix(self) -> &'static str {
        match self {
            CompilerKind::Clang | CompilerKind::Gcc => std::env::consts::EXE_SUFFIX,
            CompilerKind::Msvc | CompilerKind::ClangCl => ".exe",
        }
    }

    /// True for compilers taking `/flag` style arguments
    pub fn is_msvc_style(self) -> bool {
        matches!(self, CompilerKind::Msvc | CompilerKind::ClangCl)
    }
}

impl std::fmt::Display for CompilerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An installed compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiler {
    pub kind: CompilerKind,
    /// Registry name (`clang`, `gcc`, `msvc`, `clang-cl`)
    pub name: String,
    pub version: Version,
    /// Target architecture, normalized (`x86_64`, `aarch64`, ...)
    pub arch: String,
    /// Path to the compiler driver
    pub executable: Utf8PathBuf,
    /// Installation prefix (the directory containing `bin/`)
    pub install_dir: Utf8PathBuf,
    /// Source of the `std` module, when the toolchain ships one
    pub std_module: Option<Utf8PathBuf>,
}

impl std::fmt::Display for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.arch)
    }
}

/// Map architecture aliases onto one spelling
pub fn normalize_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x64" | "amd64" | "x86_64" => "x86_64".to_string(),
        "arm64" | "aarch64" => "aarch64".to_string(),
        "x86" | "i386" | "i686" => "x86".to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// SELECTION
// =============================================================================

/// A parsed `name[:major[.minor][:arch]]` compiler request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSpec {
    pub name: String,
    pub version: Option<Version>,
    pub arch: Option<String>,
}

impl CompilerSpec {
    pub fn parse(spec: &str) -> Result<Self, ToolchainError> {
        let ill_formed = || ToolchainError::IllFormedSpec {
            spec: spec.to_string(),
        };

        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() > 3 || parts[0].is_empty() {
            return Err(ill_formed());
        }

        let version = match parts.get(1) {
            None | Some(&"") => None,
            Some(v) => Some(Version::parse(v).ok_or_else(ill_formed)?),
        };

        let arch = match parts.get(2) {
            None => None,
            Some(&"") => return Err(ill_formed()),
            Some(a) => Some(normalize_arch(a)),
        };

        Ok(Self {
            name: parts[0].to_string(),
            version,
            arch,
        })
    }
}

impl std::fmt::Display for CompilerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        match (&self.version, &self.arch) {
            (None, None) => Ok(()),
            (Some(v), None) => write!(f, ":{v}"),
            (None, Some(a)) => write!(f, "::{a}"),
            (Some(v), Some(a)) => write!(f, ":{v}:{a}"),
        }
    }
}

/// Installed compilers grouped by name, each group newest first
#[derive(Debug, Clone, Default)]
pub struct CompilerCollection {
    by_name: BTreeMap<String, Vec<Compiler>>,
}

impl CompilerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiler, keeping its group sorted newest first
    pub fn insert(&mut self, compiler: Compiler) {
        let group = self.by_name.entry(compiler.name.clone()).or_default();
        if group.iter().any(|c| c.executable == compiler.executable) {
            return;
        }
        group.push(compiler);
        group.sort_by(|a, b| b.version.cmp(&a.version));
    }

    pub fn get(&self, name: &str) -> &[Compiler] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Compiler> {
        self.by_name.values().flatten()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    /// Newest compiler of the first family in preference order
    /// (clang, gcc, msvc, clang-cl).
    pub fn default_compiler(&self) -> Result<&Compiler, ToolchainError> {
        [CompilerKind::Clang, CompilerKind::Gcc, CompilerKind::Msvc, CompilerKind::ClangCl]
            .iter()
            .find_map(|kind| self.get(kind.name()).first())
            .or_else(|| self.iter().next())
            .ok_or(ToolchainError::NoCompilers)
    }

    /// Choose a compiler for `spec`.
    ///
    /// Without a version the newest compiler of that name wins. With a
    /// version, the newest compiler whose version is at least the requested
    /// one. An architecture narrows the candidates further.
    pub fn select(&self, spec: &CompilerSpec) -> Result<&Compiler, ToolchainError> {
        let group = self
            .by_name
            .get(&spec.name)
            .filter(|group| !group.is_empty())
            .ok_or_else(|| ToolchainError::UnknownCompiler {
                name: spec.name.clone(),
                available: self.names().collect::<Vec<_>>().join(", "),
            })?;

        let candidates: Vec<&Compiler> = match spec.version {
            None => group.iter().collect(),
            Some(requested) => {
                let matching: Vec<&Compiler> =
                    group.iter().filter(|c| c.version >= requested).collect();
                if matching.is_empty() {
                    return Err(ToolchainError::NoMatchingVersion {
                        name: spec.name.clone(),
                        requested,
                        newest: group[0].version,
                    });
                }
                matching
            }
        };

        match &spec.arch {
            None => Ok(candidates[0]),
            Some(arch) => candidates
                .into_iter()
                .find(|c| &c.arch == arch)
                .ok_or_else(|| ToolchainError::NoMatchingArch {
                    name: spec.name.clone(),
                    arch: arch.clone(),
                }),
        }
    }
}
