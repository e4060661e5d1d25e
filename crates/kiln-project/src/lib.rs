//! `kiln.toml` parsing for kiln
//!
//! The file is optional. Without it a project is the current directory,
//! its sources live in `src/`, and artifacts go to `kiln.out/`.
//!
//! ```toml
//! [project]
//! name = "app"
//! sources = "src"
//! output = "kiln.out"
//! compiler = "clang:18"
//! std-module = true
//!
//! [configurations.debug]
//! flags = ["-DTRACE=1"]
//!
//! [link]
//! flags = ["-lpthread"]
//! ```

use std::collections::{BTreeMap, HashMap};

use camino::{Utf8Path, Utf8PathBuf};
use facet::Facet;
use thiserror::Error;
use tracing::debug;

/// Name of the project file at the project root
pub const PROJECT_FILE: &str = "kiln.toml";

/// Environment variable overriding the compiler spec
pub const COMPILER_ENV: &str = "KILN_COMPILER";

/// Environment variable overriding the number of compile jobs
pub const JOBS_ENV: &str = "KILN_JOBS";

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },

    #[error("invalid project name {name:?}: must be non-empty and contain no path separators")]
    InvalidName { name: String },

    #[error("invalid KILN_JOBS={value:?}: expected a positive integer")]
    InvalidJobs { value: String },
}

/// Raw TOML structure, before defaults are applied
#[derive(Facet, Debug, Default)]
struct RawProjectFile {
    project: Option<RawProject>,
    configurations: Option<HashMap<String, RawFlags>>,
    link: Option<RawFlags>,
}

#[derive(Facet, Debug, Default)]
#[facet(rename_all = "kebab-case")]
struct RawProject {
    name: Option<String>,
    sources: Option<String>,
    output: Option<String>,
    compiler: Option<String>,
    std_module: Option<bool>,
}

#[derive(Facet, Debug, Default)]
struct RawFlags {
    flags: Option<Vec<String>>,
}

/// A project with every default filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub root: Utf8PathBuf,
    /// Executable name
    pub name: String,
    /// Absolute source directory
    pub sources: Utf8PathBuf,
    /// Absolute output directory
    pub output: Utf8PathBuf,
    /// Compiler spec, `name[:major[.minor][:arch]]`
    pub compiler: Option<String>,
    /// Make `import std;` available when the toolchain ships the module
    pub std_module: bool,
    /// Extra compile flags per configuration name
    pub configurations: BTreeMap<String, Vec<String>>,
    pub link_flags: Vec<String>,
    /// Compile job limit from the environment
    pub jobs: Option<usize>,
}

impl Project {
    /// Load the project rooted at `root`, reading `kiln.toml` when present
    /// and applying environment overrides.
    pub fn load(root: &Utf8Path) -> Result<Self, ProjectError> {
        let mut project = Self::from_dir(root)?;
        project.apply_env(|key| std::env::var(key).ok())?;
        Ok(project)
    }

    /// Like [`Project::load`], without looking at the environment
    pub fn from_dir(root: &Utf8Path) -> Result<Self, ProjectError> {
        let path = root.join(PROJECT_FILE);
        if !path.exists() {
            debug!(root = %root, "no {PROJECT_FILE}, using defaults");
            return Self::from_raw(RawProjectFile::default(), root);
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| ProjectError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_str(&contents, root)
    }

    /// Parse `kiln.toml` content for a project rooted at `root`
    pub fn from_str(contents: &str, root: &Utf8Path) -> Result<Self, ProjectError> {
        let raw: RawProjectFile = facet_toml::from_str(contents).map_err(|e| ProjectError::Parse {
            path: root.join(PROJECT_FILE),
            message: e.to_string(),
        })?;
        Self::from_raw(raw, root)
    }

    fn from_raw(raw: RawProjectFile, root: &Utf8Path) -> Result<Self, ProjectError> {
        let project = raw.project.unwrap_or_default();

        let name = match project.name {
            Some(name) => name,
            None => root.file_name().unwrap_or("app").to_string(),
        };
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ProjectError::InvalidName { name });
        }

        let configurations = raw
            .configurations
            .unwrap_or_default()
            .into_iter()
            .map(|(name, table)| (name, table.flags.unwrap_or_default()))
            .collect();

        Ok(Self {
            root: root.to_owned(),
            name,
            sources: root.join(project.sources.as_deref().unwrap_or("src")),
            output: root.join(project.output.as_deref().unwrap_or("kiln.out")),
            compiler: project.compiler.filter(|c| !c.trim().is_empty()),
            std_module: project.std_module.unwrap_or(true),
            configurations,
            link_flags: raw.link.and_then(|l| l.flags).unwrap_or_default(),
            jobs: None,
        })
    }

    /// Apply `KILN_COMPILER` and `KILN_JOBS` as returned by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ProjectError> {
        if let Some(compiler) = lookup(COMPILER_ENV).filter(|c| !c.trim().is_empty()) {
            debug!(%compiler, "compiler overridden from environment");
            self.compiler = Some(compiler);
        }

        if let Some(value) = lookup(JOBS_ENV) {
            match value.trim().parse::<usize>() {
                Ok(jobs) if jobs > 0 => self.jobs = Some(jobs),
                _ => return Err(ProjectError::InvalidJobs { value }),
            }
        }
        Ok(())
    }

    /// Directory for kiln's own state (build reports)
    pub fn state_dir(&self) -> Utf8PathBuf {
        self.root.join(".kiln")
    }
}
