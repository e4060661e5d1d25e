//! C++ build support for kiln
//!
//! This crate provides the types that describe one compile or link step,
//! the [`BuildDriver`] abstraction that executes them, and a
//! [`ToolchainDriver`] that runs a real compiler as a child process.

mod config;
mod driver;
mod layout;

use std::future::Future;

use camino::Utf8PathBuf;
use kiln_scan::ModuleName;

pub use config::{BuildConfig, ConfigError, builtin_configurations, shared_flags};
pub use driver::{ToolchainDriver, compile_args, link_args, module_mapper};
pub use layout::OutputLayout;

/// Module interface produced by a compile step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceOutput {
    /// Module (or partition) the source exports
    pub module: ModuleName,
    /// Where the compiler writes the built interface
    pub path: Utf8PathBuf,
}

/// Invocation for compiling a single translation unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileInvocation {
    /// Source file
    pub source: Utf8PathBuf,
    /// Object file to produce
    pub object: Utf8PathBuf,
    /// Interface to produce, for interface and partition units
    pub interface: Option<InterfaceOutput>,
    /// Built interfaces of the modules this unit needs, by module name
    pub references: Vec<(ModuleName, Utf8PathBuf)>,
    /// Configuration flags (shared + selected configurations)
    pub flags: Vec<String>,
}

/// Invocation for linking objects into an executable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInvocation {
    /// Objects in link order
    pub objects: Vec<Utf8PathBuf>,
    /// Executable to produce
    pub executable: Utf8PathBuf,
    /// Extra linker flags
    pub flags: Vec<String>,
}

/// Result of compiling a translation unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileResult {
    /// Compilation succeeded
    Success {
        /// The compiled object file
        object: Utf8PathBuf,
        /// The built module interface (if the unit exports one)
        interface: Option<Utf8PathBuf>,
    },
    /// Compilation failed
    Failure {
        /// Exit code from compiler (-1 if it could not be run)
        exit_code: i32,
        /// Standard output
        stdout: String,
        /// Standard error output
        stderr: String,
    },
}

impl CompileResult {
    /// Returns true if compilation succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Success { .. })
    }

    /// Returns the object path if successful
    pub fn object(&self) -> Option<&Utf8PathBuf> {
        match self {
            CompileResult::Success { object, .. } => Some(object),
            CompileResult::Failure { .. } => None,
        }
    }
}

/// Result of linking
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkResult {
    /// Linking succeeded
    Success {
        /// The linked executable
        executable: Utf8PathBuf,
    },
    /// Linking failed
    Failure {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

impl LinkResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LinkResult::Success { .. })
    }
}

/// Executes compile and link steps.
///
/// Implementations must be shareable across worker tasks; the futures they
/// return are spawned onto the tokio runtime.
pub trait BuildDriver: Send + Sync + 'static {
    /// Compile one translation unit
    fn compile(&self, invocation: &CompileInvocation) -> impl Future<Output = CompileResult> + Send;

    /// Link the final executable
    fn link(&self, invocation: &LinkInvocation) -> impl Future<Output = LinkResult> + Send;
}
