//! Output directory layout
//!
//! ```text
//! <output>/<compiler>/<configuration>/
//!     obj/<source path relative to the source root>.<o|obj>
//!     modules/<module name>.<pcm|gcm|ifc>
//!     <executable>
//! ```
//!
//! Objects keep the source file's full name (`util.ixx.o`, `util.cpp.o`) so an
//! interface unit and its implementation unit never collide.

use camino::{Utf8Path, Utf8PathBuf};
use kiln_scan::ModuleName;
use kiln_toolchain::CompilerKind;

/// Directory under `obj/` for sources outside the source root
const EXTERNAL_DIR: &str = "_external";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: Utf8PathBuf,
    source_root: Utf8PathBuf,
    kind: CompilerKind,
}

impl OutputLayout {
    pub fn new(
        output: &Utf8Path,
        compiler_name: &str,
        configuration: &str,
        source_root: impl Into<Utf8PathBuf>,
        kind: CompilerKind,
    ) -> Self {
        Self {
            dir: output.join(compiler_name).join(configuration),
            source_root: source_root.into(),
            kind,
        }
    }

    /// `<output>/<compiler>/<configuration>`
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn object_dir(&self) -> Utf8PathBuf {
        self.dir.join("obj")
    }

    pub fn module_dir(&self) -> Utf8PathBuf {
        self.dir.join("modules")
    }

    /// Object file for `source`
    pub fn object_path(&self, source: &Utf8Path) -> Utf8PathBuf {
        let relative = match source.strip_prefix(&self.source_root) {
            Ok(relative) => relative.to_owned(),
            Err(_) => Utf8Path::new(EXTERNAL_DIR).join(source.file_name().unwrap_or(source.as_str())),
        };

        let mut file_name = relative.file_name().unwrap_or_default().to_string();
        file_name.push('.');
        file_name.push_str(self.kind.object_extension());

        self.object_dir().join(relative.with_file_name(file_name))
    }

    /// Built interface for `module`
    pub fn interface_path(&self, module: &ModuleName) -> Utf8PathBuf {
        // ':' is not allowed in Windows file names
        let stem = module.as_str().replace(':', "-");
        self.module_dir()
            .join(format!("{stem}.{}", self.kind.interface_extension()))
    }

    pub fn executable_path(&self, name: &str) -> Utf8PathBuf {
        self.dir
            .join(format!("{name}{}", self.kind.executable_suffix()))
    }

    /// Create the object and module directories
    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.object_dir())?;
        std::fs::create_dir_all(self.module_dir())
    }
}
