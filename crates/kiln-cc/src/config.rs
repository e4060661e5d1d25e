//! Build configurations
//!
//! A configuration is a named flag set (`debug`, `release`, `analyze`).
//! Several can be combined as `debug,analyze`: the flags are concatenated
//! after the compiler's shared flags, and the first name picks the output
//! directory.

use std::collections::BTreeMap;

use kiln_toolchain::CompilerKind;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("empty configuration name in '{spec}' (trailing comma?)")]
    EmptyName { spec: String },

    #[error("unknown configuration '{name}' (available: {available})")]
    Unknown { name: String, available: String },
}

/// Flags passed to every compile, regardless of configuration
pub fn shared_flags(kind: CompilerKind) -> &'static [&'static str] {
    match kind {
        CompilerKind::Clang => &["-std=c++23", "-Wall", "-Wextra"],
        CompilerKind::Gcc => &["-std=c++23", "-fmodules-ts", "-Wall", "-Wextra"],
        CompilerKind::Msvc => &["/nologo", "/EHsc", "/std:c++latest", "/permissive-", "/fastfail"],
        CompilerKind::ClangCl => &["/nologo", "/EHsc", "/std:c++latest"],
    }
}

/// Built-in configurations for a compiler family
pub fn builtin_configurations(kind: CompilerKind) -> &'static [(&'static str, &'static [&'static str])] {
    match kind {
        CompilerKind::Clang => &[
            ("debug", &["-O0", "-g", "-D_DEBUG"]),
            ("release", &["-O2", "-DNDEBUG"]),
            ("analyze", &["-Wshadow", "-Wconversion", "-Wthread-safety"]),
        ],
        CompilerKind::Gcc => &[
            ("debug", &["-O0", "-g", "-D_DEBUG"]),
            ("release", &["-O2", "-DNDEBUG"]),
            ("analyze", &["-fanalyzer"]),
        ],
        CompilerKind::Msvc => &[
            ("debug", &["/D_DEBUG", "/Od", "/Z7"]),
            ("release", &["/DNDEBUG", "/O2"]),
            ("analyze", &["/analyze:external-"]),
        ],
        CompilerKind::ClangCl => &[
            ("debug", &["/D_DEBUG", "/Od", "/Z7"]),
            ("release", &["/DNDEBUG", "/O2"]),
            ("analyze", &["/W4"]),
        ],
    }
}

/// The flag set selected for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Output directory name (the first configuration)
    pub name: String,
    /// Every selected configuration, in order
    pub configurations: Vec<String>,
    /// Compile flags: shared flags followed by each configuration's flags
    pub flags: Vec<String>,
}

impl BuildConfig {
    /// Resolve a comma-separated configuration list for `kind`.
    ///
    /// `custom` holds project-defined configurations; for a built-in name
    /// their flags are appended to the built-in ones.
    pub fn resolve(
        kind: CompilerKind,
        spec: &str,
        custom: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ConfigError> {
        let builtins = builtin_configurations(kind);
        let mut flags: Vec<String> = shared_flags(kind).iter().map(|f| f.to_string()).collect();
        let mut configurations: Vec<String> = Vec::new();

        for name in spec.split(',') {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName {
                    spec: spec.to_string(),
                });
            }
            if configurations.iter().any(|c| c == name) {
                continue;
            }

            let builtin = builtins.iter().find(|(n, _)| *n == name).map(|(_, f)| *f);
            let extra = custom.get(name);
            if builtin.is_none() && extra.is_none() {
                let mut available: Vec<&str> = builtins.iter().map(|(n, _)| *n).collect();
                available.extend(custom.keys().map(String::as_str));
                available.sort_unstable();
                available.dedup();
                return Err(ConfigError::Unknown {
                    name: name.to_string(),
                    available: available.join(", "),
                });
            }

            flags.extend(builtin.unwrap_or_default().iter().map(|f| f.to_string()));
            flags.extend(extra.into_iter().flatten().cloned());
            configurations.push(name.to_string());
        }

        Ok(Self {
            name: configurations[0].clone(),
            configurations,
            flags,
        })
    }
}
