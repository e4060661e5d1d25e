//! Host compiler discovery
//!
//! Scans the directories of `PATH` for compiler drivers, asks each one for
//! its version and target, and records where its standard library module
//! source lives (if anywhere).

use std::collections::HashSet;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::{Compiler, CompilerCollection, CompilerKind, ToolchainError, Version, normalize_arch};

/// Discover compilers on `PATH`
pub fn discover() -> CompilerCollection {
    let dirs: Vec<Utf8PathBuf> = std::env::var_os("PATH")
        .map(|path| {
            std::env::split_paths(&path)
                .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
                .collect()
        })
        .unwrap_or_default();

    discover_in(dirs.iter().map(Utf8PathBuf::as_path))
}

/// Discover compilers in the given directories, in order
pub fn discover_in<'a>(dirs: impl IntoIterator<Item = &'a Utf8Path>) -> CompilerCollection {
    let mut collection = CompilerCollection::new();
    // Distribution symlinks (`clang++` -> `clang++-18`) resolve to the same
    // binary; probe each real binary once.
    let mut seen: HashSet<Utf8PathBuf> = HashSet::new();

    for dir in dirs {
        let Ok(entries) = dir.read_dir_utf8() else {
            continue;
        };

        let mut candidates: Vec<(Utf8PathBuf, CompilerKind)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let kind = candidate_kind(entry.file_name())?;
                Some((entry.into_path(), kind))
            })
            .collect();
        candidates.sort();

        for (executable, kind) in candidates {
            let canonical = executable
                .canonicalize_utf8()
                .unwrap_or_else(|_| executable.clone());
            if !seen.insert(canonical.clone()) {
                continue;
            }

            match probe(&executable, &canonical, kind) {
                Ok(Some(compiler)) => {
                    debug!(
                        name = %compiler.name,
                        version = %compiler.version,
                        arch = %compiler.arch,
                        executable = %compiler.executable,
                        std_module = ?compiler.std_module,
                        "found compiler"
                    );
                    collection.insert(compiler);
                }
                Ok(None) => {
                    debug!(executable = %executable, "unrecognized version output, skipping");
                }
                Err(e) => warn!(error = %e, "failed to probe compiler"),
            }
        }
    }

    info!(compilers = collection.len(), "compiler discovery complete");
    collection
}

/// Which compiler family a file name looks like, if any
fn candidate_kind(file_name: &str) -> Option<CompilerKind> {
    let stem = file_name
        .strip_suffix(".exe")
        .unwrap_or(file_name);

    let versioned = |prefix: &str| {
        stem == prefix
            || stem
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit() || c == '.'))
    };

    if versioned("clang++") {
        Some(CompilerKind::Clang)
    } else if versioned("g++") {
        Some(CompilerKind::Gcc)
    } else if cfg!(windows) && stem.eq_ignore_ascii_case("cl") {
        Some(CompilerKind::Msvc)
    } else if cfg!(windows) && stem.eq_ignore_ascii_case("clang-cl") {
        Some(CompilerKind::ClangCl)
    } else {
        None
    }
}

/// Run a compiler to learn its version and target
fn probe(
    executable: &Utf8Path,
    canonical: &Utf8Path,
    kind: CompilerKind,
) -> Result<Option<Compiler>, ToolchainError> {
    let mut cmd = Command::new(executable);
    match kind {
        // cl prints its banner when run without arguments
        CompilerKind::Msvc => {}
        CompilerKind::Clang | CompilerKind::Gcc | CompilerKind::ClangCl => {
            cmd.arg("--version");
        }
    }

    let output = cmd.output().map_err(|source| ToolchainError::Probe {
        executable: executable.to_owned(),
        source,
    })?;
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let Some((version, arch)) = parse_version_output(kind, &text) else {
        return Ok(None);
    };

    let arch = match arch {
        Some(arch) => arch,
        None if kind == CompilerKind::Gcc => dump_machine(executable)
            .unwrap_or_else(|| normalize_arch(std::env::consts::ARCH)),
        None => normalize_arch(std::env::consts::ARCH),
    };

    let install_dir = install_dir(canonical, kind);
    let std_module = locate_std_module(kind, &install_dir, version);

    Ok(Some(Compiler {
        kind,
        name: kind.name().to_string(),
        version,
        arch,
        executable: executable.to_owned(),
        install_dir,
        std_module,
    }))
}

/// Architecture from `g++ -dumpmachine`
fn dump_machine(executable: &Utf8Path) -> Option<String> {
    let output = Command::new(executable).arg("-dumpmachine").output().ok()?;
    let triple = String::from_utf8_lossy(&output.stdout);
    let arch = triple.trim().split('-').next()?;
    (!arch.is_empty()).then(|| normalize_arch(arch))
}

/// Extract the version (and target architecture, when printed) from a
/// compiler's banner.
pub fn parse_version_output(kind: CompilerKind, output: &str) -> Option<(Version, Option<String>)> {
    match kind {
        CompilerKind::Clang | CompilerKind::ClangCl => {
            let version = output.lines().find_map(|line| {
                let (_, rest) = line.split_once("clang version ")?;
                Version::parse(leading_version(rest)?)
            })?;
            let arch = output.lines().find_map(|line| {
                let triple = line.trim().strip_prefix("Target: ")?;
                triple.split('-').next().map(normalize_arch)
            });
            Some((version, arch))
        }
        CompilerKind::Gcc => {
            let first = output.lines().find(|line| !line.trim().is_empty())?;
            // `g++ (Ubuntu 13.2.0-23ubuntu4) 13.2.0`: the version follows the
            // parenthesized package description
            let tail = first.rsplit_once(')').map_or(first, |(_, tail)| tail);
            let version = tail
                .split_whitespace()
                .filter(|token| token.contains('.'))
                .find_map(|token| Version::parse(leading_version(token)?))?;
            Some((version, None))
        }
        CompilerKind::Msvc => {
            let line = output.lines().find(|line| line.contains("Version "))?;
            let (_, rest) = line.split_once("Version ")?;
            let version = Version::parse(leading_version(rest)?)?;
            let arch = rest
                .split_once(" for ")
                .map(|(_, arch)| normalize_arch(arch.trim()));
            Some((version, arch))
        }
    }
}

/// The `1.2.3` prefix of `s`
fn leading_version(s: &str) -> Option<&str> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let version = s[..end].trim_end_matches('.');
    (!version.is_empty()).then_some(version)
}

/// Installation prefix of a compiler binary
fn install_dir(canonical: &Utf8Path, kind: CompilerKind) -> Utf8PathBuf {
    // `<VCToolsInstallDir>/bin/Host<arch>/<arch>/cl.exe`
    let depth = match kind {
        CompilerKind::Msvc => 4,
        CompilerKind::Clang | CompilerKind::Gcc | CompilerKind::ClangCl => 2,
    };
    canonical
        .ancestors()
        .nth(depth)
        .unwrap_or(canonical)
        .to_owned()
}

/// Where a toolchain keeps the source of its `std` module, if it ships one
pub fn locate_std_module(kind: CompilerKind, install_dir: &Utf8Path, version: Version) -> Option<Utf8PathBuf> {
    let candidates: Vec<Utf8PathBuf> = match kind {
        CompilerKind::Clang | CompilerKind::ClangCl => vec![
            install_dir.join("share/libc++/v1/std.cppm"),
            install_dir.join("lib/libc++/v1/std.cppm"),
        ],
        CompilerKind::Gcc => vec![
            install_dir.join(format!("include/c++/{}/bits/std.cc", version.major)),
            install_dir.join(format!(
                "include/c++/{}.{}.0/bits/std.cc",
                version.major, version.minor
            )),
        ],
        CompilerKind::Msvc => vec![install_dir.join("modules/std.ixx")],
    };

    candidates.into_iter().find(|path| path.is_file())
}
