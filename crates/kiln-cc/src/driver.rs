//! Running a real compiler
//!
//! Renders [`CompileInvocation`]s and [`LinkInvocation`]s into argv for the
//! selected compiler family and runs them with `tokio::process`, capturing
//! stdout and stderr.

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use kiln_toolchain::{Compiler, CompilerKind};
use tokio::process::Command;
use tracing::debug;

use crate::{BuildDriver, CompileInvocation, CompileResult, LinkInvocation, LinkResult};

/// Executes invocations with an installed compiler
#[derive(Debug, Clone)]
pub struct ToolchainDriver {
    compiler: Compiler,
}

impl ToolchainDriver {
    pub fn new(compiler: Compiler) -> Self {
        Self { compiler }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }
}

/// Path of the GCC module mapper written for `object`
fn mapper_path(object: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{object}.map"))
}

/// Contents of a GCC module mapper file: one `name path` line per module
/// the unit produces or reads.
pub fn module_mapper(invocation: &CompileInvocation) -> String {
    let mut out = String::new();
    if let Some(interface) = &invocation.interface {
        out.push_str(&format!("{} {}\n", interface.module, interface.path));
    }
    for (module, path) in &invocation.references {
        out.push_str(&format!("{module} {path}\n"));
    }
    out
}

/// Command-line arguments (without the program) for compiling one unit
pub fn compile_args(kind: CompilerKind, invocation: &CompileInvocation) -> Vec<String> {
    let source = invocation.source.as_str();
    let object = invocation.object.as_str();
    let mut args: Vec<String> = invocation.flags.clone();

    match kind {
        CompilerKind::Clang => {
            if let Some(interface) = &invocation.interface {
                args.push(format!("-fmodule-output={}", interface.path));
            }
            for (module, path) in &invocation.references {
                args.push(format!("-fmodule-file={module}={path}"));
            }
            // `.c` units are C++ too, so the language is always explicit
            if invocation.interface.is_some() {
                args.extend(["-x".into(), "c++-module".into()]);
            } else {
                args.extend(["-x".into(), "c++".into()]);
            }
            args.extend(["-c".into(), source.into(), "-o".into(), object.into()]);
        }
        CompilerKind::Gcc => {
            if invocation.interface.is_some() || !invocation.references.is_empty() {
                args.push(format!("-fmodule-mapper={}", mapper_path(&invocation.object)));
            }
            args.extend(["-x".into(), "c++".into()]);
            args.extend(["-c".into(), source.into(), "-o".into(), object.into()]);
        }
        CompilerKind::Msvc => {
            args.push("/c".into());
            match &invocation.interface {
                Some(interface) => {
                    args.extend(["/interface".into(), "/ifcOutput".into(), interface.path.to_string()]);
                }
                None => args.push("/TP".into()),
            }
            for (module, path) in &invocation.references {
                args.extend(["/reference".into(), format!("{module}={path}")]);
            }
            args.push(format!("/Fo{object}"));
            args.push(source.into());
        }
        CompilerKind::ClangCl => {
            args.push("/c".into());
            match &invocation.interface {
                Some(interface) => {
                    args.push("/clang:-xc++-module".into());
                    args.push(format!("/clang:-fmodule-output={}", interface.path));
                }
                None => args.push("/TP".into()),
            }
            for (module, path) in &invocation.references {
                args.push(format!("/clang:-fmodule-file={module}={path}"));
            }
            args.push(format!("/Fo{object}"));
            args.push(source.into());
        }
    }

    args
}

/// Command-line arguments (without the program) for the final link
pub fn link_args(kind: CompilerKind, invocation: &LinkInvocation) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if kind.is_msvc_style() {
        args.push("/nologo".into());
        args.extend(invocation.objects.iter().map(|o| o.to_string()));
        args.push(format!("/Fe{}", invocation.executable));
        if !invocation.flags.is_empty() {
            args.push("/link".into());
            args.extend(invocation.flags.iter().cloned());
        }
    } else {
        args.extend(invocation.objects.iter().map(|o| o.to_string()));
        args.extend(["-o".into(), invocation.executable.to_string()]);
        args.extend(invocation.flags.iter().cloned());
    }

    args
}

/// Captured output of a finished child process
struct ProcessOutput {
    exit_code: i32,
    success: bool,
    stdout: String,
    stderr: String,
}

async fn ensure_parent(path: &Utf8Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        return Err(format!("failed to create output directory {parent}: {e}"));
    }
    Ok(())
}

async fn run(program: &Utf8Path, args: &[String]) -> ProcessOutput {
    let start = Instant::now();
    debug!(program = %program, ?args, "spawning compiler");

    let output = match Command::new(program).args(args).output().await {
        Ok(output) => output,
        Err(e) => {
            return ProcessOutput {
                exit_code: -1,
                success: false,
                stdout: String::new(),
                stderr: format!("failed to execute {program}: {e}"),
            };
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    debug!(
        exit_code,
        duration_ms = start.elapsed().as_millis() as u64,
        stderr_len = output.stderr.len(),
        "compiler finished"
    );

    ProcessOutput {
        exit_code,
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

impl BuildDriver for ToolchainDriver {
    async fn compile(&self, invocation: &CompileInvocation) -> CompileResult {
        let setup_failure = |stderr: String| CompileResult::Failure {
            exit_code: -1,
            stdout: String::new(),
            stderr,
        };

        if let Err(e) = ensure_parent(&invocation.object).await {
            return setup_failure(e);
        }
        if let Some(interface) = &invocation.interface
            && let Err(e) = ensure_parent(&interface.path).await
        {
            return setup_failure(e);
        }

        let kind = self.compiler.kind;
        if kind == CompilerKind::Gcc
            && (invocation.interface.is_some() || !invocation.references.is_empty())
        {
            let mapper = mapper_path(&invocation.object);
            if let Err(e) = tokio::fs::write(&mapper, module_mapper(invocation)).await {
                return setup_failure(format!("failed to write module mapper {mapper}: {e}"));
            }
        }

        let args = compile_args(kind, invocation);
        let output = run(&self.compiler.executable, &args).await;
        if !output.success {
            return CompileResult::Failure {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            };
        }

        CompileResult::Success {
            object: invocation.object.clone(),
            interface: invocation.interface.as_ref().map(|i| i.path.clone()),
        }
    }

    async fn link(&self, invocation: &LinkInvocation) -> LinkResult {
        if let Err(stderr) = ensure_parent(&invocation.executable).await {
            return LinkResult::Failure {
                exit_code: -1,
                stdout: String::new(),
                stderr,
            };
        }

        let args = link_args(self.compiler.kind, invocation);
        let output = run(&self.compiler.executable, &args).await;
        if !output.success {
            return LinkResult::Failure {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            };
        }

        LinkResult::Success {
            executable: invocation.executable.clone(),
        }
    }
}
