//! Test harness for kiln integration tests
//!
//! Each [`TestEnv`] is a throwaway project directory; commands run the
//! `kiln` binary built by cargo with that directory as the working dir.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

/// An isolated project directory
pub struct TestEnv {
    pub project: TempDir,
    /// Extra environment for every command
    env: Vec<(String, String)>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            project: TempDir::new().expect("failed to create project temp dir"),
            env: Vec::new(),
        }
    }

    /// Set an environment variable for every later command
    pub fn set_env(&mut self, key: &str, value: &str) {
        self.env.push((key.to_string(), value.to_string()));
    }

    /// Run `kiln <args>` in the project directory
    pub fn kiln(&self, args: &[&str]) -> KilnOutput {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_kiln"));
        cmd.current_dir(self.project.path());
        cmd.env_remove("KILN_COMPILER");
        cmd.env_remove("KILN_JOBS");
        cmd.env("NO_COLOR", "1");
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.args(args);

        let output = cmd.output().expect("failed to run kiln");
        KilnOutput::from(output)
    }

    /// Write a file into the project, dated a minute ago so that anything
    /// kiln produces afterwards is strictly newer.
    pub fn write_file(&self, relative_path: &str, contents: &str) {
        let path = self.project.path().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        std::fs::write(&path, contents).expect("failed to write file");
        set_age(&path, Duration::from_secs(60));
    }

    /// Mark a project file as modified just now
    pub fn touch(&self, relative_path: &str) {
        set_age(&self.project.path().join(relative_path), Duration::ZERO);
    }

    pub fn file_exists(&self, relative_path: &str) -> bool {
        self.project.path().join(relative_path).exists()
    }

    pub fn project_path(&self) -> &Path {
        self.project.path()
    }
}

fn set_age(path: &Path, age: Duration) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .expect("failed to open file")
        .set_modified(SystemTime::now() - age)
        .expect("failed to set mtime");
}

/// Output from running kiln
#[derive(Debug)]
pub struct KilnOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl KilnOutput {
    /// Check if stdout or stderr contains `s`
    pub fn contains(&self, s: &str) -> bool {
        self.stdout.contains(s) || self.stderr.contains(s)
    }

    /// Byte offset of `s` in stdout, panicking if absent
    pub fn position(&self, s: &str) -> usize {
        self.stdout
            .find(s)
            .unwrap_or_else(|| panic!("{s:?} not in output:\n{}", self.stdout))
    }
}

impl From<Output> for KilnOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// `core.ixx` <- `util.ixx` <- `main.cpp`
pub fn create_module_chain(env: &TestEnv) {
    env.write_file("kiln.toml", "[project]\nname = \"app\"\n");
    env.write_file(
        "src/core.ixx",
        "export module core;\nexport int answer() { return 42; }\n",
    );
    env.write_file(
        "src/util.ixx",
        "export module util;\nimport core;\nexport int twice() { return 2 * answer(); }\n",
    );
    env.write_file(
        "src/main.cpp",
        "import util;\nint main() { return twice() == 84 ? 0 : 1; }\n",
    );
}

/// Install a fake `clang++` reporting version 99 into `<project>/fake-bin`
/// and put it first on PATH.
///
/// It creates every `-o` and `-fmodule-output=` file it is given, and fails
/// on any input file containing the word BROKEN.
#[cfg(unix)]
pub fn install_fake_clang(env: &mut TestEnv) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bin = env.project_path().join("fake-bin");
    std::fs::create_dir_all(&bin).expect("failed to create fake-bin");
    let driver = bin.join("clang++");
    std::fs::write(
        &driver,
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo 'clang version 99.0.0 (fake)'
    echo 'Target: x86_64-unknown-linux-gnu'
    exit 0
fi
out=""
prev=""
for arg in "$@"; do
    case "$arg" in
        -fmodule-output=*)
            iface="${arg#-fmodule-output=}"
            mkdir -p "$(dirname "$iface")"
            : > "$iface"
            ;;
    esac
    if [ "$prev" = "-o" ]; then
        out="$arg"
    fi
    if [ -f "$arg" ] && grep -q BROKEN "$arg"; then
        echo "$arg: error: broken on purpose" >&2
        exit 1
    fi
    prev="$arg"
done
mkdir -p "$(dirname "$out")"
: > "$out"
"#,
    )
    .expect("failed to write fake compiler");
    std::fs::set_permissions(&driver, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod fake compiler");

    let path = std::env::var("PATH").unwrap_or_default();
    env.set_env("PATH", &format!("{}:{path}", bin.display()));
    env.set_env("KILN_COMPILER", "clang:99");
    driver
}
