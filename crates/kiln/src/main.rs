//! kiln - incremental build tool for C++ named modules
//!
//! Scans the project's sources for module declarations, orders them into
//! levels, and compiles each level in parallel with the selected compiler,
//! skipping files whose artifacts are newer than their inputs.

mod observe;

use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result, bail};
use facet::Facet;
use facet_args as args;
use owo_colors::OwoColorize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use kiln_build::{Build, BuildError, BuildObserver, BuildOutcome, BuildSettings, bootstrap_std_module, default_jobs};
use kiln_cc::{BuildConfig, OutputLayout, ToolchainDriver};
use kiln_graph::{LevelPolicy, Resolution, schedule};
use kiln_project::Project;
use kiln_report::{BuildReport, CompilerRecord, FileStatus, ReportStore};
use kiln_scan::{SourceSet, scan_tree};
use kiln_toolchain::{Compiler, CompilerSpec, ToolchainError, discover};

use crate::observe::{Observers, Progress, ReportRecorder};

/// kiln - incremental build tool for C++ named modules
#[derive(Facet, Debug)]
struct Cli {
    /// Show version information
    #[facet(args::named, args::short = 'V')]
    version: bool,

    /// Command to run
    #[facet(args::subcommand)]
    command: CliCommand,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CliCommand {
    /// Compile stale files and link the executable
    Build {
        /// Configurations, comma separated (default: debug)
        #[facet(args::named, args::short = 'c', default)]
        config: Option<String>,

        /// Compiler spec: name[:major[.minor][:arch]]
        #[facet(args::named, default)]
        compiler: Option<String>,

        /// Maximum number of concurrent compiles
        #[facet(args::named, args::short = 'j', default)]
        jobs: Option<usize>,

        /// Number levels by longest dependency path instead of closure size
        #[facet(args::named)]
        longest_path: bool,
    },

    /// Build, then run the executable
    Run {
        /// Configurations, comma separated (default: debug)
        #[facet(args::named, args::short = 'c', default)]
        config: Option<String>,

        /// Compiler spec: name[:major[.minor][:arch]]
        #[facet(args::named, default)]
        compiler: Option<String>,

        /// Maximum number of concurrent compiles
        #[facet(args::named, args::short = 'j', default)]
        jobs: Option<usize>,

        /// Number levels by longest dependency path instead of closure size
        #[facet(args::named)]
        longest_path: bool,
    },

    /// Print the build levels without compiling
    Levels {
        /// Number levels by longest dependency path instead of closure size
        #[facet(args::named)]
        longest_path: bool,
    },

    /// List the compilers found on PATH
    Compilers,

    /// Remove the output directory and .kiln/
    Clean,

    /// Explain the last build
    Explain {
        /// Show only files that failed or never started
        #[facet(args::named)]
        failed: bool,
    },
}

/// Options shared by `build` and `run`
#[derive(Debug, Default)]
struct BuildOptions {
    config: Option<String>,
    compiler: Option<String>,
    jobs: Option<usize>,
    longest_path: bool,
}

impl BuildOptions {
    fn policy(&self) -> LevelPolicy {
        policy(self.longest_path)
    }
}

fn policy(longest_path: bool) -> LevelPolicy {
    if longest_path {
        LevelPolicy::LongestPath
    } else {
        LevelPolicy::ClosureSize
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default of warnings only (e.g. RUST_LOG=kiln_build=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli: Cli = args::from_std_args()?;

    if cli.version {
        println!("kiln {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match cli.command {
        CliCommand::Build {
            config,
            compiler,
            jobs,
            longest_path,
        } => {
            let options = BuildOptions {
                config,
                compiler,
                jobs,
                longest_path,
            };
            cmd_build(&options).await.map(drop)
        }
        CliCommand::Run {
            config,
            compiler,
            jobs,
            longest_path,
        } => {
            let options = BuildOptions {
                config,
                compiler,
                jobs,
                longest_path,
            };
            cmd_run(&options).await
        }
        CliCommand::Levels { longest_path } => cmd_levels(policy(longest_path)),
        CliCommand::Compilers => cmd_compilers(),
        CliCommand::Clean => cmd_clean(),
        CliCommand::Explain { failed } => cmd_explain(failed),
    }
}

fn current_project() -> Result<Project> {
    let cwd = Utf8PathBuf::try_from(std::env::current_dir()?)?;
    Ok(Project::load(&cwd)?)
}

/// Scan the project's source tree
fn scan_sources(project: &Project) -> Result<SourceSet> {
    if !project.sources.is_dir() {
        bail!("source directory {} does not exist", project.sources);
    }
    Ok(scan_tree(&project.sources)?)
}

fn select_compiler(requested: Option<&str>) -> Result<Compiler> {
    let compilers = discover();
    if compilers.is_empty() {
        return Err(ToolchainError::NoCompilers.into());
    }

    let compiler = match requested {
        Some(spec) => compilers.select(&CompilerSpec::parse(spec)?)?,
        None => compilers.default_compiler()?,
    };
    debug!(compiler = %compiler, executable = %compiler.executable, "selected compiler");
    Ok(compiler.clone())
}

/// Add the toolchain's `std` module sources when the project wants them
fn add_std_module(project: &Project, compiler: &Compiler, sources: &mut SourceSet) -> Result<()> {
    if project.std_module
        && let Some(std_source) = &compiler.std_module
    {
        bootstrap_std_module(sources, std_source)?;
    }
    Ok(())
}

fn format_duration(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

fn print_unresolved(resolution: &Resolution) {
    for unresolved in resolution.unresolved() {
        println!(
            "{} {} imports '{}', which no source exports",
            "Note:".yellow().bold(),
            unresolved.path,
            unresolved.module
        );
    }
}

async fn cmd_build(options: &BuildOptions) -> Result<BuildOutcome> {
    let project = current_project()?;
    let compiler = select_compiler(options.compiler.as_deref().or(project.compiler.as_deref()))?;
    let config = BuildConfig::resolve(
        compiler.kind,
        options.config.as_deref().unwrap_or("debug"),
        &project.configurations,
    )?;

    let mut sources = scan_sources(&project)?;
    add_std_module(&project, &compiler, &mut sources)?;

    let resolution = kiln_graph::resolve(&sources)?;
    let levels = schedule(&sources, &resolution, options.policy());

    let layout = OutputLayout::new(
        &project.output,
        &compiler.name,
        &config.name,
        project.sources.clone(),
        compiler.kind,
    );
    let settings = BuildSettings {
        executable: layout.executable_path(&project.name),
        layout,
        flags: config.flags.clone(),
        link_flags: project.link_flags.clone(),
        jobs: options.jobs.or(project.jobs).unwrap_or_else(default_jobs),
    };

    println!(
        "{} {} with {} [{}]",
        "Building".green().bold(),
        project.name,
        compiler,
        config.configurations.join(",")
    );

    let report = BuildReport::new(
        &project.root,
        config.configurations.join(","),
        CompilerRecord {
            name: compiler.name.clone(),
            version: compiler.version.to_string(),
            executable: compiler.executable.to_string(),
        },
    );
    let progress = Arc::new(Progress::new(&project.root));
    let recorder = Arc::new(ReportRecorder::new(&project.root, report));
    let observers: Vec<Arc<dyn BuildObserver>> = vec![progress.clone(), recorder.clone()];

    let build = Build::new(ToolchainDriver::new(compiler), settings)
        .with_observer(Arc::new(Observers(observers)));
    let start = Instant::now();
    let result = build.run(&sources, &resolution, &levels).await;
    progress.finish();

    let mut report = recorder.snapshot();
    report.finalize(result.is_ok(), result.as_ref().err().map(ToString::to_string));
    if let Err(e) = ReportStore::new(&project.root).save(&report) {
        warn!(error = %e, "failed to save build report");
    }

    print_unresolved(&resolution);

    match result {
        Ok(outcome) => {
            println!(
                "{} {} compiled, {} up to date in {}",
                "Finished".green().bold(),
                outcome.compiled,
                outcome.reused,
                format_duration(start.elapsed().as_millis() as u64).dimmed()
            );
            println!("  {} {}", "Binary:".dimmed(), outcome.executable);
            Ok(outcome)
        }
        Err(e) => {
            report_build_error(&project.root, &e);
            Err(e.into())
        }
    }
}

fn report_build_error(root: &Utf8Path, error: &BuildError) {
    if let BuildError::Compile {
        path,
        failed,
        cancelled,
        ..
    } = error
    {
        let path = path.strip_prefix(root).unwrap_or(path);
        eprintln!(
            "{} {} ({} failed, {} not started)",
            "error:".red().bold(),
            path,
            failed,
            cancelled
        );
    }

    if let Some((stdout, stderr)) = error.captured_output() {
        for output in [stdout, stderr] {
            let output = output.trim_end();
            if !output.is_empty() {
                eprintln!("{output}");
            }
        }
    }
}

async fn cmd_run(options: &BuildOptions) -> Result<()> {
    let outcome = cmd_build(options).await?;

    println!("{} {}", "Running".green().bold(), outcome.executable);
    let status = tokio::process::Command::new(&outcome.executable)
        .status()
        .await?;
    if !status.success() {
        bail!("{} exited with {}", outcome.executable, status);
    }
    Ok(())
}

fn cmd_levels(policy: LevelPolicy) -> Result<()> {
    let project = current_project()?;
    let mut sources = scan_sources(&project)?;
    // Show the same schedule `build` would run, when a compiler is around
    if project.std_module {
        match select_compiler(project.compiler.as_deref()) {
            Ok(compiler) => add_std_module(&project, &compiler, &mut sources)?,
            Err(err) => debug!(error = %err, "no compiler, skipping the standard library module"),
        }
    }
    let resolution = kiln_graph::resolve(&sources)?;
    let levels = schedule(&sources, &resolution, policy);

    if levels.is_empty() {
        println!("{} no sources in {}", "Note:".yellow().bold(), project.sources);
        return Ok(());
    }

    for (position, level) in levels.iter().enumerate() {
        println!(
            "{} {} {}",
            "Level".bold(),
            position,
            format!("(rank {}, {} files)", level.index, level.files.len()).dimmed()
        );
        for &file in &level.files {
            let source = sources.get(file);
            match &source.exported_module {
                Some(module) => println!(
                    "  {:<40} {} {}",
                    sources.relative_path(file),
                    "exports".dimmed(),
                    module.cyan()
                ),
                None => println!("  {}", sources.relative_path(file)),
            }
        }
    }

    print_unresolved(&resolution);
    Ok(())
}

fn cmd_compilers() -> Result<()> {
    let compilers = discover();
    if compilers.is_empty() {
        println!("{} no C++ compilers found on PATH", "Note:".yellow().bold());
        return Ok(());
    }

    let default = compilers.default_compiler().ok().map(|c| c.executable.clone());
    for compiler in compilers.iter() {
        let marker = if Some(&compiler.executable) == default.as_ref() {
            "*".green().bold().to_string()
        } else {
            " ".to_string()
        };
        let std_module = match &compiler.std_module {
            Some(path) => format!("std module: {path}"),
            None => "no std module".to_string(),
        };
        println!(
            "{} {:<10} {:<8} {:<8} {} {}",
            marker,
            compiler.name,
            compiler.version.to_string(),
            compiler.arch,
            compiler.executable,
            std_module.dimmed()
        );
    }
    Ok(())
}

fn cmd_clean() -> Result<()> {
    let project = current_project()?;

    for dir in [project.output.clone(), project.state_dir()] {
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            println!("{} {}", "Removed".green().bold(), dir);
        } else {
            println!("{} {} does not exist", "Note:".yellow().bold(), dir);
        }
    }
    Ok(())
}

fn cmd_explain(failed_only: bool) -> Result<()> {
    let project = current_project()?;
    let store = ReportStore::new(&project.root);

    let Some(report) = store.load_latest()? else {
        println!(
            "{} No build reports found. Run {} first.",
            "Error:".red().bold(),
            "kiln build".cyan()
        );
        return Ok(());
    };

    let status = if report.success {
        "SUCCESS".green().bold().to_string()
    } else {
        "FAILED".red().bold().to_string()
    };
    println!(
        "{} {} in {}",
        "Build:".bold(),
        status,
        format_duration(report.duration_ms()).dimmed()
    );
    println!("  {} {}", "Run ID:".dimmed(), report.run_id);
    println!("  {} {}", "Configuration:".dimmed(), report.configuration);
    println!(
        "  {} {} {} ({})",
        "Compiler:".dimmed(),
        report.compiler.name,
        report.compiler.version,
        report.compiler.executable
    );

    println!();
    println!(
        "{} {} compiled, {} up to date, {} failed, {} cancelled ({} levels)",
        "Files:".bold(),
        report.count(FileStatus::Compiled).to_string().green(),
        report.count(FileStatus::UpToDate),
        report.count(FileStatus::Failed).to_string().red(),
        report.count(FileStatus::Cancelled).to_string().yellow(),
        report.levels
    );

    let files: Vec<_> = report
        .files_by_level()
        .into_iter()
        .filter(|f| !failed_only || matches!(f.status, FileStatus::Failed | FileStatus::Cancelled))
        .collect();
    if !files.is_empty() {
        println!();
        println!(
            "  {:<40} {:<6} {:<12} {}",
            "FILE".dimmed(),
            "LEVEL".dimmed(),
            "STATUS".dimmed(),
            "DURATION".dimmed()
        );
        for file in files {
            let status = match file.status {
                FileStatus::Compiled => "compiled".green().to_string(),
                FileStatus::UpToDate => "up to date".dimmed().to_string(),
                FileStatus::Failed => match file.exit_code {
                    Some(code) => format!("failed ({code})").red().to_string(),
                    None => "failed".red().to_string(),
                },
                FileStatus::Cancelled => "cancelled".yellow().to_string(),
            };
            let duration = if file.duration_ms > 0 {
                format_duration(file.duration_ms)
            } else {
                "-".to_string()
            };
            println!(
                "  {:<40} {:<6} {:<12} {}",
                file.source, file.level, status, duration
            );
        }
    }

    if let Some(link) = &report.link {
        println!();
        let outcome = if link.success {
            "linked".green().to_string()
        } else {
            "link failed".red().to_string()
        };
        println!(
            "{} {} {} in {}",
            "Link:".bold(),
            link.executable,
            outcome,
            format_duration(link.duration_ms).dimmed()
        );
    }

    if let Some(error) = &report.error {
        println!();
        println!("{}", "Error:".red().bold());
        for line in error.lines().take(10) {
            println!("  {line}");
        }
        let more = error.lines().count().saturating_sub(10);
        if more > 0 {
            println!("  {} ({more} more lines)", "...".dimmed());
        }
    }

    Ok(())
}
