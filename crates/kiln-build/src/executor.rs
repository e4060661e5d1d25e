//! Level executor
//!
//! Runs a schedule level by level. Inside a level every stale file is
//! compiled on its own tokio task, bounded by a semaphore; up-to-date files
//! are skipped but still contribute their object and interface. Once every
//! level succeeded the objects are linked exactly once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use kiln_cc::{
    BuildDriver, CompileInvocation, CompileResult, InterfaceOutput, LinkInvocation, LinkResult,
    OutputLayout,
};
use kiln_graph::{BuildLevel, Resolution};
use kiln_scan::{FileId, ModuleName, SourceSet};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::gate;
use crate::observer::{BuildObserver, FileEvent, FileOutcome, NoopObserver};

/// Number of compile jobs to run at once when not configured
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Per-invocation build settings
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub layout: OutputLayout,
    /// Compile flags for every unit
    pub flags: Vec<String>,
    pub link_flags: Vec<String>,
    pub executable: Utf8PathBuf,
    /// Maximum concurrent compiles
    pub jobs: usize,
}

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Linked objects, in schedule order
    pub objects: Vec<Utf8PathBuf>,
    pub executable: Utf8PathBuf,
    /// Files compiled in this run
    pub compiled: usize,
    /// Files whose artifacts were reused
    pub reused: usize,
}

/// Result from a compile worker
struct CompiledUnit {
    source: Utf8PathBuf,
    result: CompileResult,
}

/// One build invocation.
///
/// Owns the shared state the workers write to: the object list and the
/// registry of built interfaces by module name.
pub struct Build<D> {
    driver: Arc<D>,
    settings: BuildSettings,
    observer: Arc<dyn BuildObserver>,
    /// Object of every file that compiled or was reused
    objects: Arc<Mutex<BTreeMap<FileId, Utf8PathBuf>>>,
    /// Built interface of every module available so far
    interfaces: Arc<Mutex<HashMap<ModuleName, Utf8PathBuf>>>,
}

impl<D: BuildDriver> Build<D> {
    pub fn new(driver: D, settings: BuildSettings) -> Self {
        Self {
            driver: Arc::new(driver),
            settings,
            observer: Arc::new(NoopObserver),
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            interfaces: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Compile every stale file of `levels` in order, then link.
    pub async fn run(
        &self,
        sources: &SourceSet,
        resolution: &Resolution,
        levels: &[BuildLevel],
    ) -> Result<BuildOutcome, BuildError> {
        if sources.is_empty() {
            return Err(BuildError::NoSources);
        }

        let layout = &self.settings.layout;
        layout.create().map_err(|source| BuildError::CreateDir {
            path: layout.dir().to_owned(),
            source,
        })?;

        self.objects.lock().await.clear();
        self.interfaces.lock().await.clear();

        let jobs = self.settings.jobs.max(1);
        let semaphore = Arc::new(Semaphore::new(jobs));
        let failed = Arc::new(AtomicBool::new(false));

        info!(
            files = sources.len(),
            levels = levels.len(),
            jobs,
            output = %layout.dir(),
            "starting build"
        );
        self.observer.build_started(sources.len(), levels.len());

        let mut compiled = 0usize;
        let mut reused = 0usize;
        let mut cancelled = 0usize;
        let mut failures: Vec<(Utf8PathBuf, i32, String, String)> = Vec::new();

        for (position, level) in levels.iter().enumerate() {
            if failed.load(Ordering::SeqCst) {
                cancelled += self.cancel(sources, position, &level.files);
                continue;
            }

            self.observer.level_started(position, level.files.len());
            let mut tasks: JoinSet<CompiledUnit> = JoinSet::new();
            let mut level_compiled = 0usize;
            let mut level_reused = 0usize;

            for (i, &file) in level.files.iter().enumerate() {
                if failed.load(Ordering::SeqCst) {
                    cancelled += self.cancel(sources, position, &level.files[i..]);
                    break;
                }

                let invocation = self.invocation(file, sources, resolution).await;

                let staleness = gate::check(
                    &invocation.source,
                    &invocation.object,
                    invocation.interface.as_ref().map(|i| i.path.as_path()),
                    invocation.references.iter().map(|(m, p)| (m, p.as_path())),
                );

                if staleness.is_up_to_date() {
                    debug!(source = %invocation.source, "up to date, reusing artifacts");
                    self.register(file, &invocation.object, invocation.interface.as_ref())
                        .await;
                    level_reused += 1;
                    self.observer.file_finished(&FileEvent {
                        file,
                        source: invocation.source,
                        level: position,
                        outcome: FileOutcome::UpToDate,
                        duration: Duration::ZERO,
                        exit_code: None,
                    });
                    continue;
                }

                debug!(source = %invocation.source, reason = %staleness, "needs compiling");

                // A sibling may have failed while we waited for a permit
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    failed.store(true, Ordering::SeqCst);
                    cancelled += self.cancel(sources, position, &level.files[i..]);
                    break;
                };
                if failed.load(Ordering::SeqCst) {
                    cancelled += self.cancel(sources, position, &level.files[i..]);
                    break;
                }

                level_compiled += 1;
                self.observer.file_started(&invocation.source);

                let driver = self.driver.clone();
                let observer = self.observer.clone();
                let objects = self.objects.clone();
                let interfaces = self.interfaces.clone();
                let failed = failed.clone();

                tasks.spawn(async move {
                    let _permit = permit;
                    let start = Instant::now();
                    let result = driver.compile(&invocation).await;
                    let duration = start.elapsed();

                    let exit_code = match &result {
                        CompileResult::Success { object, interface } => {
                            objects.lock().await.insert(file, object.clone());
                            if let (Some(output), Some(path)) = (&invocation.interface, interface) {
                                interfaces
                                    .lock()
                                    .await
                                    .insert(output.module.clone(), path.clone());
                            }
                            None
                        }
                        CompileResult::Failure { exit_code, .. } => {
                            failed.store(true, Ordering::SeqCst);
                            Some(*exit_code)
                        }
                    };

                    observer.file_finished(&FileEvent {
                        file,
                        source: invocation.source.clone(),
                        level: position,
                        outcome: if exit_code.is_none() {
                            FileOutcome::Compiled
                        } else {
                            FileOutcome::Failed
                        },
                        duration,
                        exit_code,
                    });

                    CompiledUnit {
                        source: invocation.source,
                        result,
                    }
                });
            }

            // Running siblings always finish, even after a failure or a
            // crashed worker
            let mut worker_error = None;
            while let Some(joined) = tasks.join_next().await {
                let unit = match joined {
                    Ok(unit) => unit,
                    Err(err) => {
                        warn!(error = %err, "compile worker did not finish");
                        failed.store(true, Ordering::SeqCst);
                        worker_error.get_or_insert(err);
                        continue;
                    }
                };
                if let CompileResult::Failure {
                    exit_code,
                    stdout,
                    stderr,
                } = unit.result
                {
                    warn!(source = %unit.source, exit_code, "compilation failed");
                    failures.push((unit.source, exit_code, stdout, stderr));
                }
            }
            if let Some(err) = worker_error {
                return Err(err.into());
            }

            compiled += level_compiled;
            reused += level_reused;
            info!(
                level = position,
                rank = level.index,
                compiled = level_compiled,
                reused = level_reused,
                "level finished"
            );
        }

        if !failures.is_empty() {
            let failed_count = failures.len();
            failures.sort_by(|a, b| a.0.cmp(&b.0));
            let (path, exit_code, stdout, stderr) = failures.swap_remove(0);
            return Err(BuildError::Compile {
                path,
                exit_code,
                stdout,
                stderr,
                failed: failed_count,
                cancelled,
            });
        }

        let objects = self.ordered_objects(levels).await;
        let outcome = self.link(objects, compiled, reused).await?;

        info!(
            compiled = outcome.compiled,
            reused = outcome.reused,
            executable = %outcome.executable,
            "build finished"
        );
        Ok(outcome)
    }

    /// Compile descriptor for `file`, with references to every interface in
    /// its closure that has been built or reused so far.
    async fn invocation(
        &self,
        file: FileId,
        sources: &SourceSet,
        resolution: &Resolution,
    ) -> CompileInvocation {
        let layout = &self.settings.layout;
        let source = sources.get(file);

        let references = {
            let interfaces = self.interfaces.lock().await;
            resolution
                .closure(file)
                .iter()
                .filter_map(|module| {
                    interfaces
                        .get(module)
                        .map(|path| (module.clone(), path.clone()))
                })
                .collect()
        };

        CompileInvocation {
            source: source.path.clone(),
            object: layout.object_path(&source.path),
            interface: source.exported_module.as_ref().map(|module| InterfaceOutput {
                module: module.clone(),
                path: layout.interface_path(module),
            }),
            references,
            flags: self.settings.flags.clone(),
        }
    }

    /// Make a reused file's artifacts visible to the link and later levels
    async fn register(&self, file: FileId, object: &Utf8Path, interface: Option<&InterfaceOutput>) {
        self.objects.lock().await.insert(file, object.to_owned());
        if let Some(interface) = interface {
            self.interfaces
                .lock()
                .await
                .insert(interface.module.clone(), interface.path.clone());
        }
    }

    /// Report `files` as never started
    fn cancel(&self, sources: &SourceSet, position: usize, files: &[FileId]) -> usize {
        for &file in files {
            self.observer.file_finished(&FileEvent {
                file,
                source: sources.get(file).path.clone(),
                level: position,
                outcome: FileOutcome::Cancelled,
                duration: Duration::ZERO,
                exit_code: None,
            });
        }
        files.len()
    }

    async fn ordered_objects(&self, levels: &[BuildLevel]) -> Vec<Utf8PathBuf> {
        let objects = self.objects.lock().await;
        levels
            .iter()
            .flat_map(|level| &level.files)
            .filter_map(|file| objects.get(file).cloned())
            .collect()
    }

    async fn link(
        &self,
        objects: Vec<Utf8PathBuf>,
        compiled: usize,
        reused: usize,
    ) -> Result<BuildOutcome, BuildError> {
        let invocation = LinkInvocation {
            objects,
            executable: self.settings.executable.clone(),
            flags: self.settings.link_flags.clone(),
        };

        info!(objects = invocation.objects.len(), executable = %invocation.executable, "linking");
        self.observer.link_started(&invocation.executable);
        let start = Instant::now();
        let result = self.driver.link(&invocation).await;
        self.observer.link_finished(result.is_success(), start.elapsed());

        match result {
            LinkResult::Success { executable } => Ok(BuildOutcome {
                objects: invocation.objects,
                executable,
                compiled,
                reused,
            }),
            LinkResult::Failure {
                exit_code,
                stdout,
                stderr,
            } => Err(BuildError::Link {
                executable: invocation.executable,
                exit_code,
                stdout,
                stderr,
            }),
        }
    }
}
