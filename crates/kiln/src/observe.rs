//! Build observers used by the CLI
//!
//! - [`Progress`]: an indicatif bar on stderr with the files being compiled
//! - [`ReportRecorder`]: fills the [`BuildReport`] saved under `.kiln/runs/`
//! - [`Observers`]: fans events out to several observers

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use kiln_build::{BuildObserver, FileEvent, FileOutcome};
use kiln_report::{BuildReport, FileReport, FileStatus, LinkReport};
use owo_colors::OwoColorize;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `path` relative to `root` when it lies inside it
fn display_path(root: &Utf8Path, path: &Utf8Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string()
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Number of in-flight files named in the progress message
const SHOWN_ACTIVE: usize = 3;

/// Progress bar over every file of the build.
///
/// Hidden automatically when stderr is not a terminal.
pub struct Progress {
    bar: ProgressBar,
    root: Utf8PathBuf,
    active: Mutex<BTreeSet<String>>,
}

impl Progress {
    pub fn new(root: &Utf8Path) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner} {bar:40.cyan/blue} {pos}/{len} [{msg}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            root: root.to_owned(),
            active: Mutex::new(BTreeSet::new()),
        }
    }

    fn refresh(&self, active: &BTreeSet<String>) {
        let mut names: Vec<&str> = active.iter().take(SHOWN_ACTIVE).map(String::as_str).collect();
        let more = active.len().saturating_sub(SHOWN_ACTIVE);
        let more = format!("+{more}");
        if active.len() > SHOWN_ACTIVE {
            names.push(&more);
        }
        self.bar.set_message(names.join(", "));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BuildObserver for Progress {
    fn build_started(&self, files: usize, _levels: usize) {
        self.bar.set_length(files as u64);
    }

    fn file_started(&self, source: &Utf8Path) {
        let mut active = lock(&self.active);
        active.insert(display_path(&self.root, source));
        self.refresh(&active);
    }

    fn file_finished(&self, event: &FileEvent) {
        let name = display_path(&self.root, &event.source);
        let mut active = lock(&self.active);
        active.remove(&name);
        self.refresh(&active);
        drop(active);

        self.bar.inc(1);
        match event.outcome {
            FileOutcome::Compiled => {
                self.bar
                    .println(format!("{:>12} {name}", "Compiled".green().bold()));
            }
            FileOutcome::Failed => {
                self.bar.println(format!("{:>12} {name}", "Failed".red().bold()));
            }
            FileOutcome::UpToDate | FileOutcome::Cancelled => {}
        }
    }

    fn link_started(&self, executable: &Utf8Path) {
        self.bar
            .set_message(format!("linking {}", display_path(&self.root, executable)));
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// Records build events into a [`BuildReport`]
pub struct ReportRecorder {
    root: Utf8PathBuf,
    report: Mutex<BuildReport>,
    linking: Mutex<Option<Utf8PathBuf>>,
}

impl ReportRecorder {
    pub fn new(root: &Utf8Path, report: BuildReport) -> Self {
        Self {
            root: root.to_owned(),
            report: Mutex::new(report),
            linking: Mutex::new(None),
        }
    }

    /// The report as recorded so far
    pub fn snapshot(&self) -> BuildReport {
        lock(&self.report).clone()
    }
}

fn file_status(outcome: FileOutcome) -> FileStatus {
    match outcome {
        FileOutcome::Compiled => FileStatus::Compiled,
        FileOutcome::UpToDate => FileStatus::UpToDate,
        FileOutcome::Failed => FileStatus::Failed,
        FileOutcome::Cancelled => FileStatus::Cancelled,
    }
}

impl BuildObserver for ReportRecorder {
    fn build_started(&self, _files: usize, levels: usize) {
        lock(&self.report).levels = levels as u32;
    }

    fn file_finished(&self, event: &FileEvent) {
        lock(&self.report).add_file(FileReport {
            source: display_path(&self.root, &event.source),
            level: event.level as u32,
            status: file_status(event.outcome),
            duration_ms: event.duration.as_millis() as u64,
            exit_code: event.exit_code,
        });
    }

    fn link_started(&self, executable: &Utf8Path) {
        *lock(&self.linking) = Some(executable.to_owned());
    }

    fn link_finished(&self, success: bool, duration: Duration) {
        let executable = lock(&self.linking).take().unwrap_or_default();
        lock(&self.report).link = Some(LinkReport {
            executable: display_path(&self.root, &executable),
            success,
            duration_ms: duration.as_millis() as u64,
        });
    }
}

// =============================================================================
// FAN-OUT
// =============================================================================

/// Forwards every event to each observer in order
pub struct Observers(pub Vec<Arc<dyn BuildObserver>>);

impl BuildObserver for Observers {
    fn build_started(&self, files: usize, levels: usize) {
        self.0.iter().for_each(|o| o.build_started(files, levels));
    }

    fn level_started(&self, position: usize, files: usize) {
        self.0.iter().for_each(|o| o.level_started(position, files));
    }

    fn file_started(&self, source: &Utf8Path) {
        self.0.iter().for_each(|o| o.file_started(source));
    }

    fn file_finished(&self, event: &FileEvent) {
        self.0.iter().for_each(|o| o.file_finished(event));
    }

    fn link_started(&self, executable: &Utf8Path) {
        self.0.iter().for_each(|o| o.link_started(executable));
    }

    fn link_finished(&self, success: bool, duration: Duration) {
        self.0.iter().for_each(|o| o.link_finished(success, duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_report::CompilerRecord;
    use kiln_scan::{SourceFile, SourceSet, scan_source};

    fn event(source: &str, level: usize, outcome: FileOutcome) -> FileEvent {
        let mut set = SourceSet::new("/p");
        let file = set.push(SourceFile::new(source, scan_source(Utf8Path::new(source), "")));
        FileEvent {
            file,
            source: Utf8PathBuf::from(source),
            level,
            outcome,
            duration: Duration::from_millis(7),
            exit_code: (outcome == FileOutcome::Failed).then_some(2),
        }
    }

    #[test]
    fn recorder_fills_the_report() {
        let root = Utf8Path::new("/p");
        let report = BuildReport::new(root, "debug".to_string(), CompilerRecord::default());
        let recorder = Arc::new(ReportRecorder::new(root, report));
        let observers = Observers(vec![recorder.clone() as Arc<dyn BuildObserver>]);

        observers.build_started(3, 2);
        observers.file_finished(&event("/p/src/core.ixx", 0, FileOutcome::UpToDate));
        observers.file_finished(&event("/p/src/main.cpp", 1, FileOutcome::Failed));
        observers.file_finished(&event("/elsewhere/extra.cpp", 1, FileOutcome::Cancelled));
        observers.link_started(Utf8Path::new("/p/kiln.out/clang/debug/app"));
        observers.link_finished(true, Duration::from_millis(30));

        let report = recorder.snapshot();
        assert_eq!(report.levels, 2);
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.files[0].source, "src/core.ixx");
        assert_eq!(report.files[0].status, FileStatus::UpToDate);
        assert_eq!(report.files[1].status, FileStatus::Failed);
        assert_eq!(report.files[1].exit_code, Some(2));
        assert_eq!(report.files[1].duration_ms, 7);
        assert_eq!(report.files[2].source, "/elsewhere/extra.cpp");

        let link = report.link.unwrap();
        assert_eq!(link.executable, "kiln.out/clang/debug/app");
        assert!(link.success);
        assert_eq!(link.duration_ms, 30);
    }
}
