//! Build reports for kiln
//!
//! Every build records what happened to each source file (compiled, reused,
//! failed or never started), how long it took, and how the link went. The
//! report is written to `.kiln/runs/<run-id>.json` and a `latest` file points
//! at the newest one, which is what `kiln explain` reads.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use facet::Facet;
use thiserror::Error;
use tracing::debug;

/// Current report schema version.
/// Bump when the schema changes in backwards-incompatible ways.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Directory, relative to the project root, holding kiln's own state
pub const STATE_DIR: &str = ".kiln";

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// =============================================================================
// RUN ID
// =============================================================================

/// Crockford base32, without I, L, O and U
const ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const RUN_ID_LEN: usize = 26;

/// A time-ordered run identifier.
///
/// 26 Crockford base32 characters: 10 encode the start time in milliseconds,
/// 16 come from the clock's nanoseconds mixed with the process id. Sorting
/// ids lexicographically sorts runs chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Facet)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut chars = [0u8; RUN_ID_LEN];
        let mut time = now.as_millis() as u64;
        for slot in chars[..10].iter_mut().rev() {
            *slot = ALPHABET[(time & 0x1f) as usize];
            time >>= 5;
        }

        let mut entropy = now.as_nanos() ^ (std::process::id() as u128).rotate_left(40);
        for slot in chars[10..].iter_mut() {
            *slot = ALPHABET[(entropy & 0x1f) as usize];
            entropy >>= 5;
        }

        Self(chars.iter().map(|&c| c as char).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a string is not a valid run id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run id: {0:?}")]
pub struct InvalidRunId(pub String);

impl FromStr for RunId {
    type Err = InvalidRunId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == RUN_ID_LEN && s.bytes().all(|b| ALPHABET.contains(&b)) {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidRunId(s.to_owned()))
        }
    }
}

// =============================================================================
// BUILD REPORT
// =============================================================================

/// Complete report for a single build invocation.
#[derive(Debug, Clone, Facet)]
pub struct BuildReport {
    /// Schema version for forward compatibility
    pub schema: u32,
    pub run_id: RunId,
    /// When the build started (unix ms)
    pub started_at_unix_ms: u64,
    /// When the build finished (unix ms)
    pub ended_at_unix_ms: u64,

    /// Project root; file paths are relative to it when possible
    pub project_root: String,
    /// Configurations in effect, e.g. "debug,analyze"
    pub configuration: String,
    pub compiler: CompilerRecord,

    /// Number of levels in the schedule
    pub levels: u32,
    /// One entry per source file, in the order the outcomes arrived
    pub files: Vec<FileReport>,
    /// Absent when the build stopped before linking
    pub link: Option<LinkReport>,

    pub success: bool,
    /// Error message if the build failed
    pub error: Option<String>,
}

/// Compiler that ran the build
#[derive(Debug, Clone, Default, Facet)]
pub struct CompilerRecord {
    pub name: String,
    pub version: String,
    pub executable: String,
}

/// What happened to one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
#[repr(u8)]
pub enum FileStatus {
    Compiled,
    /// Artifacts were newer than every input and got reused
    UpToDate,
    Failed,
    /// Never started because another file failed first
    Cancelled,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FileStatus::Compiled => "compiled",
            FileStatus::UpToDate => "up to date",
            FileStatus::Failed => "failed",
            FileStatus::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Facet)]
pub struct FileReport {
    pub source: String,
    /// Position of the file's level in the schedule
    pub level: u32,
    pub status: FileStatus,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Facet)]
pub struct LinkReport {
    pub executable: String,
    pub success: bool,
    pub duration_ms: u64,
}

impl BuildReport {
    /// Start a report for a build that is about to run.
    pub fn new(project_root: &Utf8Path, configuration: String, compiler: CompilerRecord) -> Self {
        Self {
            schema: REPORT_SCHEMA_VERSION,
            run_id: RunId::new(),
            started_at_unix_ms: unix_ms(),
            ended_at_unix_ms: 0,
            project_root: project_root.to_string(),
            configuration,
            compiler,
            levels: 0,
            files: Vec::new(),
            link: None,
            success: false,
            error: None,
        }
    }

    /// Record the end of the build.
    pub fn finalize(&mut self, success: bool, error: Option<String>) {
        self.ended_at_unix_ms = unix_ms();
        self.success = success;
        self.error = error;
    }

    pub fn add_file(&mut self, file: FileReport) {
        self.files.push(file);
    }

    /// Total build duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.ended_at_unix_ms.saturating_sub(self.started_at_unix_ms)
    }

    /// Number of files that ended with `status`
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// Files sorted by level, then path
    pub fn files_by_level(&self) -> Vec<&FileReport> {
        let mut files: Vec<_> = self.files.iter().collect();
        files.sort_by(|a, b| (a.level, &a.source).cmp(&(b.level, &b.source)));
        files
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse report {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },
}

fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Reads and writes reports under `<project>/.kiln/runs/`.
pub struct ReportStore {
    runs_dir: Utf8PathBuf,
}

impl ReportStore {
    pub fn new(project_root: &Utf8Path) -> Self {
        Self {
            runs_dir: project_root.join(STATE_DIR).join("runs"),
        }
    }

    pub fn runs_dir(&self) -> &Utf8Path {
        &self.runs_dir
    }

    fn report_path(&self, run_id: &RunId) -> Utf8PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }

    /// Write `report` and make it the latest run.
    pub fn save(&self, report: &BuildReport) -> Result<Utf8PathBuf, ReportError> {
        std::fs::create_dir_all(&self.runs_dir).map_err(io_error(&self.runs_dir))?;

        let json = facet_json::to_string(report);
        let path = self.report_path(&report.run_id);

        // Write then rename so a reader never sees half a report
        let tmp = self.runs_dir.join(format!("{}.json.tmp", report.run_id));
        std::fs::write(&tmp, json).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_error(&path))?;

        let latest = self.runs_dir.join("latest");
        std::fs::write(&latest, report.run_id.as_str()).map_err(io_error(&latest))?;

        debug!(run_id = %report.run_id, path = %path, "saved build report");
        Ok(path)
    }

    pub fn load(&self, run_id: &RunId) -> Result<Option<BuildReport>, ReportError> {
        let path = self.report_path(run_id);
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        let report = facet_json::from_str(&json).map_err(|e| ReportError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(report))
    }

    /// Run id of the newest report, if any.
    ///
    /// A corrupt `latest` pointer is treated as missing.
    pub fn latest_run_id(&self) -> Result<Option<RunId>, ReportError> {
        let latest = self.runs_dir.join("latest");
        if !latest.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&latest).map_err(io_error(&latest))?;
        Ok(content.trim().parse().ok())
    }

    pub fn load_latest(&self) -> Result<Option<BuildReport>, ReportError> {
        match self.latest_run_id()? {
            Some(run_id) => self.load(&run_id),
            None => Ok(None),
        }
    }

    /// All stored run ids, oldest first.
    pub fn list_runs(&self) -> Result<Vec<RunId>, ReportError> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = self.runs_dir.read_dir_utf8().map_err(io_error(&self.runs_dir))?;
        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&self.runs_dir))?;
            let path = entry.path();
            if path.extension() != Some("json") {
                continue;
            }
            if let Some(run_id) = path.file_stem().and_then(|stem| stem.parse::<RunId>().ok()) {
                runs.push(run_id);
            }
        }

        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> BuildReport {
        BuildReport::new(
            Utf8Path::new("/work/app"),
            "debug".to_string(),
            CompilerRecord {
                name: "clang".to_string(),
                version: "18.1".to_string(),
                executable: "/usr/bin/clang++".to_string(),
            },
        )
    }

    fn file(source: &str, level: u32, status: FileStatus) -> FileReport {
        FileReport {
            source: source.to_string(),
            level,
            status,
            duration_ms: 12,
            exit_code: (status == FileStatus::Failed).then_some(1),
        }
    }

    #[test]
    fn run_ids_are_valid_and_ordered() {
        let first = RunId::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = RunId::new();

        assert_eq!(first.as_str().len(), RUN_ID_LEN);
        assert_eq!(first.as_str().parse::<RunId>(), Ok(first.clone()));
        assert!(second > first);
    }

    #[test]
    fn run_id_rejects_foreign_characters() {
        assert!("short".parse::<RunId>().is_err());
        assert!("0123456789ABCDEFGHJKMNPQRI".parse::<RunId>().is_err());
        assert!("0123456789abcdefghjkmnpqrs".parse::<RunId>().is_err());
    }

    #[test]
    fn counts_and_ordering() {
        let mut report = report();
        report.add_file(file("src/main.cpp", 2, FileStatus::Cancelled));
        report.add_file(file("src/util.ixx", 1, FileStatus::Failed));
        report.add_file(file("src/core.ixx", 0, FileStatus::UpToDate));
        report.add_file(file("src/aux.ixx", 1, FileStatus::Compiled));

        assert_eq!(report.count(FileStatus::Compiled), 1);
        assert_eq!(report.count(FileStatus::UpToDate), 1);
        assert_eq!(report.count(FileStatus::Failed), 1);
        assert_eq!(report.count(FileStatus::Cancelled), 1);

        let order: Vec<_> = report.files_by_level().iter().map(|f| f.source.as_str()).collect();
        assert_eq!(
            order,
            ["src/core.ixx", "src/aux.ixx", "src/util.ixx", "src/main.cpp"]
        );
    }

    #[test]
    fn finalize_records_outcome() {
        let mut report = report();
        report.finalize(false, Some("compilation of src/util.ixx failed".to_string()));

        assert!(!report.success);
        assert!(report.ended_at_unix_ms >= report.started_at_unix_ms);
        assert_eq!(report.error.as_deref(), Some("compilation of src/util.ixx failed"));
    }

    #[test_log::test]
    fn save_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let store = ReportStore::new(root);

        assert!(store.load_latest().unwrap().is_none());
        assert!(store.list_runs().unwrap().is_empty());

        let mut first = report();
        first.levels = 3;
        first.add_file(file("src/core.ixx", 0, FileStatus::Compiled));
        first.link = Some(LinkReport {
            executable: "kiln.out/clang/debug/app".to_string(),
            success: true,
            duration_ms: 40,
        });
        first.finalize(true, None);
        let path = store.save(&first).unwrap();
        assert!(path.starts_with(root.join(".kiln/runs")));

        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut second = report();
        second.add_file(file("src/core.ixx", 0, FileStatus::Failed));
        second.finalize(false, Some("boom".to_string()));
        store.save(&second).unwrap();

        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest.run_id, second.run_id);
        assert!(!latest.success);
        assert_eq!(latest.files[0].status, FileStatus::Failed);
        assert_eq!(latest.files[0].exit_code, Some(1));
        assert!(latest.link.is_none());

        let loaded = store.load(&first.run_id).unwrap().unwrap();
        assert_eq!(loaded.levels, 3);
        assert_eq!(loaded.compiler.name, "clang");
        assert!(loaded.link.unwrap().success);

        assert_eq!(store.list_runs().unwrap(), vec![first.run_id, second.run_id]);
    }

    #[test]
    fn corrupt_latest_pointer_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let store = ReportStore::new(root);

        std::fs::create_dir_all(store.runs_dir()).unwrap();
        std::fs::write(store.runs_dir().join("latest"), "not a run id").unwrap();
        assert!(store.load_latest().unwrap().is_none());
    }

    #[test]
    fn unparsable_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let store = ReportStore::new(root);
        let run_id = RunId::new();

        std::fs::create_dir_all(store.runs_dir()).unwrap();
        std::fs::write(store.runs_dir().join(format!("{run_id}.json")), "{").unwrap();
        assert!(matches!(
            store.load(&run_id),
            Err(ReportError::Parse { .. })
        ));
    }
}
