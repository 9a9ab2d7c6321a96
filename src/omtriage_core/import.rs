use crate::omtriage_core::error::{FileFailure, Result, TriageError};
use crate::omtriage_core::executor::{ExecutionReport, Executor, TransferMode, execute_plan};
use crate::omtriage_core::exif::MetadataProvider;
use crate::omtriage_core::group::{GroupingOptions, group};
use crate::omtriage_core::ledger::{LEDGER_FILE_NAME, Ledger};
use crate::omtriage_core::plan::{Action, PlanOptions, PlanSummary, build_plan};
use crate::omtriage_core::session::{DEFAULT_SESSION_GAP, build_sessions};
use crate::omtriage_core::workers::scan_files;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything that configures one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Hours between shots that start a new session.
    pub session_gap: f64,
    pub force_reimport: bool,
    pub dry_run: bool,
    /// Ledger location; defaults to a hidden file in the output directory.
    pub ledger_path: Option<PathBuf>,
    /// Scan worker count.
    pub jobs: usize,
    pub transfer_mode: TransferMode,
    pub grouping: GroupingOptions,
}

impl ImportOptions {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        ImportOptions {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            session_gap: DEFAULT_SESSION_GAP,
            force_reimport: false,
            dry_run: false,
            ledger_path: None,
            jobs: num_cpus::get(),
            transfer_mode: TransferMode::default(),
            grouping: GroupingOptions::default(),
        }
    }

    /// Reject invalid settings before any planning starts.
    pub fn validate(&self) -> Result<()> {
        if !self.session_gap.is_finite() || self.session_gap <= 0.0 {
            return Err(TriageError::Argument(format!(
                "--session-gap must be a positive number of hours, got {}",
                self.session_gap
            )));
        }
        if self.jobs == 0 {
            return Err(TriageError::Argument("--jobs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(LEDGER_FILE_NAME))
    }
}

/// One source file with the archive path the plan assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub action: Action,
}

/// Outcome of an import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub dry_run: bool,
    pub files_scanned: usize,
    pub items: usize,
    pub sessions: Vec<String>,
    pub unrecognized: usize,
    pub warnings: Vec<String>,
    pub plan: PlanSummary,
    pub planned: Vec<PlannedCopy>,
    pub execution: ExecutionReport,
    pub failures: Vec<FileFailure>,
}

impl ImportReport {
    /// Whether every planned item made it into the archive.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.execution.items_cancelled == 0
    }
}

impl std::fmt::Display for ImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} items in {} sessions: {} imported ({} files), {} duplicates skipped, {} failed",
            self.items,
            self.sessions.len(),
            self.execution.items_copied,
            self.execution.files_copied,
            self.plan.skip_duplicate,
            self.execution.items_failed
        )
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Make sure the output directory exists and accepts new files.
fn ensure_writable(dir: &Path) -> Result<()> {
    let not_writable = |e: std::io::Error| TriageError::OutputNotWritable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };
    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(".omtriage-write-test");
    fs::write(&probe, b"").map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;
    Ok(())
}

/// Ask a running import to stop after the items in flight.
///
/// Returns `false` if cancellation had already been requested.
pub fn request_cancel(cancel: &AtomicBool) -> bool {
    let first = !cancel.swap(true, Ordering::SeqCst);
    if first {
        log::warn!("Interrupted, finishing current items. Interrupt again to abort immediately.");
    }
    first
}

/// Import media from `options.input_dir` into `options.output_dir`.
///
/// Fatal problems (unreadable input, unwritable output, corrupt ledger,
/// invalid options) are returned before anything is copied. Per-file and
/// per-item problems end up in [`ImportReport::failures`].
pub fn run_import(
    options: &ImportOptions,
    provider: &dyn MetadataProvider,
    executor: &dyn Executor,
    cancel: &AtomicBool,
) -> Result<ImportReport> {
    options.validate()?;

    log::info!(
        "Starting import: {} -> {}",
        options.input_dir.display(),
        options.output_dir.display()
    );
    log::info!(
        "Settings: session gap {:.1}h, force reimport {}, dry run {}",
        options.session_gap,
        options.force_reimport,
        options.dry_run
    );

    if !options.input_dir.is_dir() {
        return Err(TriageError::InputNotReadable(options.input_dir.clone()));
    }

    let ledger_path = options.ledger_path();
    let (ledger, view) = if options.dry_run {
        (None, Ledger::load_existing(&ledger_path)?)
    } else {
        ensure_writable(&options.output_dir)?;
        if let Some(parent) = ledger_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let ledger = Ledger::open(&ledger_path)?;
        let view = ledger.load()?;
        let stats = ledger.stats()?;
        log::info!(
            "Import history {}: {} files over {} days",
            ledger_path.display(),
            stats.total_files,
            stats.unique_days
        );
        (Some(ledger), view)
    };
    if options.force_reimport {
        log::info!("Ignoring {} previously imported files (force reimport)", view.len());
    }

    log::info!("Phase 1: Scanning {}", options.input_dir.display());
    let scan_bar = ProgressBar::new(0).with_style(bar_style());
    scan_bar.set_message("Scanning files");
    let scanned = scan_files(&options.input_dir, provider, options.jobs, &scan_bar)?;
    scan_bar.finish_with_message("Scan complete");

    let mut report = ImportReport {
        dry_run: options.dry_run,
        files_scanned: scanned.files.len(),
        failures: scanned.failures,
        ..Default::default()
    };

    log::info!("Phase 2: Grouping and planning");
    let grouped = group(scanned.files, &options.grouping);
    report.items = grouped.items.len();
    report.unrecognized = grouped.unrecognized;
    report.warnings = grouped.warnings;

    let sessions = build_sessions(grouped.items, options.session_gap);
    report.sessions = sessions.iter().map(|s| s.label()).collect();
    for session in &sessions {
        log::info!(
            "  {} ({} items, {} files)",
            session.label(),
            session.items.len(),
            session.file_count()
        );
    }

    let plan_options = PlanOptions {
        output_root: options.output_dir.clone(),
        force_reimport: options.force_reimport,
        dry_run: options.dry_run,
    };
    let plan = build_plan(&sessions, &view, &plan_options);
    report.plan = plan.summary();
    report.planned = plan
        .entries
        .iter()
        .flat_map(|entry| {
            entry.files.iter().map(|f| PlannedCopy {
                source: f.file.path.clone(),
                destination: f.destination.clone(),
                action: entry.action,
            })
        })
        .collect();

    log::info!(
        "{} items to import, {} already imported",
        report.plan.copy + report.plan.skip_dry_run,
        report.plan.skip_duplicate
    );

    let Some(ledger) = ledger else {
        for planned in &report.planned {
            log::info!("[DRY RUN] {} -> {}", planned.source.display(), planned.destination.display());
        }
        log::info!("Dry run completed, no files were modified");
        return Ok(report);
    };

    log::info!("Phase 3: Copying files to {}", options.output_dir.display());
    let ledger = Mutex::new(ledger);
    let copy_bar = ProgressBar::new(0).with_style(bar_style());
    copy_bar.set_message("Copying files");
    report.execution = execute_plan(&plan, executor, &ledger, cancel, &copy_bar);
    copy_bar.finish_with_message("Copy complete");

    report.failures.append(&mut report.execution.failures);
    log::info!("Import finished: {}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::omtriage_core::executor::FsExecutor;
    use crate::omtriage_core::exif::FixedTimeProvider;
    use assert_fs::prelude::*;
    use time::macros::datetime;

    fn provider() -> FixedTimeProvider {
        FixedTimeProvider::new()
            .with("P1150001.ORF", datetime!(2024-01-15 10:30:00))
            .with("P1150001.JPG", datetime!(2024-01-15 10:30:00))
            .with("P1150002.MOV", datetime!(2024-01-15 10:35:00))
            .with("P1150003.JPG", datetime!(2024-01-15 15:30:00))
    }

    fn card() -> assert_fs::TempDir {
        let card = assert_fs::TempDir::new().unwrap();
        let dcim = card.child("DCIM/100OLYMP");
        dcim.child("P1150001.ORF").write_binary(b"orf-1").unwrap();
        dcim.child("P1150001.JPG").write_binary(b"jpg-1").unwrap();
        dcim.child("P1150002.MOV").write_binary(b"mov-2").unwrap();
        dcim.child("P1150003.JPG").write_binary(b"jpg-3").unwrap();
        card
    }

    fn run(options: &ImportOptions) -> Result<ImportReport> {
        run_import(options, &provider(), &FsExecutor::default(), &AtomicBool::new(false))
    }

    #[test]
    fn test_validate_rejects_bad_gap() {
        let mut options = ImportOptions::new("/in", "/out");
        options.session_gap = 0.0;
        assert!(matches!(options.validate(), Err(TriageError::Argument(_))));
        options.session_gap = -1.0;
        assert!(options.validate().is_err());
        options.session_gap = f64::NAN;
        assert!(options.validate().is_err());
        options.session_gap = 0.5;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_default_ledger_path() {
        let options = ImportOptions::new("/in", "/out");
        assert_eq!(options.ledger_path(), PathBuf::from("/out").join(LEDGER_FILE_NAME));
    }

    #[test]
    fn test_import_then_reimport_copies_nothing() {
        let card = card();
        let out = assert_fs::TempDir::new().unwrap();
        let options = ImportOptions::new(card.path(), out.path());

        let first = run(&options).unwrap();
        assert_eq!(first.sessions, vec!["2024-01-15-AM", "2024-01-15-PM"]);
        assert_eq!(first.execution.items_copied, 3);
        assert!(first.is_clean());
        out.child("2024-01-15-AM/images/P1150001.ORF").assert("orf-1");
        out.child("2024-01-15-AM/videos/P1150002.MOV").assert("mov-2");
        out.child("2024-01-15-PM/images/P1150003.JPG").assert("jpg-3");
        out.child(LEDGER_FILE_NAME).assert(predicates::path::exists());

        let second = run(&options).unwrap();
        assert_eq!(second.execution.items_copied, 0);
        assert_eq!(second.plan.skip_duplicate, 3);
    }

    #[test]
    fn test_dry_run_plans_same_paths_and_writes_nothing() {
        let card = card();
        let out = assert_fs::TempDir::new().unwrap();
        let target = out.child("archive");

        let mut dry = ImportOptions::new(card.path(), target.path());
        dry.dry_run = true;
        let dry_report = run(&dry).unwrap();
        target.assert(predicates::path::missing());
        assert!(dry_report.planned.iter().all(|p| p.action == Action::SkipDryRun));

        let real = ImportOptions::new(card.path(), target.path());
        let real_report = run(&real).unwrap();

        let paths = |r: &ImportReport| -> Vec<PathBuf> {
            r.planned.iter().map(|p| p.destination.clone()).collect()
        };
        assert_eq!(paths(&dry_report), paths(&real_report));
    }

    #[test]
    fn test_force_reimport_plans_copies() {
        let card = card();
        let out = assert_fs::TempDir::new().unwrap();
        let options = ImportOptions::new(card.path(), out.path());
        run(&options).unwrap();

        let mut forced = options.clone();
        forced.force_reimport = true;
        let report = run(&forced).unwrap();
        assert_eq!(report.plan.skip_duplicate, 0);
        assert_eq!(report.plan.copy, 3);
        // Identical files already in place count as imported.
        assert_eq!(report.execution.items_copied, 3);
        assert_eq!(report.execution.bytes_copied, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_renamed_source_detected_as_duplicate() {
        let card = card();
        let out = assert_fs::TempDir::new().unwrap();
        let options = ImportOptions::new(card.path(), out.path());
        run(&options).unwrap();

        let moved = assert_fs::TempDir::new().unwrap();
        moved.child("elsewhere/holiday.jpg").write_binary(b"jpg-3").unwrap();
        let report = run(&ImportOptions::new(moved.path(), out.path())).unwrap();
        assert_eq!(report.plan.skip_duplicate, 1);
        assert_eq!(report.execution.items_copied, 0);
    }

    #[test]
    fn test_undated_file_still_imported() {
        let card = assert_fs::TempDir::new().unwrap();
        card.child("DCIM/UNDATED.JPG").write_binary(b"no exif").unwrap();
        let out = assert_fs::TempDir::new().unwrap();

        let report = run(&ImportOptions::new(card.path(), out.path())).unwrap();
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.execution.items_copied, 1);
        assert!(report.planned[0]
            .destination
            .ends_with(PathBuf::from("images").join("UNDATED.JPG")));
    }

    #[test]
    fn test_request_cancel_only_once() {
        let cancel = AtomicBool::new(false);
        assert!(request_cancel(&cancel));
        assert!(cancel.load(Ordering::SeqCst));
        assert!(!request_cancel(&cancel));
    }

    #[test]
    fn test_cancelled_import_copies_and_records_nothing() {
        let card = card();
        let out = assert_fs::TempDir::new().unwrap();
        let options = ImportOptions::new(card.path(), out.path());
        let cancel = AtomicBool::new(false);
        request_cancel(&cancel);

        let report = run_import(&options, &provider(), &FsExecutor::default(), &cancel).unwrap();
        assert_eq!(report.execution.items_cancelled, 3);
        assert_eq!(report.execution.items_copied, 0);
        assert!(!report.is_clean());
        assert!(Ledger::load_existing(&options.ledger_path()).unwrap().is_empty());
        out.child("2024-01-15-AM").assert(predicates::path::missing());
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let out = assert_fs::TempDir::new().unwrap();
        let options = ImportOptions::new(out.child("no-card").path(), out.path());
        assert!(matches!(run(&options), Err(TriageError::InputNotReadable(_))));
    }

    #[test]
    fn test_corrupt_ledger_aborts_before_copying() {
        let card = card();
        let out = assert_fs::TempDir::new().unwrap();
        out.child(LEDGER_FILE_NAME).write_binary(&[0x5a; 4096]).unwrap();

        let err = run(&ImportOptions::new(card.path(), out.path())).unwrap_err();
        assert!(matches!(err, TriageError::CorruptLedger { .. }));
        out.child("2024-01-15-AM").assert(predicates::path::missing());
    }

    #[test]
    fn test_ledger_filled_after_import() {
        let card = card();
        let out = assert_fs::TempDir::new().unwrap();
        let options = ImportOptions::new(card.path(), out.path());
        assert!(Ledger::load_existing(&options.ledger_path()).unwrap().is_empty());
        run(&options).unwrap();
        assert_eq!(Ledger::load_existing(&options.ledger_path()).unwrap().len(), 4);
    }
}
