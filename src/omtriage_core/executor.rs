use crate::omtriage_core::error::{CopyFailures, FailurePhase, FileFailure};
use crate::omtriage_core::fingerprint::{Fingerprint, hash_file};
use crate::omtriage_core::ledger::{Ledger, LedgerEntry};
use crate::omtriage_core::plan::{Plan, PlanEntry};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;

/// Suffix of the temporary file a copy is written to before being renamed.
const PARTIAL_SUFFIX: &str = ".omtriage-part";

/// How files are placed in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Copy,
    /// Hard-link when source and archive share a filesystem, copy otherwise.
    Hardlink,
}

/// Result of a successful [`Executor::copy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Written,
    /// The destination already held identical content; nothing was written.
    AlreadyPresent,
}

/// Filesystem side of an import.
pub trait Executor: Sync {
    fn ensure_directory(&self, path: &Path) -> io::Result<()>;
    /// Place `source`, whose content hashes to `identity`, at `destination`.
    fn copy(&self, source: &Path, destination: &Path, identity: &Fingerprint) -> io::Result<CopyOutcome>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    /// Remove a directory if it is empty.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// Executor that works on the real filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsExecutor {
    mode: TransferMode,
}

impl FsExecutor {
    pub fn new(mode: TransferMode) -> Self {
        FsExecutor { mode }
    }

    fn copy_verified(source: &Path, destination: &Path) -> io::Result<()> {
        let expected = fs::metadata(source)?.len();
        let mut partial = destination.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let result = fs::copy(source, &partial).and_then(|written| {
            if written != expected {
                return Err(io::Error::other(format!(
                    "short copy: wrote {} of {} bytes",
                    written, expected
                )));
            }
            fs::rename(&partial, destination)
        });

        if result.is_err() && partial.exists() {
            if let Err(e) = fs::remove_file(&partial) {
                log::warn!("Could not remove partial copy {}: {}", partial.display(), e);
            }
        }
        result
    }
}

impl Executor for FsExecutor {
    fn ensure_directory(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn copy(&self, source: &Path, destination: &Path, identity: &Fingerprint) -> io::Result<CopyOutcome> {
        if destination.exists() {
            // Never overwrite; identical content means an earlier run already placed it.
            if hash_file(destination)? == *identity {
                log::debug!("{} already in place", destination.display());
                return Ok(CopyOutcome::AlreadyPresent);
            }
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists with different content", destination.display()),
            ));
        }

        if self.mode == TransferMode::Hardlink {
            match fs::hard_link(source, destination) {
                Ok(()) => return Ok(CopyOutcome::Written),
                Err(e) => log::debug!(
                    "Hard link {} failed ({}), copying instead",
                    destination.display(),
                    e
                ),
            }
        }

        Self::copy_verified(source, destination)?;
        Ok(CopyOutcome::Written)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }
}

/// Totals from executing a plan.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub items_copied: usize,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub items_failed: usize,
    pub items_cancelled: usize,
    pub failures: Vec<FileFailure>,
}

enum ItemOutcome {
    Copied { files: usize, bytes: u64, failures: Vec<FileFailure> },
    Failed { failures: Vec<FileFailure>, created_dirs: Vec<PathBuf> },
    Cancelled,
}

/// A failed item after its written files were removed.
struct RolledBack {
    failures: CopyFailures,
    /// Directories that did not exist before this item ran.
    created_dirs: Vec<PathBuf>,
}

/// Directories on the way to `dirs` that do not exist yet.
fn missing_dirs<'a>(dirs: impl IntoIterator<Item = &'a Path>) -> Vec<PathBuf> {
    let mut missing = BTreeSet::new();
    for dir in dirs {
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() || ancestor.exists() {
                break;
            }
            missing.insert(ancestor.to_path_buf());
        }
    }
    missing.into_iter().collect()
}

/// Remove the given directories if they ended up empty, deepest first.
fn remove_empty_dirs(executor: &dyn Executor, dirs: Vec<PathBuf>) {
    let mut dirs: Vec<PathBuf> = dirs.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        match executor.remove_dir(&dir) {
            Ok(()) => log::debug!("Removed empty directory {}", dir.display()),
            Err(e) => log::debug!("Keeping directory {}: {}", dir.display(), e),
        }
    }
}

/// Copy every file of one entry, removing what was written if any file fails.
fn copy_item(entry: &PlanEntry, executor: &dyn Executor) -> Result<u64, RolledBack> {
    let mut failures = CopyFailures::new();
    let created_dirs = missing_dirs(entry.destination_dirs());

    for dir in entry.destination_dirs() {
        if let Err(e) = executor.ensure_directory(dir) {
            let source = entry.files.first().map(|f| f.file.path.clone()).unwrap_or_default();
            failures.add(source, dir.to_path_buf(), e);
            return Err(RolledBack { failures, created_dirs });
        }
    }

    let mut written: Vec<&Path> = Vec::new();
    let mut bytes = 0;
    for planned in &entry.files {
        match executor.copy(&planned.file.path, &planned.destination, &planned.file.fingerprint) {
            Ok(CopyOutcome::Written) => {
                written.push(&planned.destination);
                bytes += planned.file.size;
            }
            Ok(CopyOutcome::AlreadyPresent) => {}
            Err(e) => {
                failures.add(planned.file.path.clone(), planned.destination.clone(), e);
                break;
            }
        }
    }

    if failures.is_empty() {
        return Ok(bytes);
    }

    for path in written {
        if let Err(e) = executor.remove(path) {
            log::warn!(
                "Could not remove partially imported {}: {}. It is left orphaned and not recorded.",
                path.display(),
                e
            );
        }
    }
    Err(RolledBack { failures, created_dirs })
}

fn ledger_entries(entry: &PlanEntry, imported_at: OffsetDateTime) -> Vec<LedgerEntry> {
    entry
        .files
        .iter()
        .map(|planned| LedgerEntry {
            identity: planned.file.fingerprint.clone(),
            source_path: planned.file.relative_path.clone(),
            imported_at,
            file_size: Some(planned.file.size),
            capture_time: planned.file.capture_time,
        })
        .collect()
}

fn execute_entry(
    entry: &PlanEntry,
    executor: &dyn Executor,
    ledger: &Mutex<Ledger>,
    cancel: &AtomicBool,
) -> ItemOutcome {
    if cancel.load(Ordering::SeqCst) {
        return ItemOutcome::Cancelled;
    }

    let bytes = match copy_item(entry, executor) {
        Ok(bytes) => bytes,
        Err(rolled_back) => {
            log::error!("Failed to import {}", entry.item.display_name());
            return ItemOutcome::Failed {
                failures: rolled_back
                    .failures
                    .failures
                    .into_iter()
                    .map(|f| FileFailure {
                        phase: FailurePhase::Copy,
                        path: f.source,
                        message: format!("-> {}: {}", f.destination.display(), f.error),
                    })
                    .collect(),
                created_dirs: rolled_back.created_dirs,
            };
        }
    };

    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let entries = ledger_entries(entry, now);
    let recorded = ledger
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .record_item(&entries);

    let failures = match recorded {
        Ok(_) => Vec::new(),
        Err(e) => {
            log::error!(
                "{} was copied but could not be recorded in the ledger: {}",
                entry.item.display_name(),
                e
            );
            vec![FileFailure {
                phase: FailurePhase::Record,
                path: entry.item.directory.join(&entry.item.key),
                message: e.to_string(),
            }]
        }
    };

    ItemOutcome::Copied {
        files: entry.files.len(),
        bytes,
        failures,
    }
}

/// Execute the copy entries of a plan, items in parallel.
///
/// Files of one item are copied in order; an item is recorded in the ledger
/// only after all of its files are in place. Setting `cancel` stops work
/// between items.
pub fn execute_plan(
    plan: &Plan,
    executor: &dyn Executor,
    ledger: &Mutex<Ledger>,
    cancel: &AtomicBool,
    progress: &ProgressBar,
) -> ExecutionReport {
    let copies: Vec<&PlanEntry> = plan.copies().collect();
    progress.set_length(copies.len() as u64);

    let outcomes: Vec<ItemOutcome> = copies
        .par_iter()
        .map(|entry| {
            let outcome = execute_entry(entry, executor, ledger, cancel);
            progress.inc(1);
            outcome
        })
        .collect();

    let mut report = ExecutionReport::default();
    let mut rolled_back_dirs = Vec::new();
    for outcome in outcomes {
        match outcome {
            ItemOutcome::Copied {
                files,
                bytes,
                failures,
            } => {
                report.items_copied += 1;
                report.files_copied += files;
                report.bytes_copied += bytes;
                report.failures.extend(failures);
            }
            ItemOutcome::Failed {
                failures,
                created_dirs,
            } => {
                report.items_failed += 1;
                report.failures.extend(failures);
                rolled_back_dirs.extend(created_dirs);
            }
            ItemOutcome::Cancelled => report.items_cancelled += 1,
        }
    }

    // Shared session folders stay as long as another item filled them.
    remove_empty_dirs(executor, rolled_back_dirs);

    if report.items_cancelled > 0 {
        log::warn!("{} items were not imported because the run was cancelled", report.items_cancelled);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::omtriage_core::exif::FixedTimeProvider;
    use crate::omtriage_core::group::{GroupingOptions, group};
    use crate::omtriage_core::ledger::LedgerView;
    use crate::omtriage_core::plan::{PlanOptions, build_plan};
    use crate::omtriage_core::session::{Session, build_sessions};
    use crate::omtriage_core::workers::scan_files;
    use assert_fs::prelude::*;
    use time::macros::datetime;

    /// Executor that fails every copy whose destination name contains `needle`.
    struct FailingExecutor {
        inner: FsExecutor,
        needle: &'static str,
    }

    impl Executor for FailingExecutor {
        fn ensure_directory(&self, path: &Path) -> io::Result<()> {
            self.inner.ensure_directory(path)
        }

        fn copy(&self, source: &Path, destination: &Path, identity: &Fingerprint) -> io::Result<CopyOutcome> {
            if destination.to_string_lossy().contains(self.needle) {
                return Err(io::Error::other("disk full"));
            }
            self.inner.copy(source, destination, identity)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            self.inner.remove(path)
        }

        fn remove_dir(&self, path: &Path) -> io::Result<()> {
            self.inner.remove_dir(path)
        }
    }

    fn card_sessions(card: &assert_fs::TempDir) -> Vec<Session> {
        card.child("DCIM/P1.JPG").write_binary(b"jpeg one").unwrap();
        card.child("DCIM/P1.ORF").write_binary(b"raw one").unwrap();
        card.child("DCIM/P2.JPG").write_binary(b"jpeg two").unwrap();

        let provider = FixedTimeProvider::new()
            .with("P1.JPG", datetime!(2024-01-15 10:30:00))
            .with("P1.ORF", datetime!(2024-01-15 10:30:00))
            .with("P2.JPG", datetime!(2024-01-15 10:40:00));
        let scanned = scan_files(card.path(), &provider, 2, &ProgressBar::hidden()).unwrap();
        build_sessions(group(scanned.files, &GroupingOptions::default()).items, 3.0)
    }

    fn plan_options(out: &assert_fs::TempDir) -> PlanOptions {
        PlanOptions {
            output_root: out.path().to_path_buf(),
            force_reimport: false,
            dry_run: false,
        }
    }

    #[test]
    fn test_execute_copies_and_records() {
        let card = assert_fs::TempDir::new().unwrap();
        let out = assert_fs::TempDir::new().unwrap();
        let sessions = card_sessions(&card);
        let plan = build_plan(&sessions, &LedgerView::default(), &plan_options(&out));
        let ledger = Mutex::new(Ledger::open_in_memory().unwrap());

        let report = execute_plan(
            &plan,
            &FsExecutor::default(),
            &ledger,
            &AtomicBool::new(false),
            &ProgressBar::hidden(),
        );

        assert_eq!(report.items_copied, 2);
        assert_eq!(report.files_copied, 3);
        assert!(report.failures.is_empty());
        out.child("2024-01-15-AM/images/P1.JPG").assert("jpeg one");
        out.child("2024-01-15-AM/images/P1.ORF").assert("raw one");
        out.child("2024-01-15-AM/images/P2.JPG").assert("jpeg two");
        assert_eq!(ledger.lock().unwrap().len().unwrap(), 3);
    }

    #[test]
    fn test_failed_item_rolls_back_and_is_not_recorded() {
        let card = assert_fs::TempDir::new().unwrap();
        let out = assert_fs::TempDir::new().unwrap();
        let sessions = card_sessions(&card);
        let plan = build_plan(&sessions, &LedgerView::default(), &plan_options(&out));
        let ledger = Mutex::new(Ledger::open_in_memory().unwrap());
        let executor = FailingExecutor {
            inner: FsExecutor::default(),
            needle: "P1.ORF",
        };

        let report = execute_plan(
            &plan,
            &executor,
            &ledger,
            &AtomicBool::new(false),
            &ProgressBar::hidden(),
        );

        assert_eq!(report.items_failed, 1);
        assert_eq!(report.items_copied, 1);
        assert_eq!(report.failures.len(), 1);
        // The JPG of the failed pair was written first and must be gone again.
        out.child("2024-01-15-AM/images/P1.JPG").assert(predicates::path::missing());
        out.child("2024-01-15-AM/images/P2.JPG").assert("jpeg two");

        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn test_cancelled_run_records_nothing() {
        let card = assert_fs::TempDir::new().unwrap();
        let out = assert_fs::TempDir::new().unwrap();
        let sessions = card_sessions(&card);
        let plan = build_plan(&sessions, &LedgerView::default(), &plan_options(&out));
        let ledger = Mutex::new(Ledger::open_in_memory().unwrap());

        let report = execute_plan(
            &plan,
            &FsExecutor::default(),
            &ledger,
            &AtomicBool::new(true),
            &ProgressBar::hidden(),
        );

        assert_eq!(report.items_cancelled, 2);
        assert_eq!(report.items_copied, 0);
        assert_eq!(ledger.lock().unwrap().len().unwrap(), 0);
    }

    #[test]
    fn test_copy_never_overwrites_different_content() {
        let dir = assert_fs::TempDir::new().unwrap();
        let source = dir.child("P1.JPG");
        let dest = dir.child("out/P1.JPG");
        source.write_binary(b"new").unwrap();
        dest.write_binary(b"old").unwrap();

        let identity = hash_file(source.path()).unwrap();
        let err = FsExecutor::default()
            .copy(source.path(), dest.path(), &identity)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        dest.assert("old");
    }

    #[test]
    fn test_copy_identical_destination_is_present() {
        let dir = assert_fs::TempDir::new().unwrap();
        let source = dir.child("P1.JPG");
        let dest = dir.child("out/P1.JPG");
        source.write_binary(b"same").unwrap();
        dest.write_binary(b"same").unwrap();

        let identity = hash_file(source.path()).unwrap();
        let outcome = FsExecutor::default()
            .copy(source.path(), dest.path(), &identity)
            .unwrap();
        assert_eq!(outcome, CopyOutcome::AlreadyPresent);
    }

    #[test]
    fn test_hardlink_mode() {
        let dir = assert_fs::TempDir::new().unwrap();
        let source = dir.child("P1.JPG");
        let dest = dir.child("P1-linked.JPG");
        source.write_binary(b"bytes").unwrap();

        let identity = hash_file(source.path()).unwrap();
        let outcome = FsExecutor::new(TransferMode::Hardlink)
            .copy(source.path(), dest.path(), &identity)
            .unwrap();
        assert_eq!(outcome, CopyOutcome::Written);
        dest.assert("bytes");
    }

    #[test]
    fn test_failed_rename_leaves_no_partial_file() {
        let dir = assert_fs::TempDir::new().unwrap();
        let source = dir.child("P1.JPG");
        source.write_binary(b"bytes").unwrap();
        // A non-empty directory in the way makes the final rename fail.
        let blocker = dir.child("out/P1.JPG");
        blocker.child("keep").touch().unwrap();

        assert!(FsExecutor::copy_verified(source.path(), blocker.path()).is_err());
        dir.child("out/P1.JPG.omtriage-part").assert(predicates::path::missing());
        blocker.child("keep").assert(predicates::path::exists());
    }

    #[test]
    fn test_failed_item_leaves_no_empty_folders() {
        let card = assert_fs::TempDir::new().unwrap();
        let out = assert_fs::TempDir::new().unwrap();
        card.child("DCIM/P1.JPG").write_binary(b"jpeg one").unwrap();
        card.child("DCIM/P1.ORF").write_binary(b"raw one").unwrap();
        let provider = FixedTimeProvider::new()
            .with("P1.JPG", datetime!(2024-01-15 10:30:00))
            .with("P1.ORF", datetime!(2024-01-15 10:30:00));
        let scanned = scan_files(card.path(), &provider, 1, &ProgressBar::hidden()).unwrap();
        let sessions = build_sessions(group(scanned.files, &GroupingOptions::default()).items, 3.0);
        let plan = build_plan(&sessions, &LedgerView::default(), &plan_options(&out));
        let ledger = Mutex::new(Ledger::open_in_memory().unwrap());
        let executor = FailingExecutor {
            inner: FsExecutor::default(),
            needle: "P1.ORF",
        };

        let report = execute_plan(
            &plan,
            &executor,
            &ledger,
            &AtomicBool::new(false),
            &ProgressBar::hidden(),
        );

        assert_eq!(report.items_failed, 1);
        out.child("2024-01-15-AM").assert(predicates::path::missing());
        out.assert(predicates::path::is_dir());
    }

    #[test]
    fn test_rollback_keeps_folders_used_by_other_items() {
        let card = assert_fs::TempDir::new().unwrap();
        let out = assert_fs::TempDir::new().unwrap();
        let sessions = card_sessions(&card);
        let plan = build_plan(&sessions, &LedgerView::default(), &plan_options(&out));
        let ledger = Mutex::new(Ledger::open_in_memory().unwrap());
        let executor = FailingExecutor {
            inner: FsExecutor::default(),
            needle: "P2.JPG",
        };

        let report = execute_plan(
            &plan,
            &executor,
            &ledger,
            &AtomicBool::new(false),
            &ProgressBar::hidden(),
        );

        assert_eq!(report.items_failed, 1);
        out.child("2024-01-15-AM/images/P1.JPG").assert("jpeg one");
        out.child("2024-01-15-AM/images/P2.JPG").assert(predicates::path::missing());
    }

    #[test]
    fn test_existing_destination_compared_against_known_identity() {
        let dir = assert_fs::TempDir::new().unwrap();
        let source = dir.child("P1.JPG");
        let dest = dir.child("out/P1.JPG");
        source.write_binary(b"card bytes").unwrap();
        dest.write_binary(b"archived bytes").unwrap();

        // The destination matches the identity handed in, so the source is never re-read.
        let identity = hash_file(dest.path()).unwrap();
        let outcome = FsExecutor::default()
            .copy(source.path(), dest.path(), &identity)
            .unwrap();
        assert_eq!(outcome, CopyOutcome::AlreadyPresent);
        dest.assert("archived bytes");
    }
}
