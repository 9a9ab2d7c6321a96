use crate::omtriage_core::fingerprint::Fingerprint;
use crate::omtriage_core::group::Item;
use crate::omtriage_core::ledger::LedgerView;
use crate::omtriage_core::media::MediaFile;
use crate::omtriage_core::session::Session;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// What the executor does with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Copy,
    /// Every file of the item is already imported (or already planned in this run).
    SkipDuplicate,
    /// Would be copied, but this is a dry run.
    SkipDryRun,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Copy => "copy",
            Action::SkipDuplicate => "skip-duplicate",
            Action::SkipDryRun => "skip-dry-run",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub output_root: PathBuf,
    pub force_reimport: bool,
    pub dry_run: bool,
}

/// Source file and the exact path it will occupy in the archive.
#[derive(Debug, Clone)]
pub struct PlannedFile<'a> {
    pub file: &'a MediaFile,
    pub destination: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PlanEntry<'a> {
    pub item: &'a Item,
    pub session_label: String,
    pub action: Action,
    /// Empty for [`Action::SkipDuplicate`].
    pub files: Vec<PlannedFile<'a>>,
}

impl PlanEntry<'_> {
    /// Directories the executor must create for this entry.
    pub fn destination_dirs(&self) -> BTreeSet<&Path> {
        self.files
            .iter()
            .filter_map(|f| f.destination.parent())
            .collect()
    }
}

/// Counts per action in a plan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub copy: usize,
    pub skip_duplicate: usize,
    pub skip_dry_run: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Ordered copy plan for one run. Never persisted.
#[derive(Debug, Default)]
pub struct Plan<'a> {
    pub entries: Vec<PlanEntry<'a>>,
}

impl<'a> Plan<'a> {
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in &self.entries {
            match entry.action {
                Action::Copy => summary.copy += 1,
                Action::SkipDuplicate => summary.skip_duplicate += 1,
                Action::SkipDryRun => summary.skip_dry_run += 1,
            }
            summary.files += entry.files.len();
            summary.bytes += entry.files.iter().map(|f| f.file.size).sum::<u64>();
        }
        summary
    }

    /// Entries the executor has to act on.
    pub fn copies(&self) -> impl Iterator<Item = &PlanEntry<'a>> {
        self.entries.iter().filter(|e| e.action == Action::Copy)
    }
}

/// Name for `file` with a `_n` counter inserted after the original stem.
fn numbered_name(file: &MediaFile, n: usize) -> String {
    let name = file.output_name();
    let stem = file
        .path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let rest = name.get(stem.len()..).unwrap_or_default();
    format!("{}_{}{}", stem, n, rest)
}

/// Key under which a destination is reserved. Archive volumes may be
/// case-insensitive, so names differing only in case clash.
fn clash_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Destinations for every file of `item`, renaming the whole item with a
/// shared counter when any of its names is already taken in this plan.
fn destinations<'a>(item: &'a Item, session_dir: &Path, taken: &mut HashSet<String>) -> Vec<PlannedFile<'a>> {
    let place = |n: usize| -> Vec<PlannedFile<'a>> {
        item.files
            .iter()
            .map(|file| {
                let name = if n == 1 { file.output_name() } else { numbered_name(file, n) };
                PlannedFile {
                    file,
                    destination: session_dir.join(file.category.folder_name()).join(name),
                }
            })
            .collect()
    };

    let mut n = 1;
    let files = loop {
        let candidate = place(n);
        if candidate.iter().all(|f| !taken.contains(&clash_key(&f.destination))) {
            break candidate;
        }
        n += 1;
    };

    if n > 1 {
        log::warn!(
            "Name clash in {}: importing {} with suffix _{}",
            session_dir.display(),
            item.display_name(),
            n
        );
    }
    taken.extend(files.iter().map(|f| clash_key(&f.destination)));
    files
}

/// Build the copy plan for a run.
///
/// Pure: reads nothing from disk and changes nothing. A dry run yields the
/// same destinations as a real run, with `SkipDryRun` in place of `Copy`.
pub fn build_plan<'a>(sessions: &'a [Session], ledger: &LedgerView, options: &PlanOptions) -> Plan<'a> {
    let mut entries = Vec::new();
    let mut planned: HashSet<&'a Fingerprint> = HashSet::new();
    let mut taken: HashSet<String> = HashSet::new();

    for session in sessions {
        let label = session.label();
        let session_dir = options.output_root.join(&label);

        for item in &session.items {
            let imported = !options.force_reimport && item.fingerprints().all(|fp| ledger.contains(fp));
            let repeated = item.fingerprints().all(|fp| planned.contains(fp));

            if imported || repeated {
                log::debug!(
                    "Skipping {} ({})",
                    item.display_name(),
                    if imported { "already imported" } else { "duplicate within this import" }
                );
                entries.push(PlanEntry {
                    item,
                    session_label: label.clone(),
                    action: Action::SkipDuplicate,
                    files: Vec::new(),
                });
                continue;
            }

            let files = destinations(item, &session_dir, &mut taken);
            planned.extend(item.fingerprints());

            entries.push(PlanEntry {
                item,
                session_label: label.clone(),
                action: if options.dry_run { Action::SkipDryRun } else { Action::Copy },
                files,
            });
        }
    }

    Plan { entries }
}
