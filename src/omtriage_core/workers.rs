use crate::omtriage_core::error::{FailurePhase, FileFailure, Result, TriageError};
use crate::omtriage_core::exif::{MetadataProvider, fallback_time, get_local_offset};
use crate::omtriage_core::fingerprint::FingerprintCache;
use crate::omtriage_core::media::{MediaFile, detect_category};
use crossbeam_channel::unbounded;
use indicatif::ProgressBar;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::UtcOffset;
use walkdir::{DirEntry, WalkDir};

/// Files found on the source and the ones that could not be read.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<MediaFile>,
    pub failures: Vec<FileFailure>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// List every regular, non-hidden file under `root`. Symlinks are skipped.
///
/// Fails only when `root` itself cannot be read.
pub fn discover(root: &Path) -> Result<(Vec<PathBuf>, Vec<FileFailure>)> {
    if let Err(e) = fs::read_dir(root) {
        log::error!("Cannot read input directory {}: {}", root.display(), e);
        return Err(TriageError::InputNotReadable(root.to_path_buf()));
    }

    let mut paths = Vec::new();
    let mut failures = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => paths.push(entry.into_path()),
            Ok(entry) if entry.path_is_symlink() => {
                log::debug!("Skipping symlink {}", entry.path().display());
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                log::warn!("Cannot read {}: {}", path.display(), e);
                failures.push(FileFailure {
                    phase: FailurePhase::Scan,
                    path,
                    message: e.to_string(),
                });
            }
        }
    }

    paths.sort();
    Ok((paths, failures))
}

/// Stat, date and fingerprint one discovered file.
pub fn process_file(
    root: &Path,
    path: PathBuf,
    provider: &dyn MetadataProvider,
    cache: &FingerprintCache,
    offset: UtcOffset,
) -> io::Result<MediaFile> {
    let meta = fs::metadata(&path)?;
    let fingerprint = cache.fingerprint_with(&path, &meta)?;
    let capture_time = provider.capture_time(&path);

    log::debug!(
        "Scanned {} (size: {}, capture time: {:?})",
        path.display(),
        meta.len(),
        capture_time
    );

    Ok(MediaFile {
        relative_path: path.strip_prefix(root).unwrap_or(&path).to_path_buf(),
        category: detect_category(&path),
        size: meta.len(),
        capture_time,
        fallback_time: fallback_time(&path, &meta, offset),
        fingerprint,
        path,
    })
}

/// Discover and scan every file under `root` on a pool of `jobs` workers.
///
/// Returns once every worker has finished, so callers see a complete set.
pub fn scan_files(
    root: &Path,
    provider: &dyn MetadataProvider,
    jobs: usize,
    progress: &ProgressBar,
) -> Result<ScanOutcome> {
    let (paths, mut failures) = discover(root)?;
    log::info!("Found {} files in {}", paths.len(), root.display());
    progress.set_length(paths.len() as u64);

    let offset = get_local_offset();
    let cache = FingerprintCache::new();
    let (job_tx, job_rx) = unbounded::<PathBuf>();
    let (result_tx, result_rx) = unbounded::<(PathBuf, io::Result<MediaFile>)>();

    for path in paths {
        if job_tx.send(path).is_err() {
            log::error!("Failed to queue scan job");
            break;
        }
    }
    drop(job_tx);

    rayon::scope(|s| {
        for _ in 0..jobs.max(1) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cache = &cache;
            s.spawn(move |_| {
                for path in job_rx {
                    let result = process_file(root, path.clone(), provider, cache, offset);
                    progress.inc(1);
                    if result_tx.send((path, result)).is_err() {
                        log::error!("Failed to send scan result to main thread");
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut files = Vec::new();
    for (path, result) in result_rx {
        match result {
            Ok(file) => files.push(file),
            Err(e) => {
                log::warn!("Skipping unreadable file {}: {}", path.display(), e);
                failures.push(FileFailure {
                    phase: FailurePhase::Scan,
                    path,
                    message: e.to_string(),
                });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    log::debug!("Fingerprinted {} files", cache.len());
    Ok(ScanOutcome { files, failures })
}
