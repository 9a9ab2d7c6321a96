use base64::{Engine, engine::general_purpose};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Content-derived identity of a file: base64 SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calculate the SHA256 hash of a file at the given path and return it as base64.
pub fn hash_file(path: &Path) -> Result<Fingerprint, io::Error> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let hash = hasher.finalize();
    Ok(Fingerprint(general_purpose::STANDARD.encode(hash)))
}

/// Size and modification time a fingerprint was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    size: u64,
    modified: Option<SystemTime>,
}

impl Stamp {
    fn of(meta: &fs::Metadata) -> Self {
        Stamp {
            size: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

/// Per-run fingerprint cache, safe to share between scan workers.
///
/// A cached fingerprint is only reused while the file's size and modification
/// time still match what was seen when it was computed.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: Mutex<HashMap<PathBuf, (Stamp, Fingerprint)>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint `path`, reusing a cached value when the file is unchanged.
    pub fn fingerprint(&self, path: &Path) -> io::Result<Fingerprint> {
        let meta = fs::metadata(path)?;
        self.fingerprint_with(path, &meta)
    }

    /// Like [`fingerprint`](Self::fingerprint) with metadata the caller already holds.
    pub fn fingerprint_with(&self, path: &Path, meta: &fs::Metadata) -> io::Result<Fingerprint> {
        let stamp = Stamp::of(meta);

        if let Some((cached_stamp, fp)) = self.lock().get(path) {
            if *cached_stamp == stamp {
                return Ok(fp.clone());
            }
            log::debug!("{} changed since it was fingerprinted, rehashing", path.display());
        }

        // Hash outside the lock; each path is handed to exactly one worker.
        let fp = hash_file(path)?;
        self.lock().insert(path.to_path_buf(), (stamp, fp.clone()));
        Ok(fp)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, (Stamp, Fingerprint)>> {
        // Poisoned only if a worker panicked mid-insert.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
