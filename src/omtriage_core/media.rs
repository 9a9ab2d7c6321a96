use crate::omtriage_core::fingerprint::Fingerprint;
use std::path::{Path, PathBuf};
use time::PrimitiveDateTime;

/// Closed set of file categories, decided purely by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Image,
    Raw,
    Video,
    Unrecognized,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Raw => "raw",
            Category::Video => "video",
            Category::Unrecognized => "unrecognized",
        }
    }

    /// Sub-folder of a session directory that files of this category land in.
    pub fn folder_name(&self) -> &'static str {
        match self {
            Category::Image | Category::Raw => "images",
            Category::Video => "videos",
            Category::Unrecognized => "unsorted",
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Category::Unrecognized)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Image file extensions (lowercase).
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "tif", "tiff"];

/// RAW file extensions (lowercase).
const RAW_EXTENSIONS: &[&str] = &[
    "orf", "ori", "raw", "cr2", "cr3", "nef", "arw", "dng", "rw2", "raf", "pef", "sr2",
];

/// Video file extensions (lowercase).
const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "m4v", "avi", "mts", "m2ts", "mkv", "3gp"];

/// Detect the category of a file from its extension.
pub fn detect_category(path: &Path) -> Category {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Category::Unrecognized;
    };
    let ext_lower = ext.to_lowercase();

    if IMAGE_EXTENSIONS.contains(&ext_lower.as_str()) {
        Category::Image
    } else if RAW_EXTENSIONS.contains(&ext_lower.as_str()) {
        Category::Raw
    } else if VIDEO_EXTENSIONS.contains(&ext_lower.as_str()) {
        Category::Video
    } else {
        Category::Unrecognized
    }
}

/// A file discovered on the source card. Immutable once discovered.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    /// Path relative to the import source root.
    pub relative_path: PathBuf,
    pub size: u64,
    pub category: Category,
    /// Capture time reported by the metadata provider, if any.
    pub capture_time: Option<PrimitiveDateTime>,
    /// Local modification time, used to date files without a capture time.
    pub fallback_time: PrimitiveDateTime,
    pub fingerprint: Fingerprint,
}

impl MediaFile {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    /// Name the file gets in the archive.
    ///
    /// Olympus `.ORI` files get an extra `.ORF` suffix so raw converters pick them up.
    pub fn output_name(&self) -> String {
        output_name(&self.path)
    }
}

/// Archive file name for a source path (see [`MediaFile::output_name`]).
pub fn output_name(path: &Path) -> String {
    let name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let is_ori = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ori"));
    if is_ori { format!("{}.ORF", name) } else { name }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use time::macros::datetime;

    /// Build a `MediaFile` without touching the filesystem.
    pub fn media_file(path: &str, capture: Option<PrimitiveDateTime>) -> MediaFile {
        let path = PathBuf::from(path);
        MediaFile {
            relative_path: PathBuf::from(path.file_name().unwrap_or_default()),
            category: detect_category(&path),
            size: 1024,
            capture_time: capture,
            fallback_time: datetime!(2024-03-01 08:00:00),
            fingerprint: Fingerprint::from(format!("fp:{}", path.display())),
            path,
        }
    }
}
