use crate::omtriage_core::error::{Result, TriageError};
use exiftool::ExifTool;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Date format used in EXIF data.
const EXIF_DATE_FORMAT: &[time::format_description::FormatItem] =
    time::macros::format_description!("[year]:[month]:[day] [hour]:[minute]:[second]");

thread_local! {
    static EXIFTOOL: RefCell<Option<std::result::Result<ExifTool, String>>> = const { RefCell::new(None) };
}

/// Source of capture timestamps for media files.
///
/// Implementations must never fail the run: anything that goes wrong is
/// reported as an unknown capture time.
pub trait MetadataProvider: Send + Sync {
    fn capture_time(&self, path: &Path) -> Option<PrimitiveDateTime>;
}

/// Exiftool date fields, in order of preference.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
struct RawExifDates {
    #[serde(default)]
    date_time_original: String,
    #[serde(default)]
    create_date: String,
}

/// Reads capture times with one long-lived exiftool process per worker thread.
#[derive(Debug, Default)]
pub struct ExiftoolProvider;

impl ExiftoolProvider {
    pub fn new() -> Self {
        ExiftoolProvider
    }

    fn read_dates(path: &Path) -> Result<RawExifDates> {
        EXIFTOOL.with(|cell| {
            let mut slot = cell.borrow_mut();
            let exiftool = slot.get_or_insert_with(|| {
                ExifTool::new().map_err(|e| {
                    log::warn!("exiftool could not be started on this worker: {}", e);
                    e.to_string()
                })
            });
            match exiftool {
                Ok(tool) => tool
                    .read_metadata(path, &["-DateTimeOriginal", "-CreateDate"])
                    .map_err(|e| TriageError::Exiftool(e.to_string())),
                Err(reason) => Err(TriageError::Exiftool(reason.clone())),
            }
        })
    }
}

impl MetadataProvider for ExiftoolProvider {
    fn capture_time(&self, path: &Path) -> Option<PrimitiveDateTime> {
        let raw = match Self::read_dates(path) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("No metadata for {}: {}", path.display(), e);
                return None;
            }
        };

        parse_exif_date(&raw.date_time_original)
            .or_else(|e| {
                log::debug!(
                    "DateTimeOriginal unusable for {}: {}. Trying CreateDate.",
                    path.display(),
                    e
                );
                parse_exif_date(&raw.create_date)
            })
            .map_err(|e| {
                log::warn!("No valid capture time found for {}: {}", path.display(), e);
            })
            .ok()
    }
}

/// Provider with a fixed table of capture times, keyed by file name.
///
/// Files missing from the table have no capture time.
#[derive(Debug, Default, Clone)]
pub struct FixedTimeProvider {
    times: HashMap<String, PrimitiveDateTime>,
}

impl FixedTimeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filename: &str, time: PrimitiveDateTime) -> Self {
        self.times.insert(filename.to_string(), time);
        self
    }
}

impl MetadataProvider for FixedTimeProvider {
    fn capture_time(&self, path: &Path) -> Option<PrimitiveDateTime> {
        let name = path.file_name()?.to_str()?;
        self.times.get(name).copied()
    }
}

/// Parse an EXIF wall-clock date. Offsets are not applied.
pub fn parse_exif_date(date_str: &str) -> Result<PrimitiveDateTime> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return Err(TriageError::InvalidDateFormat("empty date".to_string()));
    }
    // Cameras with an unset clock write all zeros.
    if trimmed.starts_with("0000") {
        return Err(TriageError::InvalidDateFormat(format!("unset date '{}'", trimmed)));
    }

    // Some files carry sub-seconds or an offset after the seconds field.
    let head = trimmed.get(..19).unwrap_or(trimmed);
    PrimitiveDateTime::parse(head, EXIF_DATE_FORMAT)
        .map_err(|e| TriageError::InvalidDateFormat(format!("'{}': {}", trimmed, e)))
}

/// Get the local timezone offset, falling back to UTC if unavailable.
pub fn get_local_offset() -> UtcOffset {
    OffsetDateTime::now_local()
        .map(|dt| dt.offset())
        .unwrap_or(UtcOffset::UTC)
}

/// Local wall-clock time of a filesystem timestamp.
pub fn local_wall_clock(time: SystemTime, offset: UtcOffset) -> PrimitiveDateTime {
    let local = OffsetDateTime::from(time).to_offset(offset);
    PrimitiveDateTime::new(local.date(), local.time())
}

/// Fallback date for a file: its modification time on the local clock.
pub fn fallback_time(path: &Path, meta: &std::fs::Metadata, offset: UtcOffset) -> PrimitiveDateTime {
    let modified = meta.modified().unwrap_or_else(|e| {
        log::warn!(
            "Failed to get modified time for {}: {}. Using current time.",
            path.display(),
            e
        );
        SystemTime::now()
    });
    local_wall_clock(modified, offset)
}

/// Check if exiftool is available on the system.
pub fn exiftool_available() -> bool {
    std::process::Command::new("exiftool")
        .arg("-ver")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
