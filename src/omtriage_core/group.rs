use crate::omtriage_core::fingerprint::Fingerprint;
use crate::omtriage_core::media::{Category, MediaFile};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use time::PrimitiveDateTime;

/// Options controlling how file names are keyed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupingOptions {
    /// Strip trailing `_N`, `-N` and ` (N)` burst/copy suffixes before keying,
    /// so `P1_1.JPG` pairs with `P1.ORF`.
    pub pair_suffixed: bool,
}

/// Why an item was set aside from normal pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFlag {
    /// Extension outside the known image/raw/video table.
    Unrecognized,
    /// Another file with the same key and category existed in the directory.
    CategoryCollision,
}

/// Sibling files representing one captured moment, imported together.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: String,
    pub directory: PathBuf,
    pub files: Vec<MediaFile>,
    pub flag: Option<ItemFlag>,
}

impl Item {
    fn new(key: &str, directory: &Path, mut files: Vec<MediaFile>, flag: Option<ItemFlag>) -> Self {
        files.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.path.cmp(&b.path))
        });
        Item {
            key: key.to_string(),
            directory: directory.to_path_buf(),
            files,
            flag,
        }
    }

    /// Earliest capture time among the members, if any member has one.
    pub fn capture_time(&self) -> Option<PrimitiveDateTime> {
        self.files.iter().filter_map(|f| f.capture_time).min()
    }

    /// Earliest fallback (modification) time among the members.
    pub fn fallback_time(&self) -> PrimitiveDateTime {
        self.files
            .iter()
            .map(|f| f.fallback_time)
            .min()
            .unwrap_or(PrimitiveDateTime::MIN)
    }

    pub fn is_undated(&self) -> bool {
        self.capture_time().is_none()
    }

    /// The time used to label the item: capture time, else fallback time.
    pub fn label_time(&self) -> PrimitiveDateTime {
        self.capture_time().unwrap_or_else(|| self.fallback_time())
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.files.iter().map(|f| &f.fingerprint)
    }

    /// Display name, e.g. `DCIM/100OLYMP/P1150001.{JPG,ORF}`.
    pub fn display_name(&self) -> String {
        match self.files.as_slice() {
            [single] => single.relative_path.display().to_string(),
            files => {
                let exts: Vec<String> = files
                    .iter()
                    .map(|f| {
                        f.path
                            .extension()
                            .unwrap_or_default()
                            .to_string_lossy()
                            .to_string()
                    })
                    .collect();
                let stem = files
                    .first()
                    .map(|f| f.relative_path.with_extension(""))
                    .unwrap_or_default();
                format!("{}.{{{}}}", stem.display(), exts.join(","))
            }
        }
    }
}

/// Output of [`group`].
#[derive(Debug, Default)]
pub struct GroupReport {
    pub items: Vec<Item>,
    pub warnings: Vec<String>,
    pub unrecognized: usize,
}

/// Remove a trailing burst/copy counter (`_1`, `-12`, ` (3)`) from a stem.
fn strip_sequence_suffix(stem: &str) -> &str {
    let is_counter = |s: &str| (1..=3).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit());

    if let Some(inner) = stem.strip_suffix(')') {
        if let Some((head, digits)) = inner.rsplit_once(" (") {
            if is_counter(digits) && !head.is_empty() {
                return head;
            }
        }
    }
    if let Some(pos) = stem.rfind(['_', '-']) {
        let (head, digits) = (&stem[..pos], &stem[pos + 1..]);
        if is_counter(digits) && !head.is_empty() {
            return head;
        }
    }
    stem
}

/// Grouping key of a path: its stem, upper-cased, optionally without a
/// sequence suffix. Only meaningful together with the parent directory.
pub fn grouping_key(path: &Path, options: &GroupingOptions) -> String {
    let stem = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let stem = if options.pair_suffixed {
        strip_sequence_suffix(&stem)
    } else {
        stem.as_str()
    };
    stem.to_uppercase()
}

/// Cluster files sharing a grouping key within one directory into items.
///
/// At most one file per category joins a pair. Files whose category repeats
/// under the same key are kept as flagged singletons, as are unrecognized files.
pub fn group(files: Vec<MediaFile>, options: &GroupingOptions) -> GroupReport {
    let mut buckets: BTreeMap<(PathBuf, String), Vec<MediaFile>> = BTreeMap::new();
    for file in files {
        let directory = file.path.parent().map(Path::to_path_buf).unwrap_or_default();
        let key = grouping_key(&file.path, options);
        buckets.entry((directory, key)).or_default().push(file);
    }

    let mut report = GroupReport::default();

    for ((directory, key), bucket) in buckets {
        let (recognized, unrecognized): (Vec<MediaFile>, Vec<MediaFile>) = bucket
            .into_iter()
            .partition(|f| f.category.is_recognized());

        for file in unrecognized {
            log::warn!(
                "Unrecognized file type, needs manual sorting: {}",
                file.path.display()
            );
            report.unrecognized += 1;
            report
                .items
                .push(Item::new(&key, &directory, vec![file], Some(ItemFlag::Unrecognized)));
        }

        let mut per_category: HashMap<Category, usize> = HashMap::new();
        for file in &recognized {
            *per_category.entry(file.category).or_default() += 1;
        }

        let (colliding, paired): (Vec<MediaFile>, Vec<MediaFile>) = recognized
            .into_iter()
            .partition(|f| per_category.get(&f.category).copied().unwrap_or(0) > 1);

        if !colliding.is_empty() {
            let names: Vec<String> = colliding.iter().map(MediaFile::filename).collect();
            let warning = format!(
                "{} files share the name '{}' in {}; importing them separately: {}",
                colliding.len(),
                key,
                directory.display(),
                names.join(", ")
            );
            log::warn!("{}", warning);
            report.warnings.push(warning);
            for file in colliding {
                report.items.push(Item::new(
                    &key,
                    &directory,
                    vec![file],
                    Some(ItemFlag::CategoryCollision),
                ));
            }
        }

        if !paired.is_empty() {
            report.items.push(Item::new(&key, &directory, paired, None));
        }
    }

    log::debug!(
        "Grouped into {} items ({} unrecognized, {} warnings)",
        report.items.len(),
        report.unrecognized,
        report.warnings.len()
    );
    report
}
