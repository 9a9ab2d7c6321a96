pub mod cli;
pub mod error;
pub mod executor;
pub mod exif;
pub mod fingerprint;
pub mod group;
pub mod import;
pub mod ledger;
pub mod media;
pub mod plan;
pub mod session;
pub mod workers;

pub use cli::{Cli, LogLevel};
pub use error::{FailurePhase, FileFailure, TriageError};
pub use executor::{CopyOutcome, Executor, FsExecutor, TransferMode};
pub use exif::{ExiftoolProvider, FixedTimeProvider, MetadataProvider};
pub use fingerprint::{Fingerprint, hash_file};
pub use group::{GroupingOptions, Item, group};
pub use import::{ImportOptions, ImportReport, PlannedCopy, run_import};
pub use ledger::{LEDGER_FILE_NAME, Ledger, LedgerView};
pub use media::{Category, MediaFile, detect_category};
pub use plan::{Action, Plan, build_plan};
pub use session::{Session, build_sessions};
pub use workers::scan_files;
