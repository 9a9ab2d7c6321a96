use crate::omtriage_core::executor::TransferMode;
use crate::omtriage_core::group::GroupingOptions;
use crate::omtriage_core::import::ImportOptions;
use crate::omtriage_core::session::DEFAULT_SESSION_GAP;
use clap::{Parser, ValueEnum};
use simplelog::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Import photos and videos from a camera card into dated shooting sessions"
)]
pub struct Cli {
    /// Directory containing media to import (card or DCIM folder)
    #[arg(required = true)]
    pub input_dir: PathBuf,

    /// Archive root that receives the session folders
    #[arg(required = true)]
    pub output_dir: PathBuf,

    /// Hours between consecutive shots that start a new session
    #[arg(long, default_value_t = DEFAULT_SESSION_GAP, allow_negative_numbers = true)]
    pub session_gap: f64,

    /// Import files again even if they are recorded as already imported
    #[arg(long)]
    pub force_reimport: bool,

    /// Show what would be imported without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Console log level
    #[arg(long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Import history database (default: <OUTPUT_DIR>/.omtriage.db)
    #[arg(long, value_name = "PATH")]
    pub import_history: Option<PathBuf>,

    /// Number of scan workers (default: number of CPUs)
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Hardlink files into the archive when possible instead of copying
    #[arg(long)]
    pub hardlink: bool,

    /// Treat P1_1.JPG and P1.ORF style names as one shot
    #[arg(long)]
    pub pair_suffixed: bool,

    /// Enable debug logging to omtriage.log
    #[arg(long = "log")]
    pub log: bool,

    /// Write the debug log to this file instead of omtriage.log
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl Cli {
    /// Where the file logger writes, if file logging is enabled.
    pub fn log_path(&self) -> Option<PathBuf> {
        match (&self.log_file, self.log) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(PathBuf::from("omtriage.log")),
            (None, false) => None,
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        let mut options = ImportOptions::new(&self.input_dir, &self.output_dir);
        options.session_gap = self.session_gap;
        options.force_reimport = self.force_reimport;
        options.dry_run = self.dry_run;
        options.ledger_path = self.import_history.clone();
        if let Some(jobs) = self.jobs {
            options.jobs = jobs;
        }
        options.transfer_mode = if self.hardlink {
            TransferMode::Hardlink
        } else {
            TransferMode::Copy
        };
        options.grouping = GroupingOptions {
            pair_suffixed: self.pair_suffixed,
        };
        options
    }
}
