use anyhow::{Context, Result};
use clap::Parser;
use omtriage::omtriage_core::exif::exiftool_available;
use omtriage::omtriage_core::import::request_cancel;
use omtriage::omtriage_core::{
    Action, Cli, ExiftoolProvider, FsExecutor, ImportReport, run_import,
};
use simplelog::{CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, WriteLogger};
use std::fs::File;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn init_logging(cli: &Cli) -> Result<()> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::from(cli.log_level),
        Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];

    if let Some(path) = cli.log_path() {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    CombinedLogger::init(loggers)?;
    Ok(())
}

fn print_report(report: &ImportReport) {
    if report.dry_run {
        println!("Dry run, nothing was copied:");
        for planned in report.planned.iter().filter(|p| p.action == Action::SkipDryRun) {
            println!("  {} -> {}", planned.source.display(), planned.destination.display());
        }
        println!(
            "\n{} items would be imported, {} already imported",
            report.plan.skip_dry_run, report.plan.skip_duplicate
        );
        return;
    }

    println!("\nImport complete!");
    println!("  {} sessions", report.sessions.len());
    println!(
        "  {} items imported ({} files)",
        report.execution.items_copied, report.execution.files_copied
    );
    if report.plan.skip_duplicate > 0 {
        println!("  {} duplicates skipped", report.plan.skip_duplicate);
    }
    if report.unrecognized > 0 {
        println!("  {} unrecognized files placed in unsorted/", report.unrecognized);
    }
    if report.execution.items_cancelled > 0 {
        println!("  {} items cancelled", report.execution.items_cancelled);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    if !report.failures.is_empty() {
        eprintln!("\n{} failures:", report.failures.len());
        for failure in &report.failures {
            eprintln!("  {}", failure);
        }
    }
}

fn run(cli: &Cli) -> Result<ImportReport> {
    let options = cli.import_options();
    options.validate()?;

    if !exiftool_available() {
        log::warn!("exiftool was not found; capture times will fall back to file modification times");
    }

    let provider = ExiftoolProvider::new();
    let executor = FsExecutor::new(options.transfer_mode);
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        if !request_cancel(&flag) {
            std::process::exit(130);
        }
    }) {
        log::warn!("Could not install interrupt handler: {}", e);
    }

    let report = run_import(&options, &provider, &executor, &cancel)?;
    Ok(report)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }

    match run(&cli) {
        Ok(report) => {
            print_report(&report);
            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
