use std::path::Path;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use biomap_manager::app::{App, ProgressEvent, ProgressSink};
use biomap_manager::config::{Settings, SettingsLoader};
use biomap_manager::domain::{FileId, FolderId};
use biomap_manager::drive::{DriveClient, DriveEntry, HttpDriveClient};
use biomap_manager::error::BiomapError;
use biomap_manager::output::{JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "biomap")]
#[command(about = "Biodiversity survey collector: merge field GeoPackage uploads into one dataset")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to the settings file (default: biomap.json in the current directory)
    #[arg(long, global = true)]
    settings: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download new uploads from the shared Drive folder into the inbox")]
    Sync,
    #[command(about = "Merge inbox files into the main dataset")]
    Run(RunArgs),
    #[command(about = "Delete processed .gpkg files from the Drive folder")]
    Cleanup,
    #[command(about = "Check every pipeline input and print a report")]
    Diagnose,
    #[command(about = "Write a settings skeleton for hand-editing")]
    Init,
}

#[derive(Args)]
struct RunArgs {
    /// Free-text note recorded in the run log
    #[arg(long, default_value = "")]
    note: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<BiomapError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BiomapError) -> u8 {
    match error {
        BiomapError::MissingSettings
        | BiomapError::SettingsRead(_)
        | BiomapError::SettingsParse(_)
        | BiomapError::SettingsIncomplete(_)
        | BiomapError::MissingResponsesSheet(_)
        | BiomapError::SpeciesTable { .. }
        | BiomapError::LayerNotFound { .. }
        | BiomapError::NoFeatureLayer(_) => 2,
        BiomapError::DriveHttp(_)
        | BiomapError::DriveStatus { .. }
        | BiomapError::MissingToken(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let settings_path = cli.settings.as_deref();

    match cli.command {
        Commands::Init => run_init(settings_path, output_mode),
        Commands::Sync => {
            let settings = SettingsLoader::resolve(settings_path).into_diagnostic()?;
            let drive = drive_client(&settings).into_diagnostic()?;
            run_sync(settings, drive, output_mode)
        }
        Commands::Cleanup => {
            let settings = SettingsLoader::resolve(settings_path).into_diagnostic()?;
            let drive = drive_client(&settings).into_diagnostic()?;
            run_cleanup(settings, drive, output_mode)
        }
        Commands::Run(args) => {
            let settings = SettingsLoader::resolve(settings_path).into_diagnostic()?;
            run_pipeline(settings, args, output_mode)
        }
        Commands::Diagnose => {
            let settings = SettingsLoader::resolve(settings_path).into_diagnostic()?;
            run_diagnose(settings, output_mode)
        }
    }
}

fn drive_client(settings: &Settings) -> Result<HttpDriveClient, BiomapError> {
    let token_path = settings.token_path()?;
    HttpDriveClient::from_token_file(token_path.as_std_path())
}

fn run_sync(
    settings: Settings,
    drive: HttpDriveClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = settings.sync().into_diagnostic()?;
    let app = App::new(drive);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.sync(&config, &JsonOutput).into_diagnostic()?;
            JsonOutput::print_sync(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app.sync(&config, &StderrProgress).into_diagnostic()?;
            print_sync_summary(&result);
        }
    }
    Ok(())
}

fn run_pipeline(settings: Settings, args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = settings.pipeline().into_diagnostic()?;
    let app = App::new(NopDrive);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.run(&config, &args.note, &JsonOutput).into_diagnostic()?;
            JsonOutput::print_run(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app
                .run(&config, &args.note, &StderrProgress)
                .into_diagnostic()?;
            print_run_summary(&result);
        }
    }
    Ok(())
}

fn run_cleanup(
    settings: Settings,
    drive: HttpDriveClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let folder = settings.cleanup_folder().into_diagnostic()?;
    let app = App::new(drive);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.cleanup(&folder, &JsonOutput).into_diagnostic()?;
            JsonOutput::print_cleanup(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app.cleanup(&folder, &StderrProgress).into_diagnostic()?;
            println!("deleted {} file(s), kept {}", result.deleted.len(), result.kept.len());
            for name in &result.deleted {
                println!("  removed {name}");
            }
        }
    }
    Ok(())
}

fn run_diagnose(settings: Settings, output_mode: OutputMode) -> miette::Result<()> {
    let config = settings.pipeline().into_diagnostic()?;
    let app = App::new(NopDrive);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.diagnose(&config, &JsonOutput).into_diagnostic()?;
            JsonOutput::print_diagnose(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app.diagnose(&config, &StderrProgress).into_diagnostic()?;
            println!("{}", result.report);
        }
    }
    Ok(())
}

fn run_init(settings_path: Option<&str>, output_mode: OutputMode) -> miette::Result<()> {
    SettingsLoader::save(&Settings::skeleton(), settings_path).into_diagnostic()?;
    if matches!(output_mode, OutputMode::Interactive) {
        println!(
            "wrote {}; fill in drive_folder_id and token_file",
            settings_path.unwrap_or(biomap_manager::config::SETTINGS_FILE)
        );
    }
    Ok(())
}

fn print_sync_summary(result: &biomap_manager::app::SyncResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    let errors = result
        .items
        .iter()
        .filter(|item| item.action.starts_with("error"))
        .count();
    println!("{green}synced {} item(s){reset}", result.items.len());
    if errors > 0 {
        println!("{red}{errors} item(s) failed{reset}");
    }
    for item in &result.items {
        let color = if item.action.starts_with("error") {
            red
        } else if item.action == "skipped" {
            yellow
        } else {
            green
        };
        match &item.path {
            Some(path) => println!("{color}  {} ({}) -> {path}{reset}", item.name, item.action),
            None => println!("{color}  {} ({}){reset}", item.name, item.action),
        }
    }
}

fn print_run_summary(result: &biomap_manager::app::RunResult) {
    let outcome = &result.outcome;
    println!("files processed: {}", outcome.files_processed);
    println!("rows merged: {}", outcome.rows_merged);
    println!("duplicates dropped: {}", outcome.duplicates_dropped);
    println!("rows appended: {}", outcome.rows_appended);
    println!("main dataset total: {}", outcome.main_total);
    if outcome.unmatched_species > 0 {
        println!("species without a table match: {}", outcome.unmatched_species);
    }
    if outcome.undated_rows > 0 {
        println!("rows without a usable date: {}", outcome.undated_rows);
    }
    for skipped in &outcome.skipped {
        println!("skipped {}: {}", skipped.file, skipped.reason);
    }
    if let Some(backup) = &outcome.backup_path {
        println!("previous main backed up to {backup}");
    }
    println!("run logged in {}", outcome.log_path);
}

struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", event.message);
    }
}

/// Placeholder for commands that never touch Drive.
struct NopDrive;

impl DriveClient for NopDrive {
    fn list_folder(&self, _folder: &FolderId) -> Result<Vec<DriveEntry>, BiomapError> {
        Err(BiomapError::DriveHttp(
            "drive client not configured".to_string(),
        ))
    }

    fn download_file(&self, _id: &FileId, _destination: &Path) -> Result<(), BiomapError> {
        Err(BiomapError::DriveHttp(
            "drive client not configured".to_string(),
        ))
    }

    fn export_sheet_csv(&self, _id: &FileId, _destination: &Path) -> Result<(), BiomapError> {
        Err(BiomapError::DriveHttp(
            "drive client not configured".to_string(),
        ))
    }

    fn delete_file(&self, _id: &FileId) -> Result<(), BiomapError> {
        Err(BiomapError::DriveHttp(
            "drive client not configured".to_string(),
        ))
    }
}
