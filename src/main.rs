//! LabScan command-line driver.
//!
//! Runs one lab report through the pipeline and prints the structured
//! result, or stores it and prints the report id.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use labscan_lib::config::{self, OcrSettings};
use labscan_lib::pipeline::import::sweep_stale_scratch;
use labscan_lib::pipeline::processor::Upload;
use labscan_lib::pipeline::storage::JsonFileStore;

#[derive(Parser)]
#[command(name = "labscan")]
#[command(about = "Extract structured data from a lab report image or PDF")]
#[command(version)]
struct Cli {
    /// Lab report file (JPEG, PNG, GIF, WebP or PDF)
    file: PathBuf,

    /// Patient phone number recorded on the report
    phone_number: String,

    /// Override the media type guessed from the file extension
    #[arg(long)]
    media_type: Option<String>,

    /// Store the report as JSON in this directory instead of printing it
    #[arg(long, env = "LABSCAN_STORE_DIR")]
    store: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    labscan_lib::init_tracing();

    let settings = OcrSettings::from_env().context("Invalid configuration")?;
    sweep_stale_scratch(&settings.scratch_dir, config::SCRATCH_MAX_AGE);

    // Built before the runtime: the blocking HTTP client cannot be created inside it
    let processor = labscan_lib::build_processor(&settings)?;

    let bytes = std::fs::read(&cli.file)
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;
    let file_name = cli
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let media_type = cli
        .media_type
        .or_else(|| mime_guess::from_path(&cli.file).first_raw().map(str::to_string));
    let upload = Upload::new(bytes, media_type.as_deref(), &file_name);

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.store {
        Some(dir) => {
            let store = JsonFileStore::new(dir);
            let id = runtime.block_on(processor.process_and_store(
                upload,
                &cli.phone_number,
                &store,
            ))?;
            println!("{id}");
        }
        None => {
            let report = runtime.block_on(processor.process(upload, &cli.phone_number))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    // The blocking client must be dropped outside the runtime as well
    drop(runtime);
    drop(processor);
    Ok(())
}
