pub mod config;
pub mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use config::OcrSettings;
use pipeline::extraction::pdfium::PdfiumRenderer;
use pipeline::extraction::{AnthropicClient, ExtractionError, LabReportExtractor};
use pipeline::import::Materializer;
use pipeline::processor::ReportProcessor;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}

/// Wire the production pipeline: Anthropic vision client + PDFium renderer.
///
/// Must run outside the tokio runtime (the blocking HTTP client spins up
/// its own). A missing PDFium library is not fatal here: image uploads
/// still work and PDF uploads fail with a rendering error.
pub fn build_processor(settings: &OcrSettings) -> Result<ReportProcessor, ExtractionError> {
    let client = AnthropicClient::new(settings)?;
    let extractor = LabReportExtractor::new(
        Arc::new(client),
        Duration::from_secs(settings.extraction_timeout_secs),
    );

    let renderer = PdfiumRenderer::new().unwrap_or_else(|e| {
        tracing::warn!("PDFium unavailable, PDF uploads will fail: {e}");
        PdfiumRenderer
    });
    let materializer = Materializer::new(
        settings.scratch_dir.clone(),
        Arc::new(renderer),
        settings.render_dpi,
    );

    tracing::info!(
        app = config::APP_NAME,
        version = config::APP_VERSION,
        scratch_dir = %settings.scratch_dir.display(),
        "Report processor ready"
    );
    Ok(ReportProcessor::new(extractor, materializer))
}
