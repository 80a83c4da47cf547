pub mod types;
pub mod json_repair;
pub mod prompt;
pub mod claude;
pub mod pdfium;
pub mod vision_ocr;

pub use types::*;
pub use json_repair::*;
pub use prompt::*;
pub use claude::*;
pub use vision_ocr::*;

use thiserror::Error;

/// Failures talking to the vision model.
///
/// Malformed model output is never represented here: it is absorbed by the
/// fallback ladder in `vision_ocr` and degrades to the default skeleton.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Vision model endpoint unreachable at {0}")]
    Transport(String),

    #[error("Vision model returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Vision extraction timed out after {0}s")]
    Timeout(u64),

    #[error("Vision model response could not be decoded: {0}")]
    ResponseDecoding(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Extraction worker failed: {0}")]
    Worker(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),
}
