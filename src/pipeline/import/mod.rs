pub mod format;
pub mod staging;

pub use format::*;
pub use staging::*;

use thiserror::Error;

use crate::pipeline::extraction::ExtractionError;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("PDF contains no pages")]
    EmptyDocument,

    #[error("Could not rasterize upload: {0}")]
    Rendering(#[from] ExtractionError),
}
