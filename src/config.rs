use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "LabScan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Anthropic Messages API root. Overridable for proxies and tests.
pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";

/// Seconds allowed for a single vision extraction before the upload fails.
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 120;

/// Rendering resolution for PDF pages sent to the vision model.
pub const DEFAULT_RENDER_DPI: u32 = 300;

/// Response budget for the extraction call. Lab reports with many
/// parameters produce long JSON; truncation is repaired downstream only
/// on a best-effort basis.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Scratch files older than this are swept at startup (crash leftovers).
pub const SCRATCH_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "labscan_lib=info,labscan=info,warn"
}

/// Default scratch directory: `<system tmp>/lab_reports`.
pub fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("lab_reports")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,

    #[error("{key} must be a positive integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// Process-wide OCR settings, read once at startup.
///
/// The model identifier is kept verbatim here; it is validated against the
/// supported list when the extraction client is constructed.
#[derive(Clone, Serialize)]
pub struct OcrSettings {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub api_base_url: String,
    pub model: Option<String>,
    pub scratch_dir: PathBuf,
    pub extraction_timeout_secs: u64,
    pub render_dpi: u32,
    pub max_tokens: u32,
}

impl OcrSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = non_empty("ANTHROPIC_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let api_base_url = non_empty("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let scratch_dir = non_empty("TEMP_FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_scratch_dir);

        let extraction_timeout_secs = parse_positive(
            "EXTRACTION_TIMEOUT_SECS",
            non_empty("EXTRACTION_TIMEOUT_SECS"),
            DEFAULT_EXTRACTION_TIMEOUT_SECS,
        )?;
        let render_dpi = parse_positive(
            "RENDER_DPI",
            non_empty("RENDER_DPI"),
            u64::from(DEFAULT_RENDER_DPI),
        )?;
        let max_tokens = parse_positive(
            "CLAUDE_MAX_TOKENS",
            non_empty("CLAUDE_MAX_TOKENS"),
            u64::from(DEFAULT_MAX_TOKENS),
        )?;

        Ok(Self {
            api_key,
            api_base_url,
            model: non_empty("CLAUDE_MODEL"),
            scratch_dir,
            extraction_timeout_secs,
            render_dpi: u32::try_from(render_dpi).map_err(|_| ConfigError::InvalidNumber {
                key: "RENDER_DPI",
                value: render_dpi.to_string(),
            })?,
            max_tokens: u32::try_from(max_tokens).map_err(|_| ConfigError::InvalidNumber {
                key: "CLAUDE_MAX_TOKENS",
                value: max_tokens.to_string(),
            })?,
        })
    }
}

impl fmt::Debug for OcrSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrSettings")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("model", &self.model)
            .field("scratch_dir", &self.scratch_dir)
            .field("extraction_timeout_secs", &self.extraction_timeout_secs)
            .field("render_dpi", &self.render_dpi)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn parse_positive(
    key: &'static str,
    raw: Option<String>,
    default: u64,
) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::InvalidNumber { key, value }),
        },
    }
}
