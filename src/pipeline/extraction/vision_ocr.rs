//! Lab-report extraction: one image in, one raw JSON tree out.
//!
//! The blocking vision call runs on tokio's blocking pool under an explicit
//! timeout. Whatever text comes back is turned into JSON through a fallback
//! ladder; malformed output never surfaces as an error, it degrades to the
//! default skeleton instead.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use base64::Engine as _;
use regex::Regex;
use serde_json::Value;
use tracing::Instrument;

use super::json_repair::{balanced_object_at, parse_object, repair};
use super::prompt::{default_skeleton, LAB_REPORT_SYSTEM_PROMPT, LAB_REPORT_USER_INSTRUCTION};
use super::types::{ImageMediaType, RawExtraction, VisionClient};
use super::ExtractionError;

/// Top-level key every report object must carry.
const REPORT_KEY: &str = "report_info";

static REPORT_KEY_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""report_info"\s*:"#).expect("valid regex"));

static LAB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""lab_name"\s*:\s*"([^"]*)""#).expect("valid regex"));

static PATIENT_NAME_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""patient_info"\s*:\s*\{[^}]*?"name"\s*:\s*"([^"]*)""#).expect("valid regex")
});

static PATIENT_NAME_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)patient(?:'s)?\s+name\s*:\s*([^\n\r,;]+)").expect("valid regex")
});

static TEST_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""test_name"\s*:\s*"([^"]*)""#).expect("valid regex"));

static TEST_CATEGORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""test_category"\s*:\s*"([^"]*)""#).expect("valid regex"));

/// Sends lab-report images to a vision model and returns the raw tree.
///
/// Built once at startup and shared; holds no per-request state.
pub struct LabReportExtractor {
    client: Arc<dyn VisionClient + Send + Sync>,
    timeout: Duration,
}

impl LabReportExtractor {
    pub fn new(client: Arc<dyn VisionClient + Send + Sync>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Extract structured data from one page image.
    ///
    /// Errors only on transport, API, timeout or worker failure.
    pub async fn extract(
        &self,
        image_bytes: Vec<u8>,
        media_type: ImageMediaType,
    ) -> Result<RawExtraction, ExtractionError> {
        let span = tracing::info_span!(
            "lab_report_extract",
            model = %self.client.model_name(),
            media_type = media_type.as_mime(),
            image_size = image_bytes.len(),
        );
        let start = Instant::now();

        let encoded = base64::engine::general_purpose::STANDARD.encode(&image_bytes);
        let client = Arc::clone(&self.client);
        let worker = tokio::task::spawn_blocking(move || {
            client.complete_with_image(
                LAB_REPORT_SYSTEM_PROMPT,
                LAB_REPORT_USER_INSTRUCTION,
                &encoded,
                media_type,
            )
        });

        let timeout_secs = self.timeout.as_secs();
        async move {
            let response = match tokio::time::timeout(self.timeout, worker).await {
                Err(_) => {
                    tracing::error!(timeout_secs, "Vision extraction timed out");
                    return Err(ExtractionError::Timeout(timeout_secs));
                }
                Ok(Err(join_error)) => {
                    return Err(ExtractionError::Worker(join_error.to_string()))
                }
                Ok(Ok(result)) => result?,
            };

            let raw = parse_model_response(&response);

            tracing::info!(
                elapsed_ms = %start.elapsed().as_millis(),
                response_len = response.len(),
                top_level_keys = raw.as_object().map(|o| o.len()).unwrap_or(0),
                "Vision extraction complete"
            );
            Ok(raw)
        }
        .instrument(span)
        .await
    }
}

/// Turn the model's free-form reply into a JSON object.
///
/// Tiers, first success wins:
/// a. the text parses as an object;
/// b. the repaired text parses as an object;
/// c. a `{...}` span holding a top-level `report_info` repairs and parses;
/// d. default skeleton, filled with whatever identity fields can be scraped.
pub fn parse_model_response(text: &str) -> RawExtraction {
    if let Some(map) = parse_object(text.trim()) {
        return Value::Object(map);
    }

    if let Some(map) = parse_object(&repair(text)) {
        tracing::warn!(response_len = text.len(), "Model response needed JSON repair");
        return Value::Object(map);
    }

    if let Some(map) = anchored_candidates(text).find_map(|candidate| {
        parse_object(&repair(candidate)).filter(|map| map.contains_key(REPORT_KEY))
    }) {
        tracing::warn!(
            response_len = text.len(),
            "Model response recovered from anchored report object"
        );
        return Value::Object(map);
    }

    tracing::warn!(
        response_len = text.len(),
        "Model response unparseable, falling back to default skeleton"
    );
    scrape_into_skeleton(text)
}

/// `{...}` spans mentioning `"report_info":`, one per opening brace in text
/// order. A balanced object is preferred; an unclosed one runs to the last
/// `}` in the text.
fn anchored_candidates(text: &str) -> impl Iterator<Item = &str> {
    let last_brace = text.rfind('}');
    text.match_indices('{').filter_map(move |(start, _)| {
        let span = balanced_object_at(text, start).or_else(|| match last_brace {
            Some(end) if end > start => Some(&text[start..=end]),
            _ => None,
        })?;
        REPORT_KEY_FIELD.is_match(span).then_some(span)
    })
}

fn scrape_into_skeleton(text: &str) -> RawExtraction {
    let mut skeleton = default_skeleton();

    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut scraped = Vec::new();
    if let Some(lab) = capture(&LAB_NAME) {
        skeleton["report_info"]["lab_name"] = Value::String(lab);
        scraped.push("lab_name");
    }
    if let Some(name) = capture(&PATIENT_NAME_FIELD).or_else(|| capture(&PATIENT_NAME_TEXT)) {
        skeleton["patient_info"]["name"] = Value::String(name);
        scraped.push("patient_name");
    }
    if let Some(test) = capture(&TEST_NAME) {
        skeleton["test_name"] = Value::String(test);
        scraped.push("test_name");
    }
    if let Some(category) = capture(&TEST_CATEGORY) {
        skeleton["test_category"] = Value::String(category);
        scraped.push("test_category");
    }

    if !scraped.is_empty() {
        tracing::debug!(fields = ?scraped, "Scraped identity fields into skeleton");
    }
    skeleton
}
