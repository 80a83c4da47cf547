use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel for a report whose laboratory could not be identified.
pub const DEFAULT_LAB_NAME: &str = "Unknown Lab";
pub const DEFAULT_TEST_CATEGORY: &str = "General";
pub const DEFAULT_TEST_NAME: &str = "Laboratory Test";

/// How the upload reached the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Image,
    #[serde(rename = "PDF")]
    Pdf,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Pdf => "PDF",
        }
    }
}

/// Normalized, schema-complete lab report ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalReport {
    pub report_info: ReportInfo,
    pub patient_info: PatientInfo,
    pub collection_info: CollectionInfo,
    pub test_category: String,
    pub test_name: String,
    pub test_results: BTreeMap<String, TestResultNode>,
    pub clinical_notes: Option<ClinicalNotes>,
    pub metadata: ReportMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportInfo {
    pub lab_name: String,
    pub lab_registration_number: Option<String>,
    pub lab_contact: Option<LabContact>,
    #[serde(default)]
    pub lab_signatories: Vec<LabSignatory>,
    pub instruments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabContact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
}

impl LabContact {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.email.is_none()
            && self.website.is_none()
            && self.address.is_none()
    }
}

/// Lab personnel who signed the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabSignatory {
    pub name: String,
    pub qualification: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: Option<String>,
    /// Whole years.
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub patient_id: Option<String>,
    /// Supplied by the uploader, never by the model.
    pub phone_number: String,
    pub referred_by: Option<String>,
    pub registration_number: Option<String>,
    pub sample_collection_location: Option<String>,
}

/// Sample timeline. Each field is either a parsed timestamp or absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub registered_on: Option<NaiveDateTime>,
    pub collected_on: Option<NaiveDateTime>,
    pub received_on: Option<NaiveDateTime>,
    pub reported_on: Option<NaiveDateTime>,
}

/// One entry of `test_results`: a measured value or a named group of
/// further entries (e.g. "Differential Count" → {"Neutrophils": ...}).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestResultNode {
    Leaf(TestResult),
    Group(BTreeMap<String, TestResultNode>),
}

impl TestResultNode {
    pub fn as_leaf(&self) -> Option<&TestResult> {
        match self {
            Self::Leaf(result) => Some(result),
            Self::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&BTreeMap<String, TestResultNode>> {
        match self {
            Self::Group(children) => Some(children),
            Self::Leaf(_) => None,
        }
    }

    /// Number of leaves under this node (1 for a leaf).
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Group(children) => children.values().map(Self::leaf_count).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub value: Option<ResultValue>,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub is_normal: bool,
    /// H, L or similar, as printed on the report.
    pub flag: Option<String>,
}

/// Reported value: numeric when the report prints a number, text otherwise
/// ("Positive", "Non-reactive", "< 0.5").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Number(serde_json::Number),
    Text(String),
}

impl ResultValue {
    /// Numeric reading, also for numbers written as text ("10.5").
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalNotes {
    pub notes: Option<String>,
    /// Parameter → {direction → cause}, e.g. "Hemoglobin" → {"Low": "Anemia"}.
    #[serde(default)]
    pub possible_causes: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub file_type: FileType,
    pub original_file_path: String,
    pub report_type: String,
    pub page_info: Option<String>,
    pub disclaimer: Option<String>,
    pub work_timings: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_type_serializes_as_report_labels() {
        assert_eq!(serde_json::to_value(FileType::Pdf).unwrap(), json!("PDF"));
        assert_eq!(serde_json::to_value(FileType::Image).unwrap(), json!("Image"));
        assert_eq!(FileType::Pdf.as_str(), "PDF");
    }

    #[test]
    fn nested_results_round_trip_through_untagged_nodes() {
        let value = json!({
            "Hemoglobin": {"value": 13.5, "unit": "g/dL", "reference_range": "12-16", "is_normal": true, "flag": null},
            "Differential Count": {
                "Neutrophils": {"value": "62", "unit": "%", "reference_range": "40-80", "is_normal": true, "flag": null}
            }
        });
        let results: BTreeMap<String, TestResultNode> = serde_json::from_value(value).unwrap();

        let hb = results["Hemoglobin"].as_leaf().unwrap();
        assert_eq!(hb.value.as_ref().and_then(ResultValue::as_f64), Some(13.5));

        let differential = results["Differential Count"].as_group().unwrap();
        assert!(differential["Neutrophils"].as_leaf().is_some());
        assert_eq!(results["Differential Count"].leaf_count(), 1);
    }

    #[test]
    fn integer_values_keep_integer_form() {
        let leaf = TestResult {
            value: Some(ResultValue::Number(10.into())),
            unit: Some("g/dL".into()),
            reference_range: Some("12-16".into()),
            is_normal: false,
            flag: None,
        };
        let value = serde_json::to_value(&leaf).unwrap();
        assert_eq!(value["value"], json!(10));
    }

    #[test]
    fn text_values_parse_as_numbers_when_numeric() {
        assert_eq!(ResultValue::Text(" 4.2 ".into()).as_f64(), Some(4.2));
        assert_eq!(ResultValue::Text("Positive".into()).as_f64(), None);
        assert_eq!(ResultValue::Text("NaN".into()).as_f64(), None);
    }

    #[test]
    fn empty_contact_detected() {
        assert!(LabContact::default().is_empty());
        let contact = LabContact {
            email: Some("lab@example.com".into()),
            ..Default::default()
        };
        assert!(!contact.is_empty());
    }
}
