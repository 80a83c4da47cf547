use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use super::dates::parse_report_timestamp;
use super::test_results::build_test_results;
use super::types::{
    CanonicalReport, ClinicalNotes, CollectionInfo, FileType, LabContact, LabSignatory,
    PatientInfo, ReportInfo, ReportMetadata, DEFAULT_LAB_NAME, DEFAULT_TEST_CATEGORY,
    DEFAULT_TEST_NAME,
};
use crate::pipeline::extraction::RawExtraction;

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,3})(?:\.\d+)?(?:\D|$)").expect("valid regex"));

static SUB_YEAR_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(month|mon|week|wk|day)s?\b").expect("valid regex"));

static EMPTY: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);

/// Map a raw extraction onto the canonical report, stamped with the
/// current time. Never fails: missing or malformed fields are defaulted.
pub fn normalize(
    raw: &RawExtraction,
    file_type: FileType,
    original_file_name: &str,
    phone_number: &str,
) -> CanonicalReport {
    normalize_at(raw, file_type, original_file_name, phone_number, Utc::now())
}

/// `normalize` with an explicit clock.
pub fn normalize_at(
    raw: &RawExtraction,
    file_type: FileType,
    original_file_name: &str,
    phone_number: &str,
    now: DateTime<Utc>,
) -> CanonicalReport {
    let root = raw.as_object().unwrap_or_else(|| {
        tracing::warn!("Raw extraction is not an object, normalizing as empty");
        &*EMPTY
    });

    let test_category =
        text(root.get("test_category")).unwrap_or_else(|| DEFAULT_TEST_CATEGORY.to_string());
    let test_name = text(root.get("test_name")).unwrap_or_else(|| DEFAULT_TEST_NAME.to_string());
    let test_results = build_test_results(root.get("test_results").unwrap_or(&Value::Null));

    let report = CanonicalReport {
        report_info: report_info(section(root, "report_info")),
        patient_info: patient_info(section(root, "patient_info"), phone_number),
        collection_info: collection_info(section(root, "collection_info")),
        metadata: metadata(
            section(root, "metadata"),
            file_type,
            original_file_name,
            &test_name,
        ),
        clinical_notes: clinical_notes(section(root, "clinical_notes")),
        test_category,
        test_name,
        test_results,
        created_at: now,
        updated_at: now,
    };

    tracing::debug!(
        file_type = report.metadata.file_type.as_str(),
        result_count = report.test_results.values().map(|n| n.leaf_count()).sum::<usize>(),
        lab_identified = report.report_info.lab_name != DEFAULT_LAB_NAME,
        "Report normalized"
    );
    report
}

fn section<'a>(root: &'a Map<String, Value>, key: &str) -> &'a Map<String, Value> {
    root.get(key).and_then(Value::as_object).unwrap_or(&*EMPTY)
}

fn report_info(info: &Map<String, Value>) -> ReportInfo {
    ReportInfo {
        lab_name: text(info.get("lab_name")).unwrap_or_else(|| DEFAULT_LAB_NAME.to_string()),
        lab_registration_number: text(info.get("lab_registration_number")),
        lab_contact: info
            .get("lab_contact")
            .and_then(Value::as_object)
            .map(|contact| LabContact {
                phone: text(contact.get("phone")),
                email: text(contact.get("email")),
                website: text(contact.get("website")),
                address: text(contact.get("address")),
            })
            .filter(|contact| !contact.is_empty()),
        lab_signatories: signatories(info.get("lab_signatories")),
        instruments: text(info.get("instruments")),
    }
}

/// Signatories may come as a list, a single object, or bare names.
/// Entries without a name are dropped.
fn signatories(value: Option<&Value>) -> Vec<LabSignatory> {
    let entries = match value {
        Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(single @ (Value::Object(_) | Value::String(_))) => vec![single],
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(fields) => Some(LabSignatory {
                name: text(fields.get("name"))?,
                qualification: text(fields.get("qualification")),
                designation: text(fields.get("designation")),
            }),
            Value::String(_) => Some(LabSignatory {
                name: text(Some(entry))?,
                qualification: None,
                designation: None,
            }),
            _ => None,
        })
        .collect()
}

fn patient_info(info: &Map<String, Value>, phone_number: &str) -> PatientInfo {
    if let Some(extracted) = text(info.get("phone_number")) {
        if extracted != phone_number {
            tracing::debug!("Replacing extracted patient phone with uploader's number");
        }
    }

    PatientInfo {
        name: text(info.get("name")),
        age: info.get("age").and_then(parse_age),
        gender: text(info.get("gender")),
        patient_id: text(info.get("patient_id")),
        phone_number: phone_number.to_string(),
        referred_by: text(info.get("referred_by")),
        registration_number: text(info.get("registration_number")),
        sample_collection_location: text(info.get("sample_collection_location")),
    }
}

/// Whole years from `42`, `42.0`, `"42"`, `"42 Years"`, `"42Y/F"`.
/// Ages given in months, weeks or days do not convert to years.
pub fn parse_age(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v.trunc() as u64))
            .and_then(|v| u32::try_from(v).ok())
            .filter(|age| *age <= 150),
        Value::String(s) => {
            if SUB_YEAR_UNIT.is_match(s) {
                return None;
            }
            LEADING_NUMBER
                .captures(s)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|age| *age <= 150)
        }
        _ => None,
    }
}

fn collection_info(info: &Map<String, Value>) -> CollectionInfo {
    CollectionInfo {
        registered_on: timestamp(info, "registered_on"),
        collected_on: timestamp(info, "collected_on"),
        received_on: timestamp(info, "received_on"),
        reported_on: timestamp(info, "reported_on"),
    }
}

fn timestamp(info: &Map<String, Value>, field: &'static str) -> Option<NaiveDateTime> {
    match info.get(field)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => {
            let parsed = parse_report_timestamp(s);
            if parsed.is_none() {
                tracing::warn!(field, raw_len = s.len(), "Unparseable collection timestamp dropped");
            }
            parsed
        }
        _ => {
            tracing::warn!(field, "Non-text collection timestamp dropped");
            None
        }
    }
}

fn metadata(
    meta: &Map<String, Value>,
    file_type: FileType,
    original_file_name: &str,
    test_name: &str,
) -> ReportMetadata {
    ReportMetadata {
        file_type,
        original_file_path: original_file_name.to_string(),
        report_type: text(meta.get("report_type")).unwrap_or_else(|| test_name.to_string()),
        page_info: text(meta.get("page_info")),
        disclaimer: text(meta.get("disclaimer")),
        work_timings: text(meta.get("work_timings")),
    }
}

fn clinical_notes(notes: &Map<String, Value>) -> Option<ClinicalNotes> {
    let possible_causes: BTreeMap<String, BTreeMap<String, String>> = notes
        .get("possible_causes")
        .and_then(Value::as_object)
        .map(|params| {
            params
                .iter()
                .filter_map(|(parameter, directions)| {
                    let directions: BTreeMap<String, String> = directions
                        .as_object()?
                        .iter()
                        .filter_map(|(direction, cause)| {
                            Some((direction.clone(), text(Some(cause))?))
                        })
                        .collect();
                    (!directions.is_empty()).then(|| (parameter.clone(), directions))
                })
                .collect()
        })
        .unwrap_or_default();

    let clinical = ClinicalNotes {
        notes: text(notes.get("notes")),
        possible_causes,
    };
    (clinical.notes.is_some() || !clinical.possible_causes.is_empty()).then_some(clinical)
}

/// Trimmed non-empty text; numbers are rendered as written.
pub(super) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::default_skeleton;
    use crate::pipeline::structuring::types::{ResultValue, TestResultNode};
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    const PHONE: &str = "+15551234567";

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn run(raw: Value) -> CanonicalReport {
        normalize_at(&raw, FileType::Image, "report.jpg", PHONE, fixed_now())
    }

    fn assert_invariants(report: &CanonicalReport) {
        assert!(!report.report_info.lab_name.is_empty());
        assert!(!report.test_category.is_empty());
        assert!(!report.test_name.is_empty());
        assert!(!report.metadata.report_type.is_empty());
        assert_eq!(report.patient_info.phone_number, PHONE);
        assert_eq!(report.created_at, report.updated_at);
    }

    #[test]
    fn hemoglobin_scenario() {
        let report = run(json!({
            "patient_info": {},
            "test_results": {
                "Hemoglobin": {"value": 10, "unit": "g/dL", "reference_range": "12-16"}
            }
        }));

        assert_eq!(report.patient_info.phone_number, PHONE);
        let hb = report.test_results["Hemoglobin"].as_leaf().unwrap();
        assert!(!hb.is_normal);
        assert_eq!(report.test_category, "General");
        assert_eq!(report.test_name, "Laboratory Test");
        assert_invariants(&report);
    }

    #[test]
    fn arbitrary_shapes_never_break_invariants() {
        let inputs = [
            Value::Null,
            json!([]),
            json!("text"),
            json!(42),
            json!({}),
            json!({"report_info": "x", "patient_info": [1], "collection_info": 5}),
            json!({"test_name": "", "test_category": "   ", "report_info": {"lab_name": ""}}),
            json!({"test_results": {"a": {"b": {"c": {"value": null}}}}, "metadata": []}),
            json!({"clinical_notes": {"possible_causes": {"Hb": "low"}}}),
        ];
        for input in inputs {
            let report = run(input.clone());
            assert_invariants(&report);
            assert_eq!(report.report_info.lab_name, DEFAULT_LAB_NAME, "input {input}");
        }
    }

    #[test]
    fn skeleton_normalizes_to_defaults_plus_caller_fields() {
        let report = normalize_at(
            &default_skeleton(),
            FileType::Pdf,
            "scan.pdf",
            PHONE,
            fixed_now(),
        );
        assert_eq!(report.report_info.lab_name, DEFAULT_LAB_NAME);
        assert_eq!(report.test_category, DEFAULT_TEST_CATEGORY);
        assert_eq!(report.test_name, DEFAULT_TEST_NAME);
        assert_eq!(report.metadata.report_type, DEFAULT_TEST_NAME);
        assert_eq!(report.metadata.file_type, FileType::Pdf);
        assert_eq!(report.metadata.original_file_path, "scan.pdf");
        assert_eq!(report.patient_info.phone_number, PHONE);
        assert!(report.test_results.is_empty());
        assert_eq!(report.collection_info, CollectionInfo::default());
        assert_eq!(report.clinical_notes, None);
        assert_eq!(report.created_at, fixed_now());
    }

    #[test]
    fn caller_phone_overrides_extracted_phone() {
        let report = run(json!({"patient_info": {"phone_number": "000", "name": "Asha Rao"}}));
        assert_eq!(report.patient_info.phone_number, PHONE);
        assert_eq!(report.patient_info.name.as_deref(), Some("Asha Rao"));
    }

    #[test]
    fn report_type_defaults_to_test_name() {
        let report = run(json!({"test_name": "Complete Blood Count"}));
        assert_eq!(report.metadata.report_type, "Complete Blood Count");

        let report = run(json!({"test_name": "CBC", "metadata": {"report_type": "Hematology"}}));
        assert_eq!(report.metadata.report_type, "Hematology");
    }

    #[test]
    fn collection_dates_parsed_or_absent() {
        let report = run(json!({
            "collection_info": {
                "registered_on": "15/03/2023",
                "collected_on": "2023-03-15",
                "received_on": "15-Mar-2023",
                "reported_on": "not-a-date"
            }
        }));
        let expected = NaiveDate::from_ymd_opt(2023, 3, 15).unwrap();
        let info = &report.collection_info;
        assert_eq!(info.registered_on.map(|d| d.date()), Some(expected));
        assert_eq!(info.collected_on.map(|d| d.date()), Some(expected));
        assert_eq!(info.received_on.map(|d| d.date()), Some(expected));
        assert_eq!(info.reported_on, None);
    }

    #[test]
    fn non_text_and_empty_dates_absent() {
        let report = run(json!({
            "collection_info": {"registered_on": 20230315, "collected_on": "", "received_on": null}
        }));
        assert_eq!(report.collection_info, CollectionInfo::default());
    }

    #[test]
    fn serialized_dates_are_never_raw_text() {
        let report = run(json!({"collection_info": {"collected_on": "yesterday"}}));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["collection_info"]["collected_on"], Value::Null);
    }

    #[test]
    fn lab_details_mapped() {
        let report = run(json!({
            "report_info": {
                "lab_name": " Apollo Diagnostics ",
                "lab_registration_number": "NABL-1234",
                "lab_contact": {"phone": "040-1234", "email": "", "website": null},
                "lab_signatories": [
                    {"name": "Dr. Mehta", "qualification": "MD Pathology", "designation": "Consultant"},
                    {"qualification": "MSc"},
                    "Dr. Iyer"
                ],
                "instruments": "Sysmex XN-1000"
            }
        }));
        let info = &report.report_info;
        assert_eq!(info.lab_name, "Apollo Diagnostics");
        assert_eq!(info.lab_registration_number.as_deref(), Some("NABL-1234"));
        let contact = info.lab_contact.as_ref().unwrap();
        assert_eq!(contact.phone.as_deref(), Some("040-1234"));
        assert_eq!(contact.email, None);
        assert_eq!(info.lab_signatories.len(), 2);
        assert_eq!(info.lab_signatories[0].designation.as_deref(), Some("Consultant"));
        assert_eq!(info.lab_signatories[1].name, "Dr. Iyer");
    }

    #[test]
    fn empty_contact_becomes_absent() {
        let report = run(json!({"report_info": {"lab_contact": {"phone": "", "email": null}}}));
        assert_eq!(report.report_info.lab_contact, None);
    }

    #[test]
    fn age_parsed_leniently() {
        assert_eq!(parse_age(&json!(42)), Some(42));
        assert_eq!(parse_age(&json!(42.7)), Some(42));
        assert_eq!(parse_age(&json!("42")), Some(42));
        assert_eq!(parse_age(&json!("42 Years")), Some(42));
        assert_eq!(parse_age(&json!("42Y/F")), Some(42));
        assert_eq!(parse_age(&json!("1234")), None);
        assert_eq!(parse_age(&json!("8 Months")), None);
        assert_eq!(parse_age(&json!(-3)), None);
        assert_eq!(parse_age(&json!("unknown")), None);
        assert_eq!(parse_age(&json!(null)), None);
    }

    #[test]
    fn clinical_notes_mapped() {
        let report = run(json!({
            "clinical_notes": {
                "notes": "Correlate clinically.",
                "possible_causes": {
                    "Hemoglobin": {"Low": "Iron deficiency", "High": 7},
                    "Platelets": "n/a"
                }
            }
        }));
        let notes = report.clinical_notes.unwrap();
        assert_eq!(notes.notes.as_deref(), Some("Correlate clinically."));
        assert_eq!(notes.possible_causes.len(), 1);
        assert_eq!(notes.possible_causes["Hemoglobin"]["Low"], "Iron deficiency");
        assert_eq!(notes.possible_causes["Hemoglobin"]["High"], "7");
    }

    #[test]
    fn nested_results_flagged_through_normalizer() {
        let report = run(json!({
            "test_category": "HAEMATOLOGY",
            "test_name": "COMPLETE BLOOD COUNT",
            "test_results": {
                "RBC Indices": {
                    "MCV": {"value": "101", "unit": "fL", "reference_range": "80-100"},
                    "MCH": {"value": 29, "unit": "pg", "reference_range": "27-32"}
                }
            }
        }));
        let TestResultNode::Group(indices) = &report.test_results["RBC Indices"] else {
            panic!("expected group");
        };
        let mcv = indices["MCV"].as_leaf().unwrap();
        assert!(!mcv.is_normal);
        assert_eq!(mcv.value, Some(ResultValue::Text("101".into())));
        assert!(indices["MCH"].as_leaf().unwrap().is_normal);
    }

    #[test]
    fn normalize_uses_current_time() {
        let before = Utc::now();
        let report = normalize(&json!({}), FileType::Image, "a.png", PHONE);
        assert!(report.created_at >= before);
        assert_eq!(report.created_at, report.updated_at);
    }
}
