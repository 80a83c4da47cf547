use serde_json::{json, Value};

use crate::pipeline::structuring::types::{
    DEFAULT_LAB_NAME, DEFAULT_TEST_CATEGORY, DEFAULT_TEST_NAME,
};

/// Top-level keys every extraction is expected to carry.
pub const TOP_LEVEL_KEYS: &[&str] = &[
    "report_info",
    "patient_info",
    "collection_info",
    "test_category",
    "test_name",
    "test_results",
    "clinical_notes",
    "metadata",
];

pub const LAB_REPORT_SYSTEM_PROMPT: &str = r#"
You are an OCR assistant specializing in extracting structured data from medical lab report images.

Your task is to extract all relevant information from the lab report image and return it in a specific JSON format.

Extract the following types of information:
1. Lab information (name, registration number, contact details, signatories)
2. Patient information (name, age, gender, ID, referred by)
3. Collection information (dates and times)
4. Test category and name
5. All test results with values, units, and reference ranges
6. Clinical notes if present
7. Any metadata (page information, disclaimers)

For each test result, indicate whether it's normal or abnormal based on the reference range.

Return the data in the following JSON format:
```json
{
  "report_info": {
    "lab_name": "",
    "lab_registration_number": "",
    "lab_contact": {
      "phone": "",
      "email": "",
      "website": "",
      "address": ""
    },
    "lab_signatories": [
      {
        "name": "",
        "qualification": "",
        "designation": ""
      }
    ],
    "instruments": ""
  },
  "patient_info": {
    "name": "",
    "age": null,
    "gender": "",
    "patient_id": "",
    "referred_by": "",
    "registration_number": "",
    "sample_collection_location": ""
  },
  "collection_info": {
    "registered_on": "",
    "collected_on": "",
    "received_on": "",
    "reported_on": ""
  },
  "test_category": "",
  "test_name": "",
  "test_results": {},
  "clinical_notes": {
    "notes": "",
    "possible_causes": {}
  },
  "metadata": {
    "page_info": "",
    "disclaimer": "",
    "work_timings": ""
  }
}
```

For the test_results object, use a flexible structure based on the report format: group tests
by category or sub-category when the report does. Each individual test must be an object with
"value", "unit", "reference_range" (as "min-max" when numeric), "is_normal" (boolean), and
"flag" (H, L or similar, only if abnormal).

Write dates exactly as printed on the report.

Only extract information that is actually present in the image. If something is not present,
either omit it or use null.

Respond with ONLY the JSON. Do not include any explanations or descriptions.
"#;

pub const LAB_REPORT_USER_INSTRUCTION: &str =
    "Extract all data from this lab report and return it in the JSON format as instructed.";

/// Skeleton used when no tier of the fallback ladder yields JSON.
///
/// All canonical top-level keys are present; identity fields carry the
/// same sentinels the normalizer applies.
pub fn default_skeleton() -> Value {
    json!({
        "report_info": {
            "lab_name": DEFAULT_LAB_NAME,
            "lab_registration_number": null,
            "lab_contact": null,
            "lab_signatories": [],
            "instruments": null
        },
        "patient_info": {
            "name": null,
            "age": null,
            "gender": null,
            "patient_id": null,
            "referred_by": null,
            "registration_number": null,
            "sample_collection_location": null
        },
        "collection_info": {
            "registered_on": null,
            "collected_on": null,
            "received_on": null,
            "reported_on": null
        },
        "test_category": DEFAULT_TEST_CATEGORY,
        "test_name": DEFAULT_TEST_NAME,
        "test_results": {},
        "clinical_notes": {
            "notes": null,
            "possible_causes": {}
        },
        "metadata": {
            "page_info": null,
            "disclaimer": null,
            "work_timings": null
        }
    })
}
