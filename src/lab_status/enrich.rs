use serde_json::Value;

use super::classify::classify;

/// Key of the lab-test mapping inside an extracted report.
pub const TEST_SUMMARY_KEY: &str = "test_summary";

/// Positions inside a `[value, unit, reference_range, status]` entry.
const VALUE_INDEX: usize = 0;
const REFERENCE_INDEX: usize = 2;
const STATUS_INDEX: usize = 3;

/// Minimum entry length before a status can be computed.
const MIN_CLASSIFIABLE_LEN: usize = 3;

/// Add a status to every `test_summary` entry of a report JSON string.
///
/// Fails soft: input that is not a JSON object, has no `test_summary`
/// object, or cannot be re-serialized is returned unchanged. Entry order
/// follows the source document.
pub fn enrich_report(report_json: &str) -> String {
    let mut root: Value = match serde_json::from_str(report_json) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Report is not valid JSON, skipping enrichment");
            return report_json.to_string();
        }
    };

    let enriched = match root.get_mut(TEST_SUMMARY_KEY) {
        Some(Value::Object(summary)) => {
            let mut count = 0usize;
            for entry in summary.values_mut() {
                if enrich_entry(entry) {
                    count += 1;
                }
            }
            count
        }
        _ => return report_json.to_string(),
    };

    match serde_json::to_string(&root) {
        Ok(json) => {
            tracing::debug!(enriched, "Lab statuses added");
            json
        }
        Err(_) => report_json.to_string(),
    }
}

/// Write the status into one entry. Returns `false` for entries that are
/// not arrays or have fewer than three fields; those are left untouched.
fn enrich_entry(entry: &mut Value) -> bool {
    let fields = match entry {
        Value::Array(fields) if fields.len() >= MIN_CLASSIFIABLE_LEN => fields,
        _ => return false,
    };

    let value = field_text(&fields[VALUE_INDEX]);
    let reference = field_text(&fields[REFERENCE_INDEX]);
    let status = classify(&value, &reference);

    fields.truncate(STATUS_INDEX + 1);
    if fields.len() == STATUS_INDEX {
        fields.push(Value::String(String::new()));
    }
    fields[STATUS_INDEX] = Value::String(status.as_str().to_string());
    true
}

/// Text form of a scalar field; containers and null read as empty.
fn field_text(field: &Value) -> String {
    match field {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}
