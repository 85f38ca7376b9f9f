// graph_ingest/src/persist/truncate.rs
// Error-list truncation for loader payloads. The loader reports errors in
// `errors.errorLogs` for the job and in `loadDetails[*].errors` per source.
// Each list longer than the cap keeps its first `max_errors` entries plus one
// `TRUNCATED` marker, with the true length stored as `originalErrorCount`.

use serde_json::{Map, Value, json};
use tracing::info;

pub const TRUNCATED_CODE: &str = "TRUNCATED";
pub const SYSTEM_FILE_NAME: &str = "SYSTEM_MESSAGE";

/// Pretty-printed (2-space) JSON size in KB; an absent or empty payload is 0.
pub fn payload_size_kb(payload: Option<&Value,>,) -> f64 {
    match payload {
        None | Some(Value::Null,) => 0.0,
        Some(Value::Object(map,),) if map.is_empty() => 0.0,
        Some(value,) => serde_json::to_vec_pretty(value,)
            .map(|bytes| bytes.len() as f64 / 1024.0,)
            .unwrap_or(0.0,),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq,)]
pub struct TruncationReport {
    pub dropped:              usize,
    /// Length of `errors.errorLogs` before truncation, when it was truncated.
    pub original_error_count: Option<usize,>,
}

fn truncation_marker(dropped: usize,) -> Value {
    json!({
        "errorMessage": format!("... and {} more errors (truncated for storage)", dropped),
        "errorCode": TRUNCATED_CODE,
        "fileName": SYSTEM_FILE_NAME,
    })
}

/// Caps `container[list_key]` and stamps `originalErrorCount` on `container`.
fn truncate_list(container: &mut Map<String, Value,>, list_key: &str, max_errors: usize,) -> Option<usize,> {
    let errors = container.get_mut(list_key,)?.as_array_mut()?;
    let original = errors.len();
    if original <= max_errors {
        return None;
    }
    errors.truncate(max_errors,);
    errors.push(truncation_marker(original - max_errors,),);
    container.insert("originalErrorCount".to_string(), json!(original),);
    Some(original,)
}

/// Returns a copy of `payload` with every error list capped at `max_errors`.
pub fn truncate_errors_in_payload(payload: &Value, max_errors: usize,) -> (Value, TruncationReport,) {
    let mut truncated = payload.clone();
    let mut report = TruncationReport::default();

    let Some(root,) = truncated.as_object_mut() else {
        return (truncated, report,);
    };

    if let Some(errors,) = root.get_mut("errors",).and_then(Value::as_object_mut,) {
        if let Some(original,) = truncate_list(errors, "errorLogs", max_errors,) {
            report.dropped += original - max_errors;
            report.original_error_count = Some(original,);
            // Moved up to the payload root, where status readers look for it.
            errors.remove("originalErrorCount",);
        }
    }
    if let Some(original,) = report.original_error_count {
        root.insert("originalErrorCount".to_string(), json!(original),);
    }

    if let Some(details,) = root.get_mut("loadDetails",).and_then(Value::as_array_mut,) {
        for detail in details.iter_mut().filter_map(Value::as_object_mut,) {
            if let Some(original,) = truncate_list(detail, "errors", max_errors,) {
                report.dropped += original - max_errors;
            }
        }
    }

    if report.dropped > 0 {
        info!(dropped = report.dropped, max_errors, "Truncated errors from payload");
    }
    (truncated, report,)
}
