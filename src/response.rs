// graph_ingest/src/response.rs
// Caller-facing rendering of load results under a transport size limit.

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::Result;
use crate::loader::LoadOutcome;
use crate::persist::LoadRecord;

#[derive(Debug, Clone, PartialEq,)]
pub enum CallerResponse {
    /// `{"response": "<record JSON>"}`, within the limit.
    Full(String,),
    /// Human-readable digest returned instead of an oversized body.
    Summary(String,),
    Message(String,),
}

impl CallerResponse {
    pub fn body(&self,) -> &str {
        match self {
            CallerResponse::Full(body,) | CallerResponse::Summary(body,) | CallerResponse::Message(body,) => body,
        }
    }

    pub fn is_summary(&self,) -> bool {
        matches!(self, CallerResponse::Summary(_))
    }
}

impl fmt::Display for CallerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result {
        f.write_str(self.body(),)
    }
}

/// The handful of fields kept when the full body is too large.
#[derive(Debug, Clone, PartialEq,)]
pub struct ResponseSummary<'a,> {
    pub load_id:       &'a str,
    pub source_path:   &'a str,
    pub status:        &'a str,
    pub total_records: u64,
    pub time_spent:    u64,
}

impl ResponseSummary<'_,> {
    pub fn render(&self, limit_kb: f64,) -> String {
        format!(
            "The bulk load job details exceed the size limit ({limit}KB). Summary information:\n\n\
             - Load ID: {id}\n\n\
             - File Path: {path}\n\n\
             - Status: {status}\n\n\
             - Total Records: {records}\n\n\
             - Time: {time}\n\n\
             Check the <a href=\"/#/data-loader/{id}\">Data Loader Report</a> for complete details.",
            limit = limit_kb,
            id = self.load_id,
            path = self.source_path,
            status = self.status,
            records = self.total_records,
            time = self.time_spent,
        )
    }
}

/// Serializes `detail` as `{"response": "<json>"}`, or the summary when that exceeds `limit_kb`.
pub fn guarded<T: Serialize,>(detail: &T, summary: &ResponseSummary<'_,>, limit_kb: f64,) -> Result<CallerResponse,> {
    let inner = serde_json::to_string(detail,)?;
    let body = serde_json::to_string(&json!({ "response": inner }),)?;
    let size_kb = body.len() as f64 / 1024.0;
    info!(size_kb, "Response size");
    if size_kb > limit_kb {
        info!(load_id = summary.load_id, "Returning simplified response due to size limit");
        return Ok(CallerResponse::Summary(summary.render(limit_kb,),),);
    }
    Ok(CallerResponse::Full(body,),)
}

pub fn render_record(record: &LoadRecord, limit_kb: f64,) -> Result<CallerResponse,> {
    let summary = ResponseSummary {
        load_id:       &record.load_id,
        source_path:   &record.source_path,
        status:        record.load_status.as_str(),
        total_records: record.total_records,
        time_spent:    record.time_spent,
    };
    guarded(record, &summary, limit_kb,)
}

/// Answer for a status lookup; a missing record is a plain message, not an error.
pub fn render_lookup(load_id: &str, record: Option<&LoadRecord,>, limit_kb: f64,) -> Result<CallerResponse,> {
    match record {
        Some(record,) => render_record(record, limit_kb,),
        None => Ok(CallerResponse::Message(format!("Load ID: {} not found", load_id),),),
    }
}

pub fn render_outcome(outcome: &LoadOutcome, limit_kb: f64,) -> Result<CallerResponse,> {
    match outcome {
        LoadOutcome::Finished {
            load_id,
            source_path,
            snapshot,
            ..
        } => {
            let detail: Value = json!({
                "loadId": load_id,
                "sourcePath": source_path,
                "loadStatus": snapshot.status.as_str(),
                "totalRecords": snapshot.total_records,
                "timeSpent": snapshot.time_spent,
                "payload": snapshot.payload,
            });
            let summary = ResponseSummary {
                load_id,
                source_path,
                status: snapshot.status.as_str(),
                total_records: snapshot.total_records,
                time_spent: snapshot.time_spent,
            };
            guarded(&detail, &summary, limit_kb,)
        },
        LoadOutcome::Rejected { message, .. } => Ok(CallerResponse::Message(message.clone(),),),
        LoadOutcome::Suspended {
            load_id,
            last_status,
            polls,
            ..
        } => Ok(CallerResponse::Message(format!(
            "Load ID: {} is still {} after {} polls; resume it later to record the final status",
            load_id, last_status, polls
        ),),),
        LoadOutcome::AlreadyTerminal(record,) => render_record(record, limit_kb,),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadStatus;

    fn record(errors: usize,) -> LoadRecord {
        let logs: Vec<Value,> = (0..errors)
            .map(|i| json!({"errorCode": "PARSING_ERROR", "errorMessage": format!("row {i} has the wrong width"), "fileName": "v_Product_9.csv"}))
            .collect();
        LoadRecord {
            load_id:              "job-7".into(),
            start_time:           "2024-01-01 00:00:00".into(),
            source_path:          "output/v/".into(),
            load_status:          LoadStatus::CompletedWithErrors,
            total_records:        9,
            time_spent:           3,
            payload:              Some(json!({"errors": {"errorLogs": logs}}),),
            loader_response:      None,
            original_error_count: None,
        }
    }

    #[test]
    fn small_records_are_returned_whole() {
        let response = render_record(&record(3,), 25.0,).unwrap();
        let CallerResponse::Full(body,) = &response else {
            panic!("expected the full body");
        };
        let outer: Value = serde_json::from_str(body,).unwrap();
        let inner: LoadRecord = serde_json::from_str(outer["response"].as_str().unwrap(),).unwrap();
        assert_eq!(inner, record(3));
    }

    #[test]
    fn large_records_become_a_summary() {
        let response = render_record(&record(2_000,), 25.0,).unwrap();
        assert!(response.is_summary());
        let body = response.body();
        assert!(body.starts_with("The bulk load job details exceed the size limit (25KB)"));
        assert!(body.contains("- Load ID: job-7"));
        assert!(body.contains("- Status: LOAD_COMPLETED_WITH_ERRORS"));
        assert!(body.contains("- Total Records: 9"));
        assert!(body.contains("/#/data-loader/job-7"));
    }

    #[test]
    fn unknown_load_is_a_message() {
        let response = render_lookup("nope", None, 25.0,).unwrap();
        assert_eq!(response, CallerResponse::Message("Load ID: nope not found".into()));
    }
}
