// graph_ingest/src/persist/persister.rs
// Writes terminal job outcomes, shedding detail until the record fits.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use super::truncate::{payload_size_kb, truncate_errors_in_payload};
use super::{CasOutcome, StatusStore, TerminalUpdate};
use crate::config::PersistLimits;
use crate::error::IngestError;
use crate::loader::LoadStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
pub enum TruncationTier {
    /// Each error list capped at this many entries.
    Errors(usize,),
    NoPayload,
}

impl fmt::Display for TruncationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result {
        match self {
            TruncationTier::Errors(max,) => write!(f, "errors capped at {}", max),
            TruncationTier::NoPayload => f.write_str("payload dropped",),
        }
    }
}

#[derive(Debug, Clone, PartialEq,)]
pub enum PersistOutcome {
    Stored,
    Degraded(TruncationTier,),
    /// Another writer already moved the record out of a live status.
    Conflict { current: LoadStatus, },
    Failed(String,),
}

impl PersistOutcome {
    pub fn is_written(&self,) -> bool {
        matches!(self, PersistOutcome::Stored | PersistOutcome::Degraded(_))
    }
}

struct Candidate {
    tier:                 Option<TruncationTier,>,
    payload:              Option<Value,>,
    original_error_count: Option<usize,>,
}

pub struct SizeBoundedPersister {
    store:  Arc<dyn StatusStore,>,
    limits: PersistLimits,
}

impl SizeBoundedPersister {
    pub fn new(store: Arc<dyn StatusStore,>, limits: PersistLimits,) -> Self {
        Self { store, limits, }
    }

    /// Smallest-first list of payload shapes worth trying, starting from the first
    /// one under the size threshold. The payload-free shape is always last.
    fn candidates(&self, payload: Option<&Value,>,) -> Vec<Candidate,> {
        let mut candidates = Vec::new();
        let threshold = self.limits.payload_threshold_kb;

        if let Some(full,) = payload {
            let size = payload_size_kb(Some(full,),);
            info!(size_kb = size, "Original payload size");
            if size <= threshold {
                candidates.push(Candidate {
                    tier:                 None,
                    payload:              Some(full.clone(),),
                    original_error_count: None,
                },);
            } else {
                warn!(size_kb = size, threshold, "Payload exceeds limit, truncating errors");
            }

            for &max_errors in &self.limits.truncation_tiers {
                let (truncated, report,) = truncate_errors_in_payload(full, max_errors,);
                let size = payload_size_kb(Some(&truncated,),);
                info!(max_errors, size_kb = size, "Payload size after truncation");
                if candidates.is_empty() && size > threshold {
                    continue;
                }
                candidates.push(Candidate {
                    tier:                 Some(TruncationTier::Errors(max_errors,),),
                    payload:              Some(truncated,),
                    original_error_count: report.original_error_count,
                },);
            }
        }

        candidates.push(Candidate {
            tier:                 payload.map(|_| TruncationTier::NoPayload,),
            payload:              None,
            original_error_count: None,
        },);
        candidates
    }

    pub async fn persist(
        &self,
        load_id: &str,
        status: &LoadStatus,
        total_records: u64,
        time_spent: u64,
        source_path: &str,
        payload: Option<&Value,>,
    ) -> PersistOutcome {
        let expected = [LoadStatus::NotStarted, LoadStatus::InProgress];

        for candidate in self.candidates(payload,) {
            let loader_response = candidate
                .payload
                .as_ref()
                .and_then(|p| serde_json::to_string_pretty(p,).ok(),)
                .unwrap_or_else(|| "{}".to_string(),);
            let update = TerminalUpdate {
                load_id: load_id.to_string(),
                load_status: status.clone(),
                total_records,
                time_spent,
                source_path: source_path.to_string(),
                payload: candidate.payload,
                loader_response,
                original_error_count: candidate.original_error_count,
            };

            match self.store.update_if(&update, &expected,).await {
                Ok(CasOutcome::Applied,) => {
                    return match candidate.tier {
                        None => {
                            info!(load_id, %status, "Stored load record");
                            PersistOutcome::Stored
                        },
                        Some(tier,) => {
                            warn!(load_id, %status, %tier, "Stored degraded load record");
                            PersistOutcome::Degraded(tier,)
                        },
                    };
                },
                Ok(CasOutcome::Conflict { current, },) => {
                    warn!(load_id, %current, attempted = %status, "Load record already terminal, skipping write");
                    return PersistOutcome::Conflict { current, };
                },
                Err(IngestError::ItemTooLarge(size,),) => {
                    warn!(load_id, size, "Store rejected record as too large, shrinking");
                    continue;
                },
                Err(e,) => {
                    error!(load_id, error = %e, "Failed to update load log");
                    return PersistOutcome::Failed(e.to_string(),);
                },
            }
        }

        error!(load_id, "Record too large even without payload");
        PersistOutcome::Failed("record exceeds the store item limit without payload".to_string(),)
    }
}
