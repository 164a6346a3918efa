//! Planning orchestrator: scan result in, plan review (or signal) out
//!
//! Runs the deterministic mapper over every scanned file (the anthology
//! and LLM passes happen inside the mapper, deterministic first), then
//! hands the merged candidate set to the assembler. The first ambiguous
//! entity resolution short-circuits with a minted disambiguation token.

use crate::anthology::llm::GroupingAssist;
use crate::disambig::{DisambigLedger, PendingDisambiguation};
use crate::mapper::{Candidate, DeterministicMapper, MapOutcome};
use crate::plan;
use crate::providers::gateway::ProviderGateway;
use namegnome_common::events::{EventBus, NgEvent};
use namegnome_common::naming::normalize_title;
use namegnome_common::types::{PlanReview, ScanResult};
use namegnome_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Outcome of one planning run.
#[derive(Debug)]
pub enum PlanOutcome {
    Review(Box<PlanReview>),
    Disambiguation(PendingDisambiguation),
}

pub struct PlanEngine<'a> {
    pool: &'a SqlitePool,
    gateway: &'a ProviderGateway,
    assist: Option<&'a dyn GroupingAssist>,
}

impl<'a> PlanEngine<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        gateway: &'a ProviderGateway,
        assist: Option<&'a dyn GroupingAssist>,
    ) -> Self {
        Self {
            pool,
            gateway,
            assist,
        }
    }

    /// Generate a plan for a scan. `events` couples the run to a job's
    /// SSE channel; the returned value stays authoritative either way.
    pub async fn generate(
        &self,
        scan: &ScanResult,
        events: Option<(&EventBus, Uuid)>,
    ) -> Result<PlanOutcome> {
        let mapper = DeterministicMapper::new(self.pool, self.gateway);
        let ledger = DisambigLedger::new(self.pool);
        let total = scan.files.len() as u64;
        let mut candidates: Vec<Candidate> = Vec::new();

        for (index, file) in scan.files.iter().enumerate() {
            match mapper.map_file(file, self.assist).await? {
                MapOutcome::Mapped(mapped) => {
                    if let Some((bus, job_id)) = events {
                        for candidate in &mapped {
                            for warning in &candidate.warnings {
                                bus.emit(NgEvent::Warning {
                                    job_id,
                                    code: warning.clone(),
                                    detail: candidate.src_path.to_string_lossy().into_owned(),
                                });
                            }
                        }
                    }
                    candidates.extend(mapped);
                }
                MapOutcome::Ambiguous {
                    field,
                    candidates: options,
                    suggested,
                } => {
                    let title_norm = file
                        .parsed_title
                        .as_deref()
                        .or(file.parsed_artist.as_deref())
                        .map(normalize_title)
                        .unwrap_or_default();
                    let pending = ledger
                        .mint(
                            &scan.scan_id,
                            file.media_type.as_str(),
                            &field,
                            &title_norm,
                            file.parsed_year,
                            options,
                            suggested,
                        )
                        .await?;
                    return Ok(PlanOutcome::Disambiguation(pending));
                }
            }

            if let Some((bus, job_id)) = events {
                bus.emit(NgEvent::Progress {
                    job_id,
                    phase: "plan".into(),
                    completed: (index + 1) as u64,
                    total,
                });
            }
        }

        let review = plan::assemble(scan, candidates, chrono::Utc::now());
        tracing::info!(
            "Plan {} assembled: {} items across {} groups",
            review.plan_id,
            review.summary.total_items,
            review.groups.len()
        );
        Ok(PlanOutcome::Review(Box::new(review)))
    }
}
