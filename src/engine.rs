//! The workflow engine: drives one run from its entry stage to termination
//! or suspension.
//!
//! The engine invokes the active stage, appends its output to the run's
//! transcript, validates the stage's proposed destination against the
//! routing table, and either continues, suspends for human review, or
//! terminates. Suspension is an explicit flag plus a persisted checkpoint,
//! never a blocking call, so the process can fully exit between suspension
//! and resumption. Completion is detected from the transcript itself: the
//! analytics stage is the natural last step and its batch report heading in
//! the transcript tail is taken as sufficient evidence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::collaborators::{
    ApprovedSink, DimensionScorer, GenerationRequest, ItemGenerator, SimilarityScorer,
};
use crate::config::PipelineConfig;
use crate::diversity::{DiversityGate, DiversityVerdict};
use crate::error::PipelineError;
use crate::item::{ExamItem, QUALITY_FLOOR, ReviewRecord, ReviewStatus};
use crate::quality::{self, QualityRoute};
use crate::report;
use crate::routing::{RoutingTable, StageName};

/// Phrase whose appearance in the transcript tail signals completion.
/// Case-insensitive. Deliberately fuzzy: see the batch report heading.
const TERMINATION_PHRASE: &str = "batch report";
/// Number of trailing transcript entries scanned by the predicate.
const TERMINATION_WINDOW: usize = 5;

/// One entry in a run's append-only transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub stage: StageName,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

/// One execution of the pipeline for a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub batch_id: String,
    pub topic: String,
    pub requested_count: u32,
    pub evidence_statements: Vec<String>,
    pub current_stage: StageName,
    pub transcript: Vec<TranscriptEntry>,
    pub units: Vec<ExamItem>,
    /// Slots permanently dropped after exhausting generation attempts.
    pub dropped_units: u32,
    /// Units accepted at or above the similarity threshold.
    pub diversity_flagged: u32,
    /// Quality-gate regeneration rounds consumed so far. Independent of the
    /// per-slot diversity attempt counter.
    pub quality_retries: u32,
    /// Diagnostics from the last quality-gate rejection, consumed by the
    /// next generation round.
    pub revision_notes: Vec<String>,
    pub suspended: bool,
    pub terminated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(topic: &str, count: u32, evidence_statements: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            // Short batch ids keep report headings and filenames readable.
            batch_id: Uuid::new_v4().to_string()[..8].to_string(),
            topic: topic.to_string(),
            requested_count: count,
            evidence_statements,
            current_stage: StageName::entry(),
            transcript: Vec::new(),
            units: Vec::new(),
            dropped_units: 0,
            diversity_flagged: 0,
            quality_retries: 0,
            revision_notes: Vec::new(),
            suspended: false,
            terminated: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_transcript(&mut self, stage: StageName, summary: String) {
        self.transcript.push(TranscriptEntry {
            stage,
            summary,
            recorded_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Units still counting toward the requested batch size.
    fn active_unit_count(&self) -> u32 {
        self.units
            .iter()
            .filter(|u| u.review_status != Some(ReviewStatus::Rejected))
            .count() as u32
    }

    pub fn pending_review_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.review_status == Some(ReviewStatus::PendingReview))
            .count()
    }
}

/// Exit state reported to the caller after driving a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Suspended,
    Terminated,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Suspended => write!(f, "suspended"),
            RunState::Terminated => write!(f, "terminated"),
        }
    }
}

/// The three verdicts a human reviewer can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    ApprovedWithEdits,
    Rejected,
}

impl ReviewVerdict {
    fn into_status(self) -> ReviewStatus {
        match self {
            ReviewVerdict::Approved => ReviewStatus::Approved,
            ReviewVerdict::ApprovedWithEdits => ReviewStatus::ApprovedWithEdits,
            ReviewVerdict::Rejected => ReviewStatus::Rejected,
        }
    }
}

impl std::fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewVerdict::Approved => write!(f, "approved"),
            ReviewVerdict::ApprovedWithEdits => write!(f, "approved_with_edits"),
            ReviewVerdict::Rejected => write!(f, "rejected"),
        }
    }
}

/// A human decision that ends a suspension.
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub verdict: ReviewVerdict,
    pub reviewer: String,
    pub explanation: String,
    pub edited_fields: Option<BTreeMap<String, String>>,
}

/// What a stage execution produced: a transcript summary plus the stage's
/// proposed destination. `next` is None only for the human-in-loop stage,
/// which pauses the run instead of proposing a transition.
struct StageOutput {
    summary: String,
    next: Option<StageName>,
}

/// Content-based completion check over the transcript tail.
fn termination_satisfied(transcript: &[TranscriptEntry]) -> bool {
    transcript
        .iter()
        .rev()
        .take(TERMINATION_WINDOW)
        .any(|entry| entry.summary.to_lowercase().contains(TERMINATION_PHRASE))
}

pub struct WorkflowEngine<G, S, Q, P, C> {
    config: PipelineConfig,
    routing: RoutingTable,
    gate: DiversityGate,
    generator: G,
    similarity: S,
    scorer: Q,
    sink: P,
    store: C,
}

impl<G, S, Q, P, C> WorkflowEngine<G, S, Q, P, C>
where
    G: ItemGenerator,
    S: SimilarityScorer,
    Q: DimensionScorer,
    P: ApprovedSink,
    C: CheckpointStore,
{
    pub fn new(
        config: PipelineConfig,
        generator: G,
        similarity: S,
        scorer: Q,
        sink: P,
        store: C,
    ) -> Self {
        let gate = DiversityGate {
            threshold: config.similarity_threshold,
            max_attempts: config.max_diversity_attempts,
        };
        Self {
            config,
            routing: RoutingTable::default(),
            gate,
            generator,
            similarity,
            scorer,
            sink,
            store,
        }
    }

    /// Start a new run for a batch request and drive it until it suspends
    /// for human review or terminates.
    pub async fn run_batch(
        &self,
        topic: &str,
        count: u32,
    ) -> Result<(WorkflowRun, RunState), PipelineError> {
        let evidence = self.config.evidence_for_topic(topic);
        let mut run = WorkflowRun::new(topic, count, evidence);
        info!(
            run_id = %run.run_id,
            batch_id = %run.batch_id,
            topic,
            count,
            "starting workflow run"
        );
        let state = self.drive(&mut run).await?;
        Ok((run, state))
    }

    /// Resume a suspended run, loaded from its persisted checkpoint, with a
    /// newly arrived human decision.
    pub async fn resume_batch(
        &self,
        run_id: &str,
        decision: ReviewDecision,
    ) -> Result<(WorkflowRun, RunState), PipelineError> {
        let mut run = self.store.load(run_id)?;
        let state = self.resume_run(&mut run, decision).await?;
        Ok((run, state))
    }

    /// Inject a human decision into a suspended run as if it were the review
    /// stage's own output, then continue driving. Downstream stages cannot
    /// tell a resumed run from one that never paused.
    pub async fn resume_run(
        &self,
        run: &mut WorkflowRun,
        decision: ReviewDecision,
    ) -> Result<RunState, PipelineError> {
        if run.terminated {
            return Err(PipelineError::Configuration(format!(
                "run {} has already terminated",
                run.run_id
            )));
        }
        if !run.suspended {
            return Err(PipelineError::Configuration(format!(
                "run {} is not suspended",
                run.run_id
            )));
        }
        run.suspended = false;

        let record = ReviewRecord {
            reviewed_by: decision.reviewer.clone(),
            explanation: decision.explanation.clone(),
            edited_fields: decision.edited_fields.clone(),
            reviewed_at: Utc::now(),
        };
        let status = decision.verdict.into_status();
        let mut reviewed = 0usize;
        for unit in run
            .units
            .iter_mut()
            .filter(|u| u.review_status == Some(ReviewStatus::PendingReview))
        {
            if let Some(edits) = &decision.edited_fields {
                apply_edits(unit, edits);
            }
            unit.review_status = Some(status);
            unit.review = Some(record.clone());
            reviewed += 1;
        }
        info!(
            run_id = %run.run_id,
            verdict = %decision.verdict,
            reviewed,
            "resuming run with human decision"
        );

        let next = match decision.verdict {
            ReviewVerdict::Approved | ReviewVerdict::ApprovedWithEdits => StageName::Analytics,
            ReviewVerdict::Rejected => StageName::Generator,
        };
        run.push_transcript(
            StageName::Review,
            format!(
                "Review decision: {reviewed} item(s) {} by {}: {}",
                decision.verdict, decision.reviewer, decision.explanation
            ),
        );

        // From here the run is indistinguishable from one that never paused:
        // validate the proposed edge, check for completion, advance.
        self.routing.validate(StageName::Review, next)?;
        if termination_satisfied(&run.transcript) {
            run.terminated = true;
            self.store.save(run)?;
            return Ok(RunState::Terminated);
        }
        run.current_stage = next;
        self.drive(run).await
    }

    /// Read a run's persisted state without advancing it.
    pub fn load_run(&self, run_id: &str) -> Result<WorkflowRun, PipelineError> {
        self.store.load(run_id)
    }

    /// The per-step loop: invoke, record, route, check for completion.
    async fn drive(&self, run: &mut WorkflowRun) -> Result<RunState, PipelineError> {
        loop {
            let stage = run.current_stage;
            debug!(run_id = %run.run_id, %stage, "executing stage");
            let output = self.execute_stage(run).await;
            run.push_transcript(stage, output.summary);

            if stage == StageName::Review {
                run.suspended = true;
                self.store.save(run)?;
                info!(
                    run_id = %run.run_id,
                    pending = run.pending_review_count(),
                    "run suspended awaiting human review"
                );
                return Ok(RunState::Suspended);
            }

            let next = output.next.ok_or_else(|| {
                PipelineError::Configuration(format!("stage {stage} proposed no destination"))
            })?;
            self.routing.validate(stage, next)?;

            if termination_satisfied(&run.transcript) {
                run.terminated = true;
                self.store.save(run)?;
                info!(run_id = %run.run_id, "run terminated");
                return Ok(RunState::Terminated);
            }

            run.current_stage = next;
        }
    }

    async fn execute_stage(&self, run: &mut WorkflowRun) -> StageOutput {
        match run.current_stage {
            StageName::Coordinator => self.run_coordinator(run),
            StageName::Generator => self.run_generator(run).await,
            StageName::PostProcessor => self.run_post_processor(run),
            StageName::QualityScorer => self.run_quality_scorer(run).await,
            StageName::Review => self.run_review(run),
            StageName::Analytics => self.run_analytics(run).await,
        }
    }

    fn run_coordinator(&self, run: &WorkflowRun) -> StageOutput {
        StageOutput {
            summary: format!(
                "Dispatching batch {}: {} item(s) for topic {} with {} evidence statement(s)",
                run.batch_id,
                run.requested_count,
                run.topic,
                run.evidence_statements.len()
            ),
            next: Some(StageName::Generator),
        }
    }

    async fn run_generator(&self, run: &mut WorkflowRun) -> StageOutput {
        let needed = run.requested_count.saturating_sub(run.active_unit_count());
        let notes = std::mem::take(&mut run.revision_notes);
        let mut produced = 0u32;
        let mut flagged = 0u32;
        let mut dropped = 0u32;

        for _ in 0..needed {
            let priors: Vec<String> = run.units.iter().map(|u| u.stimulus.clone()).collect();
            match self.generate_one(run, &priors, &notes).await {
                Some(item) => {
                    if item
                        .similarity_at_acceptance
                        .is_some_and(|s| s >= self.gate.threshold)
                    {
                        flagged += 1;
                    }
                    run.units.push(item);
                    produced += 1;
                }
                None => {
                    dropped += 1;
                }
            }
        }
        run.dropped_units += dropped;
        run.diversity_flagged += flagged;

        StageOutput {
            summary: format!(
                "Generated {produced} candidate item(s) for topic {} \
                 ({flagged} flagged for similarity, {dropped} slot(s) dropped)",
                run.topic
            ),
            next: Some(StageName::PostProcessor),
        }
    }

    /// Bounded generate-and-check loop for one unit slot. Generation
    /// failures and diversity collisions share the attempt ceiling; returns
    /// None when the slot is exhausted without an accepted item.
    async fn generate_one(
        &self,
        run: &WorkflowRun,
        priors: &[String],
        notes: &[String],
    ) -> Option<ExamItem> {
        for attempt in 1..=self.gate.max_attempts {
            let request = GenerationRequest {
                topic: run.topic.clone(),
                evidence_statements: run.evidence_statements.clone(),
                temperature: self.config.temperature_for_attempt(attempt),
                revision_notes: notes.to_vec(),
            };

            let raw = match self.generator.generate(&request).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(attempt, error = %err, "generation call failed");
                    continue;
                }
            };

            let mut item = match ExamItem::from_generated(
                raw,
                &run.topic,
                &run.evidence_statements,
                &run.batch_id,
            ) {
                Ok(item) => item,
                Err(problems) => {
                    warn!(
                        attempt,
                        problems = ?problems,
                        "generated item failed structural validation"
                    );
                    continue;
                }
            };

            let verdict = self
                .gate
                .evaluate(&item.stimulus, priors, attempt, &self.similarity)
                .await;
            match verdict {
                DiversityVerdict::Accept { .. } => {
                    self.gate.admit(&mut item, attempt, &verdict, priors.len());
                    return Some(item);
                }
                DiversityVerdict::Retry { max_similarity } => {
                    info!(
                        attempt,
                        max_similarity, "candidate too similar, regenerating at higher temperature"
                    );
                }
                DiversityVerdict::AcceptFlagged { max_similarity } => {
                    warn!(
                        attempt,
                        max_similarity,
                        "accepting candidate above similarity threshold at final attempt"
                    );
                    self.gate.admit(&mut item, attempt, &verdict, priors.len());
                    return Some(item);
                }
            }
        }
        warn!(
            batch_id = %run.batch_id,
            "dropping unit slot after exhausting generation attempts"
        );
        None
    }

    fn run_post_processor(&self, run: &mut WorkflowRun) -> StageOutput {
        let mut validated = 0usize;
        let mut dropped = 0u32;
        run.units.retain_mut(|unit| {
            // Only fresh units; items from prior rounds already passed here.
            if unit.quality.is_some() {
                return true;
            }
            unit.normalize();
            let problems = unit.structural_problems();
            if problems.is_empty() {
                validated += 1;
                true
            } else {
                warn!(item = %unit.id, problems = ?problems, "dropping malformed item");
                dropped += 1;
                false
            }
        });
        run.dropped_units += dropped;

        StageOutput {
            summary: format!("Validated structure for {validated} item(s), dropped {dropped}"),
            next: Some(StageName::QualityScorer),
        }
    }

    async fn run_quality_scorer(&self, run: &mut WorkflowRun) -> StageOutput {
        for unit in run.units.iter_mut().filter(|u| u.quality.is_none()) {
            let scores = match self.scorer.score_dimensions(unit).await {
                Ok(scores) => scores,
                Err(err) => {
                    warn!(item = %unit.id, error = %err, "scoring failed, treating as unscored");
                    BTreeMap::new()
                }
            };
            quality::apply_scores(unit, scores);
        }

        let mut to_review = 0usize;
        let mut failing_ids = Vec::new();
        let mut notes = Vec::new();
        for unit in run.units.iter().filter(|u| u.review_status.is_none()) {
            let route = quality::route_item(unit);
            match &route {
                QualityRoute::Review => to_review += 1,
                QualityRoute::Regenerate { .. } => {
                    failing_ids.push(unit.id.clone());
                    if let Some(description) = quality::describe_regeneration(&unit.id, &route) {
                        notes.push(description);
                    }
                }
            }
        }

        if !failing_ids.is_empty() && run.quality_retries < self.config.max_quality_retries {
            run.quality_retries += 1;
            run.units.retain(|u| !failing_ids.contains(&u.id));
            let summary = format!(
                "Quality gate: {} item(s) below floor {QUALITY_FLOOR}, routing back to \
                 generation (retry {}/{}): {}",
                failing_ids.len(),
                run.quality_retries,
                self.config.max_quality_retries,
                notes.join("; ")
            );
            run.revision_notes = notes;
            return StageOutput {
                summary,
                next: Some(StageName::Generator),
            };
        }

        if !failing_ids.is_empty() {
            warn!(
                run_id = %run.run_id,
                flagged = failing_ids.len(),
                "quality retry ceiling reached, advancing flagged items to review"
            );
        }
        StageOutput {
            summary: format!(
                "Scored {} item(s): {to_review} at or above floor, {} flagged needs_revision",
                to_review + failing_ids.len(),
                failing_ids.len()
            ),
            next: Some(StageName::Review),
        }
    }

    fn run_review(&self, run: &mut WorkflowRun) -> StageOutput {
        let mut pending = 0usize;
        for unit in run
            .units
            .iter_mut()
            .filter(|u| u.review_status.is_none())
        {
            unit.review_status = Some(ReviewStatus::PendingReview);
            pending += 1;
        }
        StageOutput {
            summary: format!(
                "{pending} item(s) pending human review for batch {}",
                run.batch_id
            ),
            // The human-in-loop stage proposes nothing; the engine suspends
            // and the decision arrives through resumption.
            next: None,
        }
    }

    async fn run_analytics(&self, run: &mut WorkflowRun) -> StageOutput {
        for unit in run.units.iter().filter(|u| {
            matches!(
                u.review_status,
                Some(ReviewStatus::Approved | ReviewStatus::ApprovedWithEdits)
            )
        }) {
            // Fire-and-forget: a sink failure never blocks the report.
            if let Err(err) = self.sink.persist(unit).await {
                warn!(item = %unit.id, error = %err, "failed to persist approved item");
            }
        }

        let report = report::batch_report(
            &run.batch_id,
            &run.units,
            self.config.similarity_threshold,
        );
        StageOutput {
            summary: report,
            next: Some(StageName::Coordinator),
        }
    }
}

/// Apply recognized content edits from a review decision. Unknown field
/// names stay in the recorded snapshot but are not applied.
fn apply_edits(unit: &mut ExamItem, edits: &BTreeMap<String, String>) {
    for (field, value) in edits {
        match field.as_str() {
            "stimulus" => unit.stimulus = value.clone(),
            "stem" => unit.stem = value.clone(),
            "rationale" => unit.rationale = value.clone(),
            other => {
                warn!(item = %unit.id, field = other, "ignoring edit to unknown field");
            }
        }
    }
}
