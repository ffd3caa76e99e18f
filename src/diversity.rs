//! The diversity gate: a bounded retry loop rejecting near-duplicate
//! candidates by semantic similarity of their stimuli.
//!
//! Diversity is a soft quality signal. A candidate that is still too similar
//! at the final attempt is accepted with a flagged warning instead of
//! failing the batch.

use tracing::warn;

use crate::collaborators::SimilarityScorer;
use crate::item::ExamItem;

/// Outcome of a diversity check for one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiversityVerdict {
    /// Sufficiently distinct from all prior accepted items.
    Accept { max_similarity: f64 },
    /// Too similar; the caller should regenerate, typically at a higher
    /// sampling temperature. The next-temperature policy is the caller's.
    Retry { max_similarity: f64 },
    /// Still too similar at the final attempt; accepted anyway, flagged.
    AcceptFlagged { max_similarity: f64 },
}

impl DiversityVerdict {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, DiversityVerdict::Retry { .. })
    }

    pub fn max_similarity(&self) -> f64 {
        match self {
            DiversityVerdict::Accept { max_similarity }
            | DiversityVerdict::Retry { max_similarity }
            | DiversityVerdict::AcceptFlagged { max_similarity } => *max_similarity,
        }
    }
}

/// Threshold-gated duplicate check over a batch's accepted stimuli.
#[derive(Debug, Clone)]
pub struct DiversityGate {
    /// Max similarity below which a candidate counts as diverse.
    pub threshold: f64,
    /// Attempt ceiling shared with generation failures.
    pub max_attempts: u32,
}

impl Default for DiversityGate {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            max_attempts: 3,
        }
    }
}

impl DiversityGate {
    /// Compare a candidate stimulus against every prior accepted stimulus
    /// and take the maximum similarity. An empty prior list is diverse by
    /// definition (max similarity 0.0). A failing similarity collaborator
    /// never crashes the pipeline; the comparison degrades to 0.0 with a
    /// logged warning.
    pub async fn evaluate(
        &self,
        candidate_stimulus: &str,
        prior_stimuli: &[String],
        attempt: u32,
        similarity: &impl SimilarityScorer,
    ) -> DiversityVerdict {
        let mut max_similarity = 0.0f64;
        for prior in prior_stimuli {
            let score = match similarity.similarity(candidate_stimulus, prior).await {
                Ok(score) => score,
                Err(err) => {
                    warn!(error = %err, "similarity check failed, treating comparison as 0.0");
                    0.0
                }
            };
            max_similarity = max_similarity.max(score);
        }

        if max_similarity < self.threshold {
            DiversityVerdict::Accept { max_similarity }
        } else if attempt < self.max_attempts {
            DiversityVerdict::Retry { max_similarity }
        } else {
            DiversityVerdict::AcceptFlagged { max_similarity }
        }
    }

    /// Record acceptance on the item. Similarity-at-acceptance and the
    /// attempt number are set here, not during evaluation, and the
    /// similarity field stays undefined when no prior item existed.
    pub fn admit(
        &self,
        item: &mut ExamItem,
        attempt: u32,
        verdict: &DiversityVerdict,
        prior_count: usize,
    ) {
        item.attempt = attempt;
        item.similarity_at_acceptance = if prior_count == 0 {
            None
        } else {
            Some(verdict.max_similarity())
        };
    }
}
