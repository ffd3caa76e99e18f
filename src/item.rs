//! The work unit model: one candidate exam item and its metadata envelope.
//!
//! Pure data plus two pure functions, [`derive_overall_score`] and
//! [`classify_tier`]. Structural invariants (exactly four options keyed A-D,
//! correct label among them, minimum text lengths) are enforced at the
//! generation boundary by [`ExamItem::from_generated`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The eight fixed quality dimensions. Scores outside this set are ignored
/// when deriving the overall score.
pub const DIMENSIONS: [&str; 8] = [
    "clarity",
    "cognitive_level",
    "evidence_alignment",
    "plausibility",
    "legal_accuracy",
    "scenario_quality",
    "rationale_quality",
    "overall",
];

/// Overall score at or above this floor advances an item to human review;
/// it is also the lower bound of the bronze tier. Both the quality gate and
/// [`classify_tier`] must read this constant, never a local copy, or bronze
/// items would silently strand between the two consumers.
pub const QUALITY_FLOOR: f64 = 2.5;

/// The closed set of answer option labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionLabel {
    A,
    B,
    C,
    D,
}

impl OptionLabel {
    pub const ALL: [OptionLabel; 4] = [
        OptionLabel::A,
        OptionLabel::B,
        OptionLabel::C,
        OptionLabel::D,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "A" => Some(OptionLabel::A),
            "B" => Some(OptionLabel::B),
            "C" => Some(OptionLabel::C),
            "D" => Some(OptionLabel::D),
            _ => None,
        }
    }
}

impl fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionLabel::A => write!(f, "A"),
            OptionLabel::B => write!(f, "B"),
            OptionLabel::C => write!(f, "C"),
            OptionLabel::D => write!(f, "D"),
        }
    }
}

/// Deterministic quality tier derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Gold,
    Silver,
    Bronze,
    NeedsRevision,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Gold => write!(f, "gold"),
            QualityTier::Silver => write!(f, "silver"),
            QualityTier::Bronze => write!(f, "bronze"),
            QualityTier::NeedsRevision => write!(f, "needs_revision"),
        }
    }
}

/// Review lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    PendingReview,
    Approved,
    ApprovedWithEdits,
    Rejected,
    GoldStandard,
}

impl ReviewStatus {
    /// Terminal statuses end an item's journey through the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Approved
                | ReviewStatus::ApprovedWithEdits
                | ReviewStatus::Rejected
                | ReviewStatus::GoldStandard
        )
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStatus::PendingReview => write!(f, "pending_review"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::ApprovedWithEdits => write!(f, "approved_with_edits"),
            ReviewStatus::Rejected => write!(f, "rejected"),
            ReviewStatus::GoldStandard => write!(f, "gold_standard"),
        }
    }
}

/// Quality metadata populated by the scoring stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub dimension_scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub tier: QualityTier,
    pub improvement_suggestions: Vec<String>,
    pub scored_at: DateTime<Utc>,
}

/// Review metadata recorded when a human decision arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub reviewed_by: String,
    pub explanation: String,
    /// Snapshot of fields edited during review, present only if edited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_fields: Option<BTreeMap<String, String>>,
    pub reviewed_at: DateTime<Utc>,
}

/// Raw item content as returned by the generation collaborator, before
/// structural validation. Option keys are free-form strings here because the
/// collaborator output is untrusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub stimulus: String,
    pub stem: String,
    pub options: BTreeMap<String, String>,
    pub correct_option: String,
    pub rationale: String,
}

/// One candidate exam item moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamItem {
    pub id: String,
    pub stimulus: String,
    pub stem: String,
    pub options: BTreeMap<OptionLabel, String>,
    pub correct_option: OptionLabel,
    pub rationale: String,
    pub topic: String,
    pub evidence_statements: Vec<String>,
    pub batch_id: String,
    /// Generation attempt at which this item was accepted; starts at 1.
    pub attempt: u32,
    /// Max similarity against prior accepted items, recorded at acceptance.
    /// None until at least one prior item existed for comparison.
    pub similarity_at_acceptance: Option<f64>,
    pub quality: Option<QualityAssessment>,
    pub review_status: Option<ReviewStatus>,
    pub review: Option<ReviewRecord>,
    pub created_at: DateTime<Utc>,
}

impl ExamItem {
    /// Validate raw collaborator output and build an item from it.
    ///
    /// Returns the full list of structural problems on failure so the caller
    /// can log an informative generation-failure diagnostic.
    pub fn from_generated(
        raw: GeneratedItem,
        topic: &str,
        evidence_statements: &[String],
        batch_id: &str,
    ) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();

        let mut options = BTreeMap::new();
        for (key, text) in &raw.options {
            match OptionLabel::parse(key) {
                Some(label) => {
                    options.insert(label, text.trim().to_string());
                }
                None => problems.push(format!("unknown option label: {key:?}")),
            }
        }
        if options.len() != OptionLabel::ALL.len() {
            problems.push(format!(
                "expected exactly {} options labeled A-D, got {}",
                OptionLabel::ALL.len(),
                options.len()
            ));
        }

        let correct_option = match OptionLabel::parse(&raw.correct_option) {
            Some(label) if options.contains_key(&label) => Some(label),
            Some(label) => {
                problems.push(format!("correct option {label} is not among the options"));
                None
            }
            None => {
                problems.push(format!(
                    "correct option label {:?} is not one of A-D",
                    raw.correct_option
                ));
                None
            }
        };

        if !problems.is_empty() {
            return Err(problems);
        }

        let item = Self {
            id: Uuid::new_v4().to_string(),
            stimulus: raw.stimulus.trim().to_string(),
            stem: raw.stem.trim().to_string(),
            options,
            correct_option: correct_option.unwrap_or(OptionLabel::A),
            rationale: raw.rationale.trim().to_string(),
            topic: topic.to_string(),
            evidence_statements: evidence_statements.to_vec(),
            batch_id: batch_id.to_string(),
            attempt: 1,
            similarity_at_acceptance: None,
            quality: None,
            review_status: None,
            review: None,
            created_at: Utc::now(),
        };

        let problems = item.structural_problems();
        if problems.is_empty() {
            Ok(item)
        } else {
            Err(problems)
        }
    }

    /// Structural checks that must hold for any item past the generation
    /// boundary. Returns an empty list when the item is well-formed.
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.stimulus.is_empty() {
            problems.push("stimulus is empty".to_string());
        }
        if self.stem.len() < 10 {
            problems.push("stem is too short".to_string());
        }
        if self.rationale.len() < 20 {
            problems.push("rationale is too short".to_string());
        }
        if self.options.len() != OptionLabel::ALL.len() {
            problems.push(format!(
                "expected exactly {} options, got {}",
                OptionLabel::ALL.len(),
                self.options.len()
            ));
        }
        if !self.options.contains_key(&self.correct_option) {
            problems.push(format!(
                "correct option {} is not among the options",
                self.correct_option
            ));
        }
        problems
    }

    /// Trim whitespace from all free-text fields.
    pub fn normalize(&mut self) {
        self.stimulus = self.stimulus.trim().to_string();
        self.stem = self.stem.trim().to_string();
        self.rationale = self.rationale.trim().to_string();
        for text in self.options.values_mut() {
            *text = text.trim().to_string();
        }
        for statement in &mut self.evidence_statements {
            *statement = statement.trim().to_string();
        }
    }

    pub fn tier(&self) -> Option<QualityTier> {
        self.quality.as_ref().map(|q| q.tier)
    }
}

/// Unweighted mean over the eight fixed dimensions. Dimensions absent from
/// the input are excluded from the average, not treated as zero; keys
/// outside the fixed set are ignored.
pub fn derive_overall_score(dimension_scores: &BTreeMap<String, f64>) -> f64 {
    let present: Vec<f64> = DIMENSIONS
        .iter()
        .filter_map(|dim| dimension_scores.get(*dim).copied())
        .collect();
    if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    }
}

/// Map an overall score to its tier. Boundaries are inclusive on the lower
/// bound at every call site.
pub fn classify_tier(score: f64) -> QualityTier {
    if score >= 4.5 {
        QualityTier::Gold
    } else if score >= 3.5 {
        QualityTier::Silver
    } else if score >= QUALITY_FLOOR {
        QualityTier::Bronze
    } else {
        QualityTier::NeedsRevision
    }
}

#[cfg(test)]
pub(crate) fn sample_raw() -> GeneratedItem {
    GeneratedItem {
        stimulus: "Ann promises to paint Bob's fence in exchange for $200.".into(),
        stem: "Is Ann's promise supported by consideration?".into(),
        options: [
            ("A", "Yes, because both parties exchanged legal value."),
            ("B", "No, because painting a fence is not a legal detriment."),
            ("C", "No, because the promise was gratuitous."),
            ("D", "Yes, but only if the fence is actually painted."),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
        correct_option: "A".into(),
        rationale: "A bargained-for exchange of promises with legal value on both sides \
                    satisfies the consideration requirement."
            .into(),
    }
}

#[cfg(test)]
pub(crate) fn sample_item(batch_id: &str) -> ExamItem {
    ExamItem::from_generated(
        sample_raw(),
        "TP.2",
        &["2.a: Apply the legal test for consideration.".to_string()],
        batch_id,
    )
    .unwrap()
}
