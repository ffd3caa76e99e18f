//! Stage registry and routing table.
//!
//! Stages form a closed set and the legal transitions between them form a
//! directed graph. The decision of which edge to take is made by the content
//! of a stage's own output; the table only validates that the proposed move
//! is a structurally allowed one. Any transition outside the graph is a
//! fatal configuration error.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The closed set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Coordinator,
    Generator,
    PostProcessor,
    QualityScorer,
    Review,
    Analytics,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::Coordinator,
        StageName::Generator,
        StageName::PostProcessor,
        StageName::QualityScorer,
        StageName::Review,
        StageName::Analytics,
    ];

    /// Every run starts here.
    pub fn entry() -> StageName {
        StageName::Coordinator
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageName::Coordinator => write!(f, "coordinator"),
            StageName::Generator => write!(f, "generator"),
            StageName::PostProcessor => write!(f, "post_processor"),
            StageName::QualityScorer => write!(f, "quality_scorer"),
            StageName::Review => write!(f, "review"),
            StageName::Analytics => write!(f, "analytics"),
        }
    }
}

impl FromStr for StageName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinator" => Ok(StageName::Coordinator),
            "generator" => Ok(StageName::Generator),
            "post_processor" => Ok(StageName::PostProcessor),
            "quality_scorer" => Ok(StageName::QualityScorer),
            "review" => Ok(StageName::Review),
            "analytics" => Ok(StageName::Analytics),
            other => Err(PipelineError::Configuration(format!(
                "unknown stage name: {other}"
            ))),
        }
    }
}

/// The closed set of legal (source, destination) transitions.
///
/// Immutable, process-wide configuration; safe for unsynchronized concurrent
/// reads across runs.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    edges: BTreeSet<(StageName, StageName)>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        use StageName::*;
        let edges = [
            (Coordinator, Generator),
            (Generator, PostProcessor),
            (PostProcessor, QualityScorer),
            // Quality-based routing: at or above the floor vs retry.
            (QualityScorer, Review),
            (QualityScorer, Generator),
            // Review outcomes: approved/edited vs rejected.
            (Review, Analytics),
            (Review, Generator),
            // Batch report closes the loop.
            (Analytics, Coordinator),
        ]
        .into_iter()
        .collect();
        Self { edges }
    }
}

impl RoutingTable {
    pub fn contains(&self, from: StageName, to: StageName) -> bool {
        self.edges.contains(&(from, to))
    }

    /// Reject any transition not present in the table, never silently
    /// rerouting it.
    pub fn validate(&self, from: StageName, to: StageName) -> Result<(), PipelineError> {
        if self.contains(from, to) {
            Ok(())
        } else {
            Err(PipelineError::Configuration(format!(
                "illegal routing edge: {from} -> {to}"
            )))
        }
    }
}
