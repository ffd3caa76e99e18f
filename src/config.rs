//! Pipeline configuration loaded from `examforge.toml`.
//!
//! Values absent from the file use the defaults below. The
//! `EXAMFORGE_CHECKPOINT_DIR` environment variable takes precedence over the
//! file for the checkpoint directory.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Max similarity below which a candidate counts as diverse.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Attempt ceiling per unit slot, shared by generation failures and
    /// diversity collisions.
    #[serde(default = "default_max_diversity_attempts")]
    pub max_diversity_attempts: u32,

    /// Per-run ceiling on quality-gate regeneration rounds. Independent of
    /// the diversity attempt counter.
    #[serde(default = "default_max_quality_retries")]
    pub max_quality_retries: u32,

    /// Sampling temperature for first-attempt generation.
    #[serde(default = "default_base_temperature")]
    pub base_temperature: f64,

    /// Temperature increase applied per diversity retry.
    #[serde(default = "default_temperature_step")]
    pub temperature_step: f64,

    /// Temperature ceiling for retries.
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    /// Directory holding one JSON checkpoint per run id.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Topic code to evidence statements. Entries here shadow the built-in
    /// map for the same topic.
    #[serde(default)]
    pub evidence: BTreeMap<String, Vec<String>>,
}

fn default_similarity_threshold() -> f64 {
    0.75
}

fn default_max_diversity_attempts() -> u32 {
    3
}

fn default_max_quality_retries() -> u32 {
    2
}

fn default_base_temperature() -> f64 {
    0.4
}

fn default_temperature_step() -> f64 {
    0.2
}

fn default_max_temperature() -> f64 {
    0.9
}

fn default_checkpoint_dir() -> String {
    "checkpoints".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_diversity_attempts: default_max_diversity_attempts(),
            max_quality_retries: default_max_quality_retries(),
            base_temperature: default_base_temperature(),
            temperature_step: default_temperature_step(),
            max_temperature: default_max_temperature(),
            checkpoint_dir: default_checkpoint_dir(),
            evidence: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the given path, or `examforge.toml` in the
    /// working directory. Falls back to defaults when the file is missing.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = Path::new(path.unwrap_or("examforge.toml"));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<PipelineConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var("EXAMFORGE_CHECKPOINT_DIR")
            && !dir.is_empty()
        {
            config.checkpoint_dir = dir;
        }

        Ok(config)
    }

    /// Escalated sampling temperature for a given attempt, capped at the
    /// configured maximum.
    pub fn temperature_for_attempt(&self, attempt: u32) -> f64 {
        let escalated =
            self.base_temperature + self.temperature_step * attempt.saturating_sub(1) as f64;
        escalated.min(self.max_temperature)
    }

    /// Evidence statements for a topic code. Config entries shadow the
    /// built-in map; unknown topics get a generic single statement so a run
    /// can still proceed.
    pub fn evidence_for_topic(&self, topic: &str) -> Vec<String> {
        if let Some(statements) = self.evidence.get(topic) {
            return statements.clone();
        }
        let statements = builtin_evidence(topic);
        if statements.is_empty() {
            vec![format!("Demonstrate understanding of topic {topic}")]
        } else {
            statements
        }
    }
}

// Authoritative built-in mapping of evidence codes to statement text.
// Topic codes look like "TP.2"; statement codes are keyed by the numeric
// prefix before the dot.
const BUILTIN_EVIDENCE: &[(&str, &str)] = &[
    (
        "1.a",
        "Understand what expectation damages are and what function they serve.",
    ),
    ("1.b", "Calculate expectation damages in a given scenario."),
    (
        "2.a",
        "Apply the legal test for consideration, including both elements of legal value and bargained-for-exchange.",
    ),
    (
        "2.b",
        "Understand what is meant by 'legal value' and 'bargained-for-exchange.'",
    ),
    (
        "2.c",
        "Identify the legal detriment to the promisee and/or legal benefit to the promisor in a given fact pattern.",
    ),
    (
        "3.a",
        "Distinguish between a gratuitous promise and a contract supported by consideration.",
    ),
    (
        "4.a",
        "Identify past consideration and explain why it does not support a contract.",
    ),
    (
        "5.a",
        "Identify an illusory promise and explain why it cannot serve as consideration.",
    ),
    (
        "9.a",
        "Apply promissory estoppel to enforce a promise lacking consideration.",
    ),
];

fn builtin_evidence(topic: &str) -> Vec<String> {
    let suffix = topic.rsplit('.').next().unwrap_or(topic);
    BUILTIN_EVIDENCE
        .iter()
        .filter(|(code, _)| code.split('.').next() == Some(suffix))
        .map(|(code, text)| format!("{code}: {text}"))
        .collect()
}
