//! Command-line interface definitions.

use std::collections::BTreeMap;

use clap::{Parser, Subcommand, ValueEnum};

use crate::engine::{ReviewDecision, ReviewVerdict};

#[derive(Parser, Debug)]
#[command(
    name = "examforge",
    about = "Multi-stage exam item generation and review pipeline",
    version
)]
pub struct Cli {
    /// Path to the configuration file (defaults to examforge.toml).
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Enable debug-level logging.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new batch run for a topic and drive it to human review.
    Run {
        /// Topic code, e.g. TP.2.
        topic: String,

        /// Number of items to generate.
        #[arg(long, default_value_t = 3)]
        count: u32,
    },

    /// Resume a suspended run with a review decision.
    Resume {
        /// Run id printed when the run suspended.
        run_id: String,

        /// The reviewer's verdict.
        #[arg(long, value_enum)]
        decision: DecisionArg,

        /// Reviewer identity recorded on each item.
        #[arg(long, default_value = "reviewer")]
        reviewer: String,

        /// Free-text explanation of the decision.
        #[arg(long, default_value = "")]
        explanation: String,

        /// Content edit as field=value; repeatable. Recognized fields are
        /// stimulus, stem, and rationale.
        #[arg(long = "edit", value_parser = parse_key_val)]
        edits: Vec<(String, String)>,
    },

    /// Show the persisted state of a run.
    Status {
        /// Run id to inspect.
        run_id: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DecisionArg {
    Approved,
    ApprovedWithEdits,
    Rejected,
}

impl From<DecisionArg> for ReviewVerdict {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Approved => ReviewVerdict::Approved,
            DecisionArg::ApprovedWithEdits => ReviewVerdict::ApprovedWithEdits,
            DecisionArg::Rejected => ReviewVerdict::Rejected,
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty field name in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Build a [`ReviewDecision`] from the resume subcommand's arguments.
pub fn decision_from_args(
    decision: DecisionArg,
    reviewer: String,
    explanation: String,
    edits: Vec<(String, String)>,
) -> ReviewDecision {
    let edited_fields: Option<BTreeMap<String, String>> = if edits.is_empty() {
        None
    } else {
        Some(edits.into_iter().collect())
    };
    ReviewDecision {
        verdict: decision.into(),
        reviewer,
        explanation,
        edited_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_count() {
        let cli = Cli::parse_from(["examforge", "run", "TP.2", "--count", "5"]);
        match cli.command {
            Command::Run { topic, count } => {
                assert_eq!(topic, "TP.2");
                assert_eq!(count, 5);
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn parses_resume_with_edits() {
        let cli = Cli::parse_from([
            "examforge",
            "resume",
            "run-123",
            "--decision",
            "approved-with-edits",
            "--reviewer",
            "sme@example.com",
            "--explanation",
            "fixed the stem",
            "--edit",
            "stem=Which party prevails?",
            "--edit",
            "rationale=Because consideration was present.",
        ]);
        match cli.command {
            Command::Resume {
                run_id,
                decision,
                reviewer,
                explanation,
                edits,
            } => {
                assert_eq!(run_id, "run-123");
                let decision = decision_from_args(decision, reviewer, explanation, edits);
                assert_eq!(decision.verdict, ReviewVerdict::ApprovedWithEdits);
                assert_eq!(decision.reviewer, "sme@example.com");
                let edits = decision.edited_fields.unwrap();
                assert_eq!(edits["stem"], "Which party prevails?");
                assert_eq!(edits.len(), 2);
            }
            other => panic!("expected resume, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_edit() {
        let result = Cli::try_parse_from([
            "examforge",
            "resume",
            "run-123",
            "--decision",
            "approved",
            "--edit",
            "no-equals-sign",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_apply_to_subcommands() {
        let cli = Cli::parse_from(["examforge", "status", "run-123", "--verbose"]);
        assert!(cli.verbose);
        match cli.command {
            Command::Status { run_id } => assert_eq!(run_id, "run-123"),
            other => panic!("expected status, got {other:?}"),
        }
    }
}
