use anyhow::Result;
use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use examforge::checkpoint::FileCheckpointStore;
use examforge::cli::{Cli, Command, decision_from_args};
use examforge::collaborators::{LexicalSimilarity, LogSink, StubGenerator, StubScorer};
use examforge::config::PipelineConfig;
use examforge::engine::{RunState, WorkflowEngine, WorkflowRun};
use examforge::item::ReviewStatus;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = PipelineConfig::load(cli.config.as_deref())?;
    let store = FileCheckpointStore::new(&config.checkpoint_dir)?;
    let engine = WorkflowEngine::new(
        config,
        StubGenerator::new(),
        LexicalSimilarity,
        StubScorer,
        LogSink,
        store,
    );

    match cli.command {
        Command::Run { topic, count } => {
            let (run, state) = engine.run_batch(&topic, count).await?;
            print_outcome(&run, state);
        }
        Command::Resume {
            run_id,
            decision,
            reviewer,
            explanation,
            edits,
        } => {
            let decision = decision_from_args(decision, reviewer, explanation, edits);
            let (run, state) = engine.resume_batch(&run_id, decision).await?;
            print_outcome(&run, state);
        }
        Command::Status { run_id } => {
            let run = engine.load_run(&run_id)?;
            print_status(&run);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_outcome(run: &WorkflowRun, state: RunState) {
    match state {
        RunState::Suspended => {
            println!(
                "{} run {} (batch {})",
                style("Suspended:").yellow().bold(),
                run.run_id,
                run.batch_id
            );
            println!(
                "{} item(s) awaiting review. Resume with:",
                run.pending_review_count()
            );
            println!(
                "  examforge resume {} --decision approved --reviewer <you>",
                run.run_id
            );
        }
        RunState::Terminated => {
            println!(
                "{} run {} (batch {})",
                style("Completed:").green().bold(),
                run.run_id,
                run.batch_id
            );
            if let Some(report) = run.transcript.last() {
                println!("{}", report.summary);
            }
        }
    }
}

fn print_status(run: &WorkflowRun) {
    let state = if run.terminated {
        style("terminated").green()
    } else if run.suspended {
        style("suspended").yellow()
    } else {
        style("in progress").cyan()
    };
    println!("Run {} (batch {}): {state}", run.run_id, run.batch_id);
    println!(
        "  topic {} | requested {} | current stage {}",
        run.topic, run.requested_count, run.current_stage
    );
    println!(
        "  items {} | pending review {} | dropped {} | flagged {} | quality retries {}",
        run.units.len(),
        run.pending_review_count(),
        run.dropped_units,
        run.diversity_flagged,
        run.quality_retries
    );
    for item in &run.units {
        let tier = item
            .tier()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unscored".to_string());
        let status = item
            .review_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "in pipeline".to_string());
        let marker = match item.review_status {
            Some(ReviewStatus::Rejected) => style("x").red(),
            Some(ReviewStatus::PendingReview) => style("?").yellow(),
            _ => style("+").green(),
        };
        println!("  {marker} {} [{tier}] {status}", item.id);
    }
    println!("Transcript:");
    for entry in &run.transcript {
        let first_line = entry.summary.lines().next().unwrap_or("");
        println!("  {:>14}  {first_line}", entry.stage.to_string());
    }
}
