mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use logging::init_logging;
use silverline_core::PendingReview;
use silverline_rules::{FileOracle, NullOracle, RuleOracle, rule_set_json_schema};
use silverline_workflow::{
    Orchestrator, PipelineConfig, ReviewDecision, RunOutcome, StateStore, StoreError,
    WorkflowError, discover_sources, list_open_reviews, load_or_create_config, load_review,
    run_batch, submit_decision, submit_edited_document,
};
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("{0} run(s) failed")]
    RunsFailed(usize),
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        CliError::Workflow(WorkflowError::Store(err))
    }
}

#[derive(Parser, Debug)]
#[command(name = "silverline", version, about = "Silverline data-quality pipeline")]
struct Cli {
    /// Pipeline configuration file, created with defaults when missing.
    #[arg(long, global = true, default_value = "silverline.toml")]
    config: PathBuf,
    /// Override `data_root` from the configuration.
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,
    /// Log at debug level.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start one run per source.
    Run(RunArgs),
    /// Continue a run from its persisted state.
    Resume(ResumeArgs),
    /// Continue every run that has not finished.
    ResumeAll,
    /// Reject a run that is waiting on approval.
    Cancel { run_id: String },
    #[command(subcommand)]
    Review(ReviewCommand),
    /// Show one run, or every run when no id is given.
    Status { run_id: Option<String> },
    /// List the review decisions recorded for a dataset.
    History { dataset_id: String },
    /// Print the rule-set JSON Schema.
    Schema,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(required_unless_present = "dir", value_name = "SOURCE")]
    sources: Vec<PathBuf>,
    /// Also run every CSV file in this directory, in name order.
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,
    /// Process at most this many files from `--dir`; 0 means all.
    #[arg(long, requires = "dir", value_name = "N")]
    max_files: Option<usize>,
    /// Block until each run is decided and settled.
    #[arg(long, default_value_t = false)]
    wait: bool,
}

#[derive(Args, Debug)]
struct ResumeArgs {
    run_id: String,
    #[arg(long, default_value_t = false)]
    wait: bool,
}

#[derive(Subcommand, Debug)]
enum ReviewCommand {
    /// List reviews still waiting on a decision.
    List,
    /// Print a review as JSON.
    Show { run_id: String },
    Approve {
        run_id: String,
        #[arg(long)]
        note: Option<String>,
    },
    Reject {
        run_id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Replace the proposed rules with an edited rule-set document.
    Edit {
        run_id: String,
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        #[arg(long)]
        note: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    if let Command::Schema = cli.command {
        println!("{}", serde_json::to_string_pretty(&rule_set_json_schema())?);
        return Ok(());
    }

    let config = load_config(&cli.config, cli.data_root.as_deref())?;
    init_logging(&config.log_path(), cli.verbose)?;

    let store = Arc::new(StateStore::open(config.state_root())?);
    let result = dispatch(cli.command, Arc::clone(&store), config).await;
    store.close();
    if let Err(err) = &result {
        tracing::error!(event = "command_failed", error = %err);
    }
    result
}

fn load_config(path: &Path, data_root: Option<&Path>) -> Result<PipelineConfig, CliError> {
    let mut config = load_or_create_config(path)?;
    if let Some(data_root) = data_root {
        config.data_root = data_root.to_path_buf();
    }
    Ok(config)
}

fn build_oracle(config: &PipelineConfig) -> Arc<dyn RuleOracle> {
    match &config.oracle_dir {
        Some(dir) => Arc::new(FileOracle::new(dir.clone())),
        None => Arc::new(NullOracle),
    }
}

async fn dispatch(
    command: Command,
    store: Arc<StateStore>,
    config: PipelineConfig,
) -> Result<(), CliError> {
    let oracle = build_oracle(&config);
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&store), config, oracle));

    match command {
        Command::Run(args) => run_sources(orchestrator, args).await,
        Command::Resume(args) => {
            let outcome = if args.wait {
                orchestrator.wait_for_decision(&args.run_id).await?
            } else {
                orchestrator.resume(&args.run_id).await?
            };
            report_outcomes(&[outcome])
        }
        Command::ResumeAll => {
            let mut outcomes = Vec::new();
            let mut errors = 0;
            for (run_id, result) in orchestrator.resume_all().await? {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => {
                        println!("{run_id}\tERROR\t{err}");
                        errors += 1;
                    }
                }
            }
            report_outcomes(&outcomes)?;
            if errors > 0 {
                return Err(CliError::RunsFailed(errors));
            }
            Ok(())
        }
        Command::Cancel { run_id } => {
            let outcome = orchestrator.cancel(&run_id).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Review(review) => run_review(&store, review),
        Command::Status { run_id } => show_status(&store, run_id.as_deref()),
        Command::History { dataset_id } => show_history(&store, &dataset_id),
        Command::Schema => Ok(()),
    }
}

async fn run_sources(orchestrator: Arc<Orchestrator>, args: RunArgs) -> Result<(), CliError> {
    let mut sources = args.sources;
    if let Some(dir) = &args.dir {
        sources.extend(discover_sources(dir, args.max_files)?);
    }
    if sources.is_empty() {
        println!("no sources to run");
        return Ok(());
    }
    let entries = run_batch(Arc::clone(&orchestrator), sources).await;
    let mut outcomes = Vec::with_capacity(entries.len());
    let mut errors = 0;
    for entry in entries {
        match entry.result {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                println!("{}\tERROR\t{err}", entry.source.display());
                errors += 1;
            }
        }
    }

    if args.wait {
        for outcome in &mut outcomes {
            if let RunOutcome::AwaitingApproval { run_id } = outcome {
                let run_id = run_id.clone();
                println!("{run_id}\twaiting for review");
                *outcome = orchestrator.wait_for_decision(&run_id).await?;
            }
        }
    }

    report_outcomes(&outcomes)?;
    if errors > 0 {
        return Err(CliError::RunsFailed(errors));
    }
    Ok(())
}

fn report_outcomes(outcomes: &[RunOutcome]) -> Result<(), CliError> {
    for outcome in outcomes {
        print_outcome(outcome);
    }
    let failed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, RunOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        return Err(CliError::RunsFailed(failed));
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::AwaitingApproval { run_id } => {
            println!("{run_id}\tAWAITING_APPROVAL\tsilverline review show {run_id}");
        }
        RunOutcome::Completed {
            run_id,
            pass_rate,
            outputs,
        } => {
            let rate = pass_rate
                .map(|rate| format!("pass_rate={rate:.4}"))
                .unwrap_or_else(|| "pass_rate=-".to_string());
            match outputs {
                Some(outputs) => println!(
                    "{run_id}\tCOMPLETED\t{rate}\tsilver={}\tquarantine={}",
                    outputs.silver.display(),
                    outputs.quarantine.display()
                ),
                None => println!("{run_id}\tCOMPLETED\t{rate}"),
            }
        }
        RunOutcome::Failed { run_id, failure } => match failure {
            Some(failure) => println!("{run_id}\tFAILED\t{failure}"),
            None => println!("{run_id}\tFAILED"),
        },
    }
}

fn run_review(store: &StateStore, command: ReviewCommand) -> Result<(), CliError> {
    match command {
        ReviewCommand::List => {
            for review in list_open_reviews(store)? {
                println!(
                    "{}\t{}\trules={}\tcreated={}",
                    review.run_id,
                    review.dataset_id,
                    review.rule_set.len(),
                    review.created_at.to_rfc3339()
                );
            }
        }
        ReviewCommand::Show { run_id } => {
            let review = load_review(store, &run_id)?;
            println!("{}", serde_json::to_string_pretty(&review)?);
        }
        ReviewCommand::Approve { run_id, note } => {
            let review = submit_decision(store, &run_id, ReviewDecision::Approve { note })?;
            print_decision(&review);
        }
        ReviewCommand::Reject { run_id, note } => {
            let review = submit_decision(store, &run_id, ReviewDecision::Reject { note })?;
            print_decision(&review);
        }
        ReviewCommand::Edit { run_id, file, note } => {
            let content = std::fs::read_to_string(&file)?;
            let document: serde_json::Value = serde_json::from_str(&content)?;
            let review = submit_edited_document(store, &run_id, &document, note)?;
            print_decision(&review);
        }
    }
    Ok(())
}

fn print_decision(review: &PendingReview) {
    let decision = review
        .decision
        .map(|decision| decision.as_str())
        .unwrap_or("undecided");
    println!(
        "{}\t{decision}\tresume with: silverline resume {}",
        review.run_id, review.run_id
    );
}

fn show_history(store: &StateStore, dataset_id: &str) -> Result<(), CliError> {
    for entry in store.load_history(dataset_id)? {
        let active = entry.active_rules().count();
        match &entry.reviewer_note {
            Some(note) => println!(
                "{}\t{}\t{}\tactive_rules={active}\t{note}",
                entry.decided_at.to_rfc3339(),
                entry.run_id,
                entry.decision.as_str()
            ),
            None => println!(
                "{}\t{}\t{}\tactive_rules={active}",
                entry.decided_at.to_rfc3339(),
                entry.run_id,
                entry.decision.as_str()
            ),
        }
    }
    Ok(())
}

fn show_status(store: &StateStore, run_id: Option<&str>) -> Result<(), CliError> {
    let Some(run_id) = run_id else {
        for record in store.list_runs()? {
            println!(
                "{}\t{}\t{}\t{}",
                record.run_id,
                record.dataset_id,
                record.state,
                record.updated_at.to_rfc3339()
            );
        }
        return Ok(());
    };

    let record = store.load_run(run_id)?;
    println!("run:      {}", record.run_id);
    println!("dataset:  {}", record.dataset_id);
    println!("source:   {}", record.source.display());
    println!("state:    {}", record.state);
    println!("attempts: {}", record.oracle_attempts);
    if let Some(origin) = record.rule_origin {
        println!("rules:    {}", origin.as_str());
    }
    for step in &record.history {
        let from = step.from.map(|state| state.as_str()).unwrap_or("-");
        match &step.note {
            Some(note) => println!("  {} {from} -> {} ({note})", step.at.to_rfc3339(), step.to),
            None => println!("  {} {from} -> {}", step.at.to_rfc3339(), step.to),
        }
    }
    for warning in &record.warnings {
        println!("warning:  {warning}");
    }
    if let Some(failure) = &record.failure {
        println!("failure:  {failure}");
    }
    if let Some(metrics) = &record.metrics {
        println!(
            "metrics:  total={} passed={} failed={} pass_rate={:.4}",
            metrics.total, metrics.passed, metrics.failed, metrics.pass_rate
        );
    }
    Ok(())
}
