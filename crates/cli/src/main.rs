//! `taskloom` CLI entry-point.
//!
//! Available sub-commands:
//! - `worker`   — execute one job handed off by the out-of-process
//!                runner (temp file path in, `StepOutcome` JSON out).
//! - `validate` — validate a workflow definition JSON file and print
//!                its layer plan.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use engine::runner::{InlineRunner, JobInvocation, Runner, StepOutcome, WorkerPayload};
use engine::{ErrorKind, InputSpec, StepDefinition};
use indexmap::IndexMap;
use jobs::{JobPayload, JobRegistry};
use serde::Deserialize;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "taskloom",
    about = "In-process workflow engine with real-time tracking",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a single job from a runner handoff file and print the
    /// outcome JSON to stdout.
    Worker {
        /// Path to the handoff file written by the subprocess runner.
        payload: PathBuf,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr: stdout belongs to the worker protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Worker { payload } => run_worker(payload).await,
        Command::Validate { path } => run_validate(path),
    }
}

// ---------------------------------------------------------------------------
// worker
// ---------------------------------------------------------------------------

/// Worker protocol: non-zero exit only for infrastructure failures
/// (unreadable or unparseable handoff file). Job-level failures —
/// including an unknown job class — are reported as a failure outcome
/// on stdout with exit code 0.
async fn run_worker(path: PathBuf) -> ExitCode {
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("cannot read handoff file {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };
    let payload: WorkerPayload = match serde_json::from_slice(&raw) {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("invalid handoff payload: {e}");
            return ExitCode::FAILURE;
        }
    };

    // The job-class registry is built once at startup and read-only
    // afterwards.
    let registry = JobRegistry::with_builtins();

    let outcome = match payload.decode_job().and_then(|job| registry.instantiate(&job)) {
        Ok(job) => {
            info!(step_id = payload.step_id.as_str(), job_id = job.id(), "worker executing job");
            let invocation = JobInvocation {
                step_id: payload.step_id.clone(),
                job,
                inputs: payload.inputs.clone(),
                globals: payload.globals.clone(),
                results: IndexMap::new(),
                workflow_id: payload.workflow_id,
                attempt: 1,
            };
            InlineRunner::new().run_job(&invocation).await
        }
        Err(e) => StepOutcome::failure(ErrorKind::JobException, e.to_string()),
    };

    match serde_json::to_string(&outcome) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("cannot encode outcome: {e}");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// On-disk workflow definition, resolvable through the job registry.
#[derive(Deserialize)]
struct WorkflowFile {
    name: String,
    #[serde(default)]
    steps: Vec<StepEntry>,
    #[serde(default)]
    edges: Vec<EdgeEntry>,
}

#[derive(Deserialize)]
struct StepEntry {
    id: String,
    job: JobPayload,
    #[serde(default)]
    inputs: InputSpec,
}

#[derive(Deserialize)]
struct EdgeEntry {
    from: String,
    to: String,
}

fn run_validate(path: PathBuf) -> ExitCode {
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("❌ cannot read file {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };
    let file: WorkflowFile = match serde_json::from_str(&content) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("❌ invalid JSON: {e}");
            return ExitCode::FAILURE;
        }
    };

    let registry = JobRegistry::with_builtins();
    let mut context = engine::Context::new(file.name);
    for entry in file.steps {
        let job = match registry.instantiate(&entry.job) {
            Ok(job) => job,
            Err(e) => {
                eprintln!("❌ step '{}': {e}", entry.id);
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = context.add_step(StepDefinition::new(entry.id, job, entry.inputs)) {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    }
    for edge in file.edges {
        if let Err(e) = context.connect(&edge.from, &edge.to) {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    }

    let plan = engine::build_layers(context.steps());
    if plan.is_deadlocked() {
        eprintln!("❌ Validation failed: every step sits on a cycle");
        return ExitCode::FAILURE;
    }
    if !plan.cyclic.is_empty() {
        eprintln!("⚠️  cycle detected; these steps run as trailing singletons: {:?}", plan.cyclic);
    }
    println!("✅ Workflow is valid. Layer plan: {:?}", plan.layers);
    ExitCode::SUCCESS
}
