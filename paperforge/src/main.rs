//! paperforge CLI: turn a research paper into a runnable reproduction project.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use paperforge::core::imports::extract_imports;
use paperforge::core::materialize::materialize;
use paperforge::core::types::{ParsedSections, RunRecord};
use paperforge::exit_codes;
use paperforge::io::backend::CodexGenerator;
use paperforge::io::config::{CONFIG_FILE_NAME, PipelineConfig, load_config, write_config};
use paperforge::io::document::source_for;
use paperforge::io::project::{RunPaths, write_project};
use paperforge::io::publish::GhPublisher;
use paperforge::io::sandbox::ProcessRunner;
use paperforge::logging;
use paperforge::pipeline::{Pipeline, PipelineOutcome, PipelineSettings, StageEvent};
use uuid::Uuid;

/// Hex characters of the UUID kept in a run id.
const RUN_ID_LEN: usize = 12;

#[derive(Parser)]
#[command(
    name = "paperforge",
    version,
    about = "Generate, run, repair and review a reproduction of a research paper"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `paperforge.toml` in the current directory.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the full pipeline on a paper (PDF or text).
    Run {
        paper: PathBuf,
        /// Free-text instructions passed to every stage.
        #[arg(short, long, default_value = "")]
        instructions: String,
        /// JSON file with pre-parsed sections; skips paper parsing.
        #[arg(long)]
        sections: Option<PathBuf>,
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        config: PathBuf,
    },
    /// Materialize a project from an existing `method.py` without running it.
    Materialize {
        code: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Run {
            paper,
            instructions,
            sections,
            config,
        } => cmd_run(&paper, instructions, sections.as_deref(), &config),
        Command::Materialize { code, out } => cmd_materialize(&code, &out),
    }
}

fn cmd_init(force: bool) -> Result<i32> {
    let path = Path::new(CONFIG_FILE_NAME);
    if path.exists() && !force {
        bail!("{CONFIG_FILE_NAME} already exists (use --force to overwrite)");
    }
    write_config(path, &PipelineConfig::default())?;
    println!("wrote {CONFIG_FILE_NAME}");
    Ok(exit_codes::OK)
}

fn cmd_run(
    paper: &Path,
    instructions: String,
    sections: Option<&Path>,
    config_path: &Path,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let paper_text = source_for(paper)
        .extract()
        .with_context(|| format!("extract text from {}", paper.display()))?;

    let run_id = new_run_id();
    let mut record = RunRecord::new(&run_id, instructions);
    if let Some(path) = sections {
        record.parsed_sections = read_sections(path)?;
    }

    let paths = RunPaths::new(&config.output_dir, &run_id);
    fs::create_dir_all(&paths.run_dir)
        .with_context(|| format!("create run dir {}", paths.run_dir.display()))?;
    let generator = CodexGenerator::new(
        config.generator.command.clone(),
        paths.run_dir.join("generator"),
        Duration::from_secs(config.generator.timeout_secs),
        config.generator.output_limit_bytes,
    );
    let runner = ProcessRunner {
        output_limit_bytes: config.output_limit_bytes,
    };
    let publisher = config.publish.clone().map(GhPublisher::new);

    let mut pipeline = Pipeline::new(&generator, &runner, PipelineSettings::from_config(&config));
    if let Some(publisher) = &publisher {
        pipeline = pipeline.with_publisher(publisher);
    }
    eprintln!("run {run_id} -> {}", paths.run_dir.display());
    let outcome = pipeline.run(&paths, Some(&paper_text), record, print_stage)?;
    print_outcome(&outcome);

    Ok(if outcome.record.execution_success {
        exit_codes::OK
    } else {
        exit_codes::EXECUTION_FAILED
    })
}

fn cmd_materialize(code_path: &Path, out: &Path) -> Result<i32> {
    let code = fs::read_to_string(code_path)
        .with_context(|| format!("read {}", code_path.display()))?;
    let imports = extract_imports(&code);
    let record = RunRecord::new("materialize", "");
    let files = materialize(&code, &record, &imports)?;
    write_project(out, &files)?;
    println!("wrote {} files to {}", files.len(), out.display());
    Ok(exit_codes::OK)
}

fn new_run_id() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RUN_ID_LEN)
        .collect()
}

fn read_sections(path: &Path) -> Result<ParsedSections> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse sections {}", path.display()))
}

fn print_stage(event: &StageEvent<'_>) {
    let next = event.next.map_or("end", |stage| stage.as_str());
    eprintln!(
        "[{:02}] {:<9} -> {:<9} {}",
        event.seq, event.stage, next, event.record.status
    );
}

fn print_outcome(outcome: &PipelineOutcome) {
    let record = &outcome.record;
    println!("run_id: {}", record.run_id);
    println!("stages: {}", outcome.stages_executed);
    println!("execution_success: {}", record.execution_success);
    println!("revision_count: {}", record.revision_count);
    println!("review_iteration: {}", record.review_iteration);
    if let Some(feedback) = &record.review_feedback {
        println!("verdict: {}", feedback.verdict.as_str());
    }
    if let Some(dir) = &record.output_repo_path {
        println!("project: {}", dir.display());
    }
    if let Some(publication) = &record.publication {
        println!("published: {}", publication.repo_url);
    }
    if let Some(err) = &record.publish_error {
        println!("publish_error: {err}");
    }
}
