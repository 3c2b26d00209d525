//! Autonomous coding-agent loop.
//!
//! Runs one natural-language task against a sandbox directory, printing the
//! answer or the reason the loop halted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use codeloop::core::safety::Safety;
use codeloop::core::types::Phase;
use codeloop::exit_codes;
use codeloop::io::collaborators::{InMemorySession, JsonlTrace, LogTrace, NoRetrieval, TraceSink};
use codeloop::io::config::{AgentConfig, PatchBackend, config_path, load_config, write_config};
use codeloop::io::model::CommandModel;
use codeloop::io::patch::{BuiltinPatchApplier, GitPatchApplier, PatchApplier};
use codeloop::logging;
use codeloop::orchestrator::{Collaborators, Orchestrator, TaskStatus};
use codeloop::tools::registry::ToolRegistry;

#[derive(Parser)]
#[command(name = "codeloop", version, about = "Autonomous coding-agent control loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `<root>/.codeloop/config.toml` if missing.
    Init {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one task until it is done or halts.
    Run {
        task: String,
        /// Sandbox root; every path the agent touches resolves inside it.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Config file. Defaults to `<root>/.codeloop/config.toml`.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Append trace events as JSON lines to this file.
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Print the tool contracts visible in a phase as JSON.
    Tools {
        #[arg(long, default_value_t = Phase::Planning)]
        phase: Phase,
    },
    /// Report whether the sandbox policy allows a path.
    CheckPath {
        path: String,
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { root, force } => cmd_init(&root, force),
        Command::Run {
            task,
            root,
            config,
            trace,
        } => cmd_run(&task, &root, config.as_deref(), trace),
        Command::Tools { phase } => cmd_tools(phase),
        Command::CheckPath { path, root, config } => cmd_check_path(&path, &root, config.as_deref()),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve root {}", root.display()))?;
    let path = config_path(&root);
    if path.exists() && !force {
        println!("kept: {}", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &AgentConfig::default())?;
    println!("wrote: {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(task: &str, root: &Path, config: Option<&Path>, trace: Option<PathBuf>) -> Result<i32> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve root {}", root.display()))?;
    let cfg = load(&root, config)?;
    let registry = ToolRegistry::new().context("build tool registry")?;
    let model = CommandModel::new(
        cfg.model.command.clone(),
        &root,
        cfg.model_timeout(),
        cfg.model.output_limit_bytes,
    );
    let applier: Box<dyn PatchApplier> = match cfg.patch.backend {
        PatchBackend::Git => Box::new(GitPatchApplier::new(&root, cfg.vcs_timeout())),
        PatchBackend::Builtin => Box::new(BuiltinPatchApplier::new(&root)),
    };
    let trace: Box<dyn TraceSink> = match trace {
        Some(path) => Box::new(JsonlTrace::new(path)),
        None => Box::new(LogTrace),
    };
    let memory = InMemorySession::new();
    let orchestrator = Orchestrator::new(
        &root,
        cfg,
        &registry,
        &model,
        applier.as_ref(),
        Collaborators {
            retriever: &NoRetrieval,
            trace: trace.as_ref(),
            memory: &memory,
        },
    )?;

    let outcome = orchestrator.run_task(task);
    match &outcome.answer {
        Some(answer) => println!("{answer}"),
        None => println!("{}: {}", outcome.status.as_str(), outcome.reason),
    }
    Ok(match outcome.status {
        TaskStatus::Done => exit_codes::OK,
        TaskStatus::Halted => {
            eprintln!("halted after {} cycle(s): {}", outcome.cycles, outcome.reason);
            exit_codes::HALTED
        }
    })
}

fn cmd_tools(phase: Phase) -> Result<i32> {
    let registry = ToolRegistry::new().context("build tool registry")?;
    let tools: Vec<Value> = registry
        .tools_for_phase(phase)
        .values()
        .map(|contract| contract.describe())
        .collect();
    let payload = serde_json::to_string_pretty(&tools).context("serialize tool contracts")?;
    println!("{payload}");
    Ok(exit_codes::OK)
}

fn cmd_check_path(path: &str, root: &Path, config: Option<&Path>) -> Result<i32> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve root {}", root.display()))?;
    let cfg = load(&root, config)?;
    let safety = Safety::new(&root, &cfg.sandbox.allow_globs, &cfg.sandbox.deny_globs)?;
    match safety.check(path) {
        Ok(absolute) => {
            println!("allowed: {}", absolute.display());
            Ok(exit_codes::OK)
        }
        Err(err) => {
            println!("denied: {err}");
            Ok(exit_codes::INVALID)
        }
    }
}

fn load(root: &Path, config: Option<&Path>) -> Result<AgentConfig> {
    let path = config.map_or_else(|| config_path(root), Path::to_path_buf);
    load_config(&path)
}
