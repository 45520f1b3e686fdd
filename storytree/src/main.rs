//! Story tree manager CLI.
//!
//! Maintains a branching story/task tree under `.storytree/`, resolves the
//! active node, reconciles state against a shrinking conversation, and can
//! drive the tree forward with a configured oracle command.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use storytree::engine::{CheckOutcome, Conversation, Engine};
use storytree::exit_codes;
use storytree::io::config::load_config;
use storytree::io::init::{InitOptions, STATE_SCHEMA, StoryPaths, init_story, validate_blob};
use storytree::io::oracle::CommandOracle;
use storytree::io::persist::{DirAdapter, PersistenceAdapter};
use storytree::io::transcript::TranscriptConversation;
use storytree::logging;
use storytree::tree::{NodeId, NodeKind};

#[derive(Parser)]
#[command(name = "storytree", version, about = "Branching story/task tree manager")]
struct Cli {
    /// Context key selecting which persisted tree to operate on.
    #[arg(long, global = true, default_value = "local")]
    context: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.storytree/` scaffolding (state dir, schema, config).
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check the persisted tree against the schema and invariants.
    Validate,
    /// Print the active path; the last line is the frontier node.
    Resolve,
    /// Add a root node.
    Add {
        description: String,
        /// Create a choice node instead of a task.
        #[arg(long)]
        choice: bool,
        /// Attach under this node instead of adding a root.
        #[arg(long)]
        parent: Option<NodeId>,
    },
    /// Edit a node's description.
    Describe { id: NodeId, text: String },
    /// Delete a node and its subtree.
    Delete { id: NodeId },
    /// Mark a task completed (or reopen it with --undo).
    Complete {
        id: NodeId,
        #[arg(long)]
        undo: bool,
        /// Conversation length to stamp the completion with.
        #[arg(long)]
        messages: Option<u64>,
    },
    /// Set or clear a node's jump target.
    Jump {
        id: NodeId,
        /// Target node id; omit to clear the jump.
        #[arg(long)]
        target: Option<NodeId>,
    },
    /// Parse outline text (from a file or stdin) into nodes.
    Ingest {
        file: Option<PathBuf>,
        /// Attach parsed roots under this node.
        #[arg(long)]
        parent: Option<NodeId>,
    },
    /// Ask the configured oracle to break the objective into an outline.
    Breakdown {
        /// Set the main objective before generating.
        #[arg(long)]
        objective: Option<String>,
    },
    /// Write the shareable tree projection (no completion stamps) to JSON.
    Export {
        /// Output path; defaults to a timestamped file name.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Append trees from an export payload file.
    Import { file: PathBuf },
    /// Reconcile completion state against a conversation length.
    Sync {
        #[arg(long)]
        messages: u64,
    },
    /// Run one auto-completion check against a transcript file.
    Check {
        #[arg(long)]
        transcript: PathBuf,
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
    let root = Path::new(".");
    match cli.command {
        Command::Init { force } => {
            init_story(root, &InitOptions { force })?;
            println!("initialized .storytree");
            Ok(exit_codes::OK)
        }
        Command::Validate => cmd_validate(root, &cli.context),
        Command::Resolve => cmd_resolve(root, &cli.context),
        Command::Add {
            description,
            choice,
            parent,
        } => {
            let mut engine = open_engine(root, &cli.context)?;
            let kind = if choice { NodeKind::Choice } else { NodeKind::Task };
            let id = match parent {
                Some(parent_id) => engine.add_child(parent_id, &description, kind)?,
                None => engine.add_root(&description, kind)?,
            };
            println!("{id}");
            Ok(exit_codes::OK)
        }
        Command::Describe { id, text } => {
            let mut engine = open_engine(root, &cli.context)?;
            engine.set_description(id, &text)?;
            Ok(exit_codes::OK)
        }
        Command::Delete { id } => {
            let mut engine = open_engine(root, &cli.context)?;
            engine.delete_node(id)?;
            Ok(exit_codes::OK)
        }
        Command::Complete { id, undo, messages } => {
            let mut engine = open_engine(root, &cli.context)?;
            engine.toggle_task_completion(id, !undo, messages)?;
            Ok(exit_codes::OK)
        }
        Command::Jump { id, target } => {
            let mut engine = open_engine(root, &cli.context)?;
            engine.set_jump_target(id, target)?;
            Ok(exit_codes::OK)
        }
        Command::Ingest { file, parent } => {
            let text = read_input(file.as_deref())?;
            let mut engine = open_engine(root, &cli.context)?;
            let created = engine.ingest_outline(&text, parent)?;
            println!("added {created} nodes");
            Ok(exit_codes::OK)
        }
        Command::Breakdown { objective } => cmd_breakdown(root, &cli.context, objective),
        Command::Export { out } => cmd_export(root, &cli.context, out),
        Command::Import { file } => {
            let contents =
                fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
            let payload: serde_json::Value = serde_json::from_str(&contents)
                .with_context(|| format!("parse {}", file.display()))?;
            let mut engine = open_engine(root, &cli.context)?;
            let appended = engine.import(&payload)?;
            println!("imported {appended} trees");
            Ok(exit_codes::OK)
        }
        Command::Sync { messages } => {
            let mut engine = open_engine(root, &cli.context)?;
            let summary = engine.handle_messages_removed(messages)?;
            println!(
                "reverted {} nodes, unresolved {} choices",
                summary.reverted.len(),
                summary.unresolved_choices.len()
            );
            Ok(exit_codes::OK)
        }
        Command::Check { transcript } => cmd_check(root, &cli.context, &transcript),
    }
}

/// Open the engine over the `.storytree/` blob directory for `context`.
fn open_engine(root: &Path, context: &str) -> Result<Engine<DirAdapter>> {
    let paths = StoryPaths::new(root);
    if !paths.state_dir.is_dir() {
        return Err(anyhow!("missing {} (run `storytree init`)", paths.state_dir.display()));
    }
    let mut engine = Engine::new(DirAdapter::new(&paths.blobs_dir));
    engine.load_context(context, None)?;
    Ok(engine)
}

fn cmd_validate(root: &Path, context: &str) -> Result<i32> {
    let paths = StoryPaths::new(root);
    let adapter = DirAdapter::new(&paths.blobs_dir);
    match adapter.load(context)? {
        Some(blob) => {
            validate_blob(&blob, STATE_SCHEMA)?;
            println!("ok");
        }
        None => println!("no state persisted for context '{context}'"),
    }
    Ok(exit_codes::OK)
}

fn cmd_resolve(root: &Path, context: &str) -> Result<i32> {
    let engine = open_engine(root, context)?;
    let path = engine.active_path();
    if path.is_empty() {
        println!("all story lines resolved");
        return Ok(exit_codes::COMPLETE);
    }
    for id in &path {
        let node = engine
            .forest()
            .find(*id)
            .ok_or_else(|| anyhow!("active path references missing node {id}"))?;
        println!("{}\t{}", node.id, node.description);
    }
    if let Some((_, text)) = engine.injection() {
        println!("{text}");
    }
    Ok(exit_codes::OK)
}

fn cmd_breakdown(root: &Path, context: &str, objective: Option<String>) -> Result<i32> {
    let paths = StoryPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let oracle = CommandOracle::from_config(&config.oracle);
    let mut engine = open_engine(root, context)?;
    if let Some(objective) = objective {
        let mut settings = engine.settings().clone();
        settings.main_objective = objective;
        engine.set_settings(settings)?;
    }
    let created = runtime()?.block_on(engine.generate_breakdown(&oracle))?;
    println!("added {created} nodes");
    Ok(exit_codes::OK)
}

fn cmd_export(root: &Path, context: &str, out: Option<PathBuf>) -> Result<i32> {
    let engine = open_engine(root, context)?;
    let payload = engine.export();
    let out = out.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        PathBuf::from(format!("storytree_export_{stamp}.json"))
    });
    let mut contents = serde_json::to_string_pretty(&payload).context("serialize export")?;
    contents.push('\n');
    fs::write(&out, contents).with_context(|| format!("write {}", out.display()))?;
    println!("{}", out.display());
    Ok(exit_codes::OK)
}

fn cmd_check(root: &Path, context: &str, transcript: &Path) -> Result<i32> {
    let paths = StoryPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let oracle = CommandOracle::from_config(&config.oracle);
    let conversation = TranscriptConversation::load(transcript)?;

    if !paths.state_dir.is_dir() {
        return Err(anyhow!("missing {} (run `storytree init`)", paths.state_dir.display()));
    }
    let mut engine = Engine::new(DirAdapter::new(&paths.blobs_dir));
    engine.load_context(context, Some(conversation.message_count()))?;

    let outcome = runtime()?.block_on(engine.auto_completion_check(&conversation, &oracle))?;
    match outcome {
        CheckOutcome::TaskCompleted(id) => println!("task {id} completed"),
        CheckOutcome::BranchResolved { choice, branch } => {
            println!("choice {choice} resolved to branch {branch}");
        }
        CheckOutcome::NoDecision => println!("no decision"),
        CheckOutcome::Stale => println!("stale reply discarded"),
        CheckOutcome::OracleFailed => println!("oracle failed; tree unchanged"),
        CheckOutcome::Skipped(reason) => println!("skipped: {reason:?}"),
    }
    Ok(exit_codes::OK)
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("read outline from stdin")?;
            Ok(text)
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")
}
