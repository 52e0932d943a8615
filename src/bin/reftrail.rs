//! # Reftrail CLI - A versioned bibliography
//!
//! Command-line interface for the reftrail record store.
//!
//! ## Features
//! - Add, edit, rename and delete records in a flat YAML file
//! - Every change is auto-committed to git when tracking is enabled
//! - Undo and redo any auto-committed change
//! - Resume an interrupted review from its last commit
//!
//! ## Usage
//! ```bash
//! # Create the database and start tracking it
//! reftrail init --git
//!
//! # Add a record
//! reftrail add einstein1905 -f author="Albert Einstein" -f year=1905
//!
//! # Relabel records from their own fields
//! reftrail modify 'label:{author}{year}' einstein1905
//!
//! # Undo the last change, then redo it
//! reftrail undo
//! reftrail redo
//!
//! # Review records, marking some as done, and continue later
//! reftrail review --complete einstein1905
//! reftrail review --resume HEAD
//! ```

use clap::{Args, Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use reftrail::history::short_sha;
use reftrail::record_file::serialize_record;
use reftrail::utils::format_bytes;
use reftrail::{
    CommandInvocation, CommitKind, CommitStatus, FieldValue, MergePolicy, Modification, ModifyChange, ModifyMode,
    Record, Reftrail, ReftrailBuilder, ReftrailError, Result, ResumeOutcome, Severity, StoreConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Reftrail CLI - a bibliography that remembers every change
#[derive(Parser)]
#[command(name = "reftrail")]
#[command(version)]
#[command(about = "A versioned bibliography record store")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true, env = "REFTRAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Database file (overrides the configuration)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Cache directory (overrides the configuration)
    #[arg(long, global = true, conflicts_with = "no_cache")]
    cache_dir: Option<PathBuf>,

    /// Disable the parse cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Enable git tracking
    #[arg(long, global = true, overrides_with = "no_git")]
    git: bool,

    /// Disable git tracking
    #[arg(long, global = true)]
    no_git: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file (with --git, also start tracking it)
    Init,

    /// Add a new record
    Add(AddArgs),

    /// Change fields of a record
    Edit(EditArgs),

    /// Delete records
    #[command(alias = "rm")]
    Delete(DeleteArgs),

    /// Rename a record
    #[command(alias = "mv")]
    Rename(RenameArgs),

    /// Apply one field change to many records
    Modify(ModifyArgs),

    /// List records
    #[command(alias = "ls")]
    List,

    /// Show one record as stored
    Show {
        /// Record label
        label: String,
    },

    /// Re-parse the database and report problems
    Lint(LintArgs),

    /// Show the history of the database
    Log {
        /// Number of commits to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Undo the last auto-committed change
    Undo {
        /// Allow undoing commits not made by reftrail
        #[arg(short, long)]
        force: bool,
    },

    /// Redo the last undone change
    Redo,

    /// Step through records and keep track of which are done
    Review(ReviewArgs),
}

#[derive(Args, Serialize, Deserialize)]
struct AddArgs {
    /// Label of the new record
    label: String,

    /// Field as key=value (repeatable)
    #[arg(short = 'f', long = "field", value_parser = parse_key_value)]
    fields: Vec<String>,

    /// Pick a free label if this one is taken
    #[arg(long)]
    disambiguate: bool,
}

impl CommandInvocation for AddArgs {
    fn name(&self) -> &str {
        "add"
    }
}

#[derive(Args, Serialize, Deserialize)]
struct EditArgs {
    /// Label of the record
    label: String,

    /// Field as key=value (repeatable)
    #[arg(short = 'f', long = "field", value_parser = parse_key_value)]
    fields: Vec<String>,

    /// Field to remove (repeatable)
    #[arg(short = 'r', long = "remove")]
    remove: Vec<String>,
}

impl CommandInvocation for EditArgs {
    fn name(&self) -> &str {
        "edit"
    }
}

#[derive(Args, Serialize, Deserialize)]
struct DeleteArgs {
    /// Labels of the records
    #[arg(required = true)]
    labels: Vec<String>,
}

impl CommandInvocation for DeleteArgs {
    fn name(&self) -> &str {
        "delete"
    }
}

#[derive(Args, Serialize, Deserialize)]
struct RenameArgs {
    /// Current label
    old: String,
    /// New label
    new: String,
}

impl CommandInvocation for RenameArgs {
    fn name(&self) -> &str {
        "rename"
    }
}

#[derive(Args, Serialize, Deserialize)]
struct ModifyArgs {
    /// Change as field:value; the value may use {label} and {<field>}
    modification: String,

    /// Labels of the records
    #[arg(required = true)]
    labels: Vec<String>,

    /// Add to the field instead of overwriting it
    #[arg(short, long, conflicts_with = "remove")]
    add: bool,

    /// Remove from the field instead of overwriting it
    #[arg(short, long)]
    remove: bool,

    /// Only show what would change
    #[arg(long)]
    dry: bool,
}

impl ModifyArgs {
    fn mode(&self) -> ModifyMode {
        if self.add {
            ModifyMode::Add
        } else if self.remove {
            ModifyMode::Remove
        } else {
            ModifyMode::Set
        }
    }
}

impl CommandInvocation for ModifyArgs {
    fn name(&self) -> &str {
        "modify"
    }
}

#[derive(Args, Serialize, Deserialize)]
struct LintArgs {
    /// Rewrite every record in normalized form
    #[arg(long)]
    format: bool,
}

impl CommandInvocation for LintArgs {
    fn name(&self) -> &str {
        "lint"
    }
}

#[derive(Args, Serialize, Deserialize, Clone, Debug, Default)]
struct ReviewArgs {
    /// Labels to review (all records when empty)
    filter: Vec<String>,

    /// Labels that are already done
    #[arg(short, long, num_args = 1..)]
    done: Vec<String>,

    /// Labels completed in this session
    #[arg(long, num_args = 1..)]
    #[serde(skip)]
    complete: Vec<String>,

    /// Commit to resume a previous review from
    #[arg(short, long)]
    resume: Option<String>,
}

impl CommandInvocation for ReviewArgs {
    fn name(&self) -> &str {
        "review"
    }

    fn allow_empty(&self) -> bool {
        true
    }
}

fn parse_key_value(raw: &str) -> std::result::Result<String, String> {
    match raw.split_once('=') {
        Some((key, _)) if !key.trim().is_empty() => Ok(raw.to_string()),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn split_field(raw: &str) -> (String, FieldValue) {
    let (key, value) = raw.split_once('=').unwrap_or((raw, ""));
    (key.trim().to_string(), FieldValue::parse_cli(value))
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    // Run command
    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(e.exit_code());
    }
}

/// Resolve the configuration from file, environment and flags
fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(file) = &cli.file {
        config.file = file.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if cli.no_cache {
        config.cache_dir = None;
    }
    if cli.git {
        config.git = true;
    }
    if cli.no_git {
        config.git = false;
    }
    config.validate()?;
    Ok(config)
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Init => cmd_init(config, cli.git),
        Commands::Add(args) => cmd_add(config, args),
        Commands::Edit(args) => cmd_edit(config, args),
        Commands::Delete(args) => cmd_delete(config, args),
        Commands::Rename(args) => cmd_rename(config, args),
        Commands::Modify(args) => cmd_modify(config, args),
        Commands::List => cmd_list(config),
        Commands::Show { label } => cmd_show(config, label),
        Commands::Lint(args) => cmd_lint(config, args),
        Commands::Log { limit } => cmd_log(config, limit),
        Commands::Undo { force } => cmd_undo(config, force),
        Commands::Redo => cmd_redo(config),
        Commands::Review(args) => cmd_review(config, args),
    }
}

fn print_commit_status(status: &CommitStatus) {
    match status {
        CommitStatus::Committed { sha } => {
            println!("  Commit: {}", short_sha(sha).yellow());
        }
        CommitStatus::NotInitialized => {
            println!("  {}", "Git tracking is configured but not initialized".yellow());
        }
        CommitStatus::Disabled | CommitStatus::NoChanges => {}
    }
}

/// Create the database file and optionally start tracking it with git
fn cmd_init(config: StoreConfig, with_git: bool) -> Result<()> {
    let file = config.file.clone();
    let (reftrail, report) = ReftrailBuilder::from_config(config).init(with_git)?;

    if report.created {
        println!("{} Created database {}", "✓".green().bold(), file.display().to_string().cyan());
    } else {
        println!("{} Database {} already exists", "•".blue(), file.display().to_string().cyan());
    }
    if report.repository_created {
        println!("  Initialized git repository in {}", reftrail.config().root().display().to_string().cyan());
    }
    if let Some(status) = &report.commit {
        print_commit_status(status);
    }
    if with_git && !reftrail.config().git {
        println!(
            "  {}",
            "Enable git tracking in your configuration (or pass --git) for commits to be recorded".yellow()
        );
    }
    Ok(())
}

/// Add a new record
fn cmd_add(config: StoreConfig, args: AddArgs) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;

    let fields: BTreeMap<String, FieldValue> = args.fields.iter().map(|f| split_field(f)).collect();
    let (label, status) = reftrail.record(&args, |store| {
        let mut record = Record::new(args.label.clone(), fields);
        if store.contains(&args.label) {
            if !args.disambiguate {
                return Err(ReftrailError::LabelCollision(args.label.clone()));
            }
            let label = store.disambiguate_label(&args.label, None);
            record.set_label(label);
        }
        let label = record.label().to_string();
        store.update([record]);
        Ok(label)
    })?;

    println!("{} Added {}", "✓".green().bold(), label.yellow().bold());
    if label != args.label {
        println!("  Label '{}' was taken", args.label.dimmed());
    }
    print_commit_status(&status);
    Ok(())
}

/// Change fields of a record
fn cmd_edit(config: StoreConfig, args: EditArgs) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;

    let (changed, status) = reftrail.record(&args, |store| {
        if !store.contains(&args.label) {
            return Err(ReftrailError::LabelNotFound(args.label.clone()));
        }
        let mut changed = 0;
        for raw in &args.fields {
            let (key, value) = split_field(raw);
            if store.set_field(&args.label, &key, value.clone())?.as_ref() != Some(&value) {
                changed += 1;
            }
        }
        for key in &args.remove {
            if store.remove_field(&args.label, key)?.is_some() {
                changed += 1;
            }
        }
        Ok(changed)
    })?;

    println!(
        "{} Edited {} ({} fields changed)",
        "✓".green().bold(),
        args.label.yellow().bold(),
        changed.to_string().cyan()
    );
    print_commit_status(&status);
    Ok(())
}

/// Delete records
fn cmd_delete(config: StoreConfig, args: DeleteArgs) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;

    let (_, status) = reftrail.record(&args, |store| {
        if let Some(missing) = args.labels.iter().find(|l| !store.contains(l)) {
            return Err(ReftrailError::LabelNotFound(missing.clone()));
        }
        for label in &args.labels {
            store.pop(label)?;
        }
        Ok(())
    })?;

    for label in &args.labels {
        println!("{} Deleted {}", "✓".green().bold(), label.yellow().bold());
    }
    print_commit_status(&status);
    Ok(())
}

/// Rename a record
fn cmd_rename(config: StoreConfig, args: RenameArgs) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;

    let (_, status) = reftrail.record(&args, |store| store.rename(&args.old, &args.new))?;

    println!(
        "{} Renamed {} to {}",
        "✓".green().bold(),
        args.old.yellow(),
        args.new.yellow().bold()
    );
    print_commit_status(&status);
    Ok(())
}

/// Apply one field change to many records
fn cmd_modify(config: StoreConfig, args: ModifyArgs) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;
    let modification = Modification::parse(&args.modification, args.mode())?;

    if args.dry {
        let changes = modification.apply(reftrail.store_mut(), &args.labels, true)?;
        for change in &changes {
            print_change(&modification.field, change);
        }
        println!("{}", format!("{} entries would change", changes.len()).dimmed());
        return Ok(());
    }

    let (changes, status) = reftrail.record(&args, |store| modification.apply(store, &args.labels, false))?;
    for change in &changes {
        print_change(&modification.field, change);
    }
    println!("{} Modified {} entries", "✓".green().bold(), changes.len().to_string().cyan());
    print_commit_status(&status);
    Ok(())
}

fn print_change(field: &str, change: &ModifyChange) {
    let show = |value: &Option<FieldValue>| value.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string());
    println!(
        "  {} {}: {} {} {}",
        change.label.yellow().bold(),
        field.cyan(),
        show(&change.previous).dimmed(),
        "→".dimmed(),
        show(&change.value)
    );
}

/// List records in file order
fn cmd_list(config: StoreConfig) -> Result<()> {
    let reftrail = Reftrail::open(config)?;
    let store = reftrail.store();

    if store.is_empty() {
        println!("{}", "No entries found.".yellow());
        return Ok(());
    }

    for record in store.iter() {
        let title = record
            .get("title")
            .map(|t| t.to_string())
            .unwrap_or_default();
        println!("{}  {}", record.label().yellow().bold(), title.cyan());
    }

    let size = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);
    println!(
        "\n{}",
        format!("{} entries, {}", store.len(), format_bytes(size)).dimmed()
    );
    Ok(())
}

/// Show one record as it is written to disk
fn cmd_show(config: StoreConfig, label: String) -> Result<()> {
    let reftrail = Reftrail::open(config)?;
    let record = reftrail
        .store()
        .get(&label)
        .ok_or_else(|| ReftrailError::LabelNotFound(label.clone()))?;
    print!("{}", serialize_record(record)?);

    let (direct, indirect) = reftrail.store().find_related_labels(&label);
    let related: Vec<_> = direct.into_iter().chain(indirect).filter(|l| *l != label).collect();
    if !related.is_empty() {
        println!("{} {}", "Related:".dimmed(), related.join(", ").dimmed());
    }
    Ok(())
}

/// Parse the database from scratch and print every diagnostic
fn cmd_lint(config: StoreConfig, args: LintArgs) -> Result<()> {
    let mut reftrail = ReftrailBuilder::from_config(config).open()?;

    let start = Instant::now();
    let diagnostics = reftrail.lint()?;
    let duration = start.elapsed();

    for diagnostic in &diagnostics {
        let tag = match diagnostic.severity {
            Severity::Info => "info".blue(),
            Severity::Warning => "warning".yellow().bold(),
        };
        println!("{}: {}", tag, diagnostic.message);
    }
    println!(
        "{}",
        format!(
            "{} entries checked in {}, {} findings",
            reftrail.store().len(),
            format_duration(duration),
            diagnostics.len()
        )
        .dimmed()
    );

    if args.format {
        let labels: Vec<String> = reftrail.store().labels().map(str::to_string).collect();
        let (_, status) = reftrail.record(&args, |store| {
            // renaming a label to itself queues the block for rewriting
            for label in &labels {
                store.rename(label, label)?;
            }
            Ok(())
        })?;
        println!("{} Rewrote {} entries", "✓".green().bold(), labels.len().to_string().cyan());
        print_commit_status(&status);
    }
    Ok(())
}

/// Show the classified history
fn cmd_log(config: StoreConfig, limit: Option<usize>) -> Result<()> {
    let reftrail = Reftrail::open(config)?;
    let history = reftrail.history(limit)?;

    if history.is_empty() {
        println!("{}", "No commits found.".yellow());
        return Ok(());
    }

    for entry in &history {
        let date = entry
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let kind = match &entry.kind {
            CommitKind::AutoCommit { .. } => entry.kind.to_string().green(),
            CommitKind::Undo { .. } => entry.kind.to_string().red(),
            CommitKind::Redo { .. } => entry.kind.to_string().blue(),
            CommitKind::Other => entry.subject.normal(),
        };
        println!("{} {} {}", short_sha(&entry.sha).yellow(), date.dimmed(), kind);
    }
    Ok(())
}

/// Undo the last auto-committed change
fn cmd_undo(config: StoreConfig, force: bool) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;
    let outcome = reftrail.undo(force)?;

    println!(
        "{} Undid {} {}",
        "✓".green().bold(),
        short_sha(&outcome.reverted).yellow().bold(),
        outcome.reverted_subject.dimmed()
    );
    println!("  Commit: {}", short_sha(&outcome.commit).yellow());
    Ok(())
}

/// Redo the last undone change
fn cmd_redo(config: StoreConfig) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;
    let outcome = reftrail.redo()?;

    println!(
        "{} Redid {} {}",
        "✓".green().bold(),
        short_sha(&outcome.reverted).yellow().bold(),
        outcome.reverted_subject.dimmed()
    );
    println!("  Commit: {}", short_sha(&outcome.commit).yellow());
    Ok(())
}

/// Review records, tracking progress in the commit history
fn cmd_review(config: StoreConfig, mut args: ReviewArgs) -> Result<()> {
    let mut reftrail = Reftrail::open(config)?;
    // not recorded, so a resume would reset it
    let complete = std::mem::take(&mut args.complete);

    if let Some(reference) = args.resume.clone() {
        let mut policy = MergePolicy::new().carry_forward("done");
        if !args.filter.is_empty() {
            policy = policy.explicit("filter");
        }
        match reftrail.resume_into(&reference, &mut args, &policy) {
            ResumeOutcome::Merged { sha, .. } => {
                println!("{} Resuming review from {}", "•".blue(), short_sha(&sha).yellow());
            }
            ResumeOutcome::Disabled => return Err(ReftrailError::GitDisabled),
            ResumeOutcome::NotInitialized => {
                return Err(ReftrailError::GitNotInitialized(reftrail.config().root()))
            }
            ResumeOutcome::UnknownCommit(r) => {
                return Err(ReftrailError::internal(format!("Could not find the requested commit: '{}'", r)))
            }
            ResumeOutcome::Undecodable(r) => {
                return Err(ReftrailError::internal(format!(
                    "Could not extract review arguments from commit '{}'",
                    r
                )))
            }
        }
    }

    let selection: Vec<String> = if args.filter.is_empty() {
        reftrail.store().labels().map(str::to_string).collect()
    } else {
        args.filter.clone()
    };

    for label in complete {
        if !reftrail.store().contains(&label) {
            eprintln!("{}: no entry labeled '{}'", "Warning".yellow().bold(), label);
            continue;
        }
        if !args.done.contains(&label) {
            args.done.push(label);
        }
    }

    let pending: Vec<&String> = selection.iter().filter(|l| !args.done.contains(l)).collect();
    let reviewed = selection.len() - pending.len();

    let progress = ProgressBar::new(selection.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{bar:30.green/dim} {pos}/{len} reviewed") {
        progress.set_style(style);
    }
    progress.set_position(reviewed as u64);
    progress.abandon();

    if pending.is_empty() {
        println!("{} Review complete", "✓".green().bold());
    } else {
        println!("{}", "Still to review:".blue().bold());
        for label in &pending {
            let title = reftrail
                .store()
                .get(label)
                .and_then(|r| r.get("title"))
                .map(|t| t.to_string())
                .unwrap_or_default();
            println!("  {}  {}", label.yellow(), title.dimmed());
        }
    }

    let (_, status) = reftrail.record(&args, |_| Ok(()))?;
    if let CommitStatus::Committed { sha } = &status {
        println!(
            "\nContinue later with {}",
            format!("reftrail review --resume {}", short_sha(sha)).yellow()
        );
    }
    Ok(())
}
