// tidemark - keeps a project's task list, backups and session state from drifting
//
// This is the main entry point. Parses CLI args and dispatches to handlers.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tidemark_lib::{
    core::{
        BackupCatalog, BackupManager, DueReport, RootResolver, SessionRecorder, TimingEvaluator,
    },
    logging,
    store::{BackupKind, BackupVersion},
    Config, ProjectLayout, TidemarkError,
};

#[derive(Parser)]
#[command(name = "tidemark", version, about = "Timed state and backup retention for one project")]
struct Cli {
    /// Directory to start looking for the project root from (default: cwd)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a backup now
    Backup {
        /// Also copy the full tree set (patterns, memory)
        #[arg(long)]
        full: bool,
        /// Why the backup was taken
        #[arg(short, long, default_value = "manual")]
        reason: String,
    },
    /// Show project root, retained backups and due flags
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Report which artifacts are due
    Due {
        #[arg(long)]
        json: bool,
    },
    /// Evaluate timers and optionally act on them
    Check {
        /// Initialize a missing task list and back up if due
        #[arg(long)]
        apply: bool,
    },
    /// Append to session history and refresh the latest state
    Record {
        action: String,
        detail: Option<String>,
        /// Pending next step (repeatable)
        #[arg(long = "next")]
        next: Vec<String>,
    },
    /// Re-hash a backup against its manifest (default: latest)
    Verify {
        #[arg(value_name = "VERSION")]
        target: Option<String>,
    },
    /// Create the marker file, task list and backups directory here
    Init,
}

struct Project {
    layout: ProjectLayout,
    config: Config,
}

impl Project {
    fn backups(&self) -> BackupManager {
        BackupManager::new(self.layout.clone(), &self.config)
    }

    fn recorder(&self) -> SessionRecorder {
        SessionRecorder::new(self.layout.clone(), self.config.thresholds())
    }

    fn evaluate(&self) -> DueReport {
        TimingEvaluator::evaluate(&self.layout, &self.config.thresholds())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(err) = e.downcast_ref::<TidemarkError>() {
                eprintln!("{}", err.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let start = match cli.root {
        Some(dir) => dir,
        None => env::current_dir().context("reading the current directory")?,
    };

    match cli.command {
        Command::Init => handle_init(start),
        Command::Backup { full, reason } => handle_backup(&open_project(&start)?, full, &reason),
        Command::Status { json } => handle_status(&open_project(&start)?, json),
        Command::Due { json } => handle_due(&open_project(&start)?, json),
        Command::Check { apply } => handle_check(&open_project(&start)?, apply),
        Command::Record {
            action,
            detail,
            next,
        } => handle_record(&open_project(&start)?, &action, detail.as_deref(), &next),
        Command::Verify { target } => handle_verify(&open_project(&start)?, target.as_deref()),
    }
}

fn open_project(start: &Path) -> anyhow::Result<Project> {
    let root = RootResolver::resolve(start);
    let layout = ProjectLayout::new(root);
    let config = Config::load(&layout)
        .with_context(|| format!("loading configuration for {}", layout.root().display()))?;

    Ok(Project { layout, config })
}

fn handle_init(start: PathBuf) -> anyhow::Result<()> {
    let layout = ProjectLayout::new(start);
    layout
        .init()
        .with_context(|| format!("initializing project in {}", layout.root().display()))?;

    let project = open_project(layout.root())?;
    project.recorder().record("init", "Project initialized");

    println!("✓ Initialized tidemark project at {}", layout.root().display());
    Ok(())
}

fn handle_backup(project: &Project, full: bool, reason: &str) -> anyhow::Result<()> {
    let kind = if full { BackupKind::Full } else { BackupKind::Standard };

    let outcome = project
        .backups()
        .create_backup(reason, kind)
        .with_context(|| {
            format!(
                "creating {} backup in {}",
                kind,
                project.layout.backups_dir().display()
            )
        })?;

    let manifest = &outcome.record.manifest;
    println!(
        "✓ Created {} backup {} ({} files, {} bytes)",
        kind,
        outcome.record.version,
        manifest.files.len(),
        manifest.total_size()
    );
    for missing in &manifest.missing {
        println!("  ! not copied: {} ({})", missing.path, missing.error);
    }
    if !outcome.prune.removed.is_empty() {
        let removed: Vec<String> = outcome.prune.removed.iter().map(|v| v.to_string()).collect();
        println!("  pruned: {}", removed.join(", "));
    }
    if !outcome.prune.reclaimed.is_empty() {
        let reclaimed: Vec<String> = outcome.prune.reclaimed.iter().map(|v| v.to_string()).collect();
        println!("  removed incomplete: {}", reclaimed.join(", "));
    }
    for (version, error) in &outcome.prune.failed {
        println!("  ! could not prune {}: {}", version, error);
    }

    project.recorder().record(
        "backup",
        &format!(
            "Created {} backup {} ({})",
            kind, outcome.record.version, reason
        ),
    );

    Ok(())
}

fn handle_status(project: &Project, json: bool) -> anyhow::Result<()> {
    let catalog = BackupCatalog::scan(&project.layout).context("listing backups")?;
    let report = project.evaluate();
    let latest_state = project.recorder().latest_state();

    if json {
        let backups: Vec<serde_json::Value> = catalog
            .records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "version": r.version.to_string(),
                    "kind": r.manifest.kind,
                    "reason": r.manifest.reason,
                    "created_at": r.manifest.created_at,
                    "files": r.manifest.files.len(),
                    "missing": r.manifest.missing.len(),
                })
            })
            .collect();

        let value = serde_json::json!({
            "root": project.layout.root(),
            "has_marker": RootResolver::has_marker(project.layout.root()),
            "max_kept": project.config.retention.max_kept,
            "backups": backups,
            "corrupt": catalog.corrupt,
            "due": due_json(&report),
            "last_action": latest_state.as_ref().map(|s| s.last_action.clone()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let name = RootResolver::project_name(project.layout.root()).unwrap_or_else(|| "?".to_string());

    println!("\ntidemark Status: {}", name);
    println!("{}", "=".repeat(60));
    println!("  Root:     {}", project.layout.root().display());
    if !RootResolver::has_marker(project.layout.root()) {
        println!("  (no tidemark.json found, using start directory; run 'tidemark init')");
    }

    println!(
        "\nBackups ({} of max {}):",
        catalog.len(),
        project.config.retention.max_kept
    );
    if catalog.is_empty() {
        println!("  none yet");
    }
    for record in &catalog.records {
        println!(
            "  {:<18} {:<8} {:>4} files  {}",
            record.version.to_string(),
            record.manifest.kind,
            record.manifest.files.len(),
            record.manifest.reason
        );
    }
    if !catalog.corrupt.is_empty() {
        println!("  ({} incomplete backup directories ignored)", catalog.corrupt.len());
    }

    println!("\nTimers:");
    print_due(&report);

    if let Some(state) = latest_state {
        println!("\nLast action: {} ({})", state.last_action, state.timestamp.to_rfc3339());
        for step in &state.next_steps {
            println!("  next: {}", step);
        }
    }

    println!("{}", "=".repeat(60));
    Ok(())
}

fn handle_due(project: &Project, json: bool) -> anyhow::Result<()> {
    let report = project.evaluate();

    if json {
        println!("{}", serde_json::to_string_pretty(&due_json(&report))?);
    } else {
        print_due(&report);
    }

    Ok(())
}

fn handle_check(project: &Project, apply: bool) -> anyhow::Result<()> {
    let report = project.evaluate();
    print_due(&report);

    if !report.any_due() {
        println!("Nothing due.");
        return Ok(());
    }
    if !apply {
        return Ok(());
    }

    let mut actions = Vec::new();

    if report.task_list.must_initialize {
        if project
            .layout
            .initialize_task_list()
            .context("creating the task list")?
        {
            println!("✓ Created {}", project.layout.task_list().display());
            actions.push("initialized task list".to_string());
        }
    } else if report.task_list.due {
        println!("Task list is stale; it needs rewriting.");
        actions.push("task list flagged stale".to_string());
    }

    if report.backup.due {
        let outcome = project
            .backups()
            .create_backup("scheduled", BackupKind::Standard)
            .context("creating scheduled backup")?;
        println!("✓ Created backup {}", outcome.record.version);
        actions.push(format!("scheduled backup {}", outcome.record.version));
    }

    project.recorder().record("check", &actions.join("; "));
    Ok(())
}

fn handle_record(
    project: &Project,
    action: &str,
    detail: Option<&str>,
    next: &[String],
) -> anyhow::Result<()> {
    let outcome = project
        .recorder()
        .record_with_next_steps(action, detail.unwrap_or(""), next);

    // Recording never fails the invocation, just say what didn't stick
    if !outcome.history_written {
        eprintln!("warning: session history was not updated");
    }
    if !outcome.snapshot_written {
        eprintln!("warning: latest state was not updated");
    }

    Ok(())
}

fn handle_verify(project: &Project, version: Option<&str>) -> anyhow::Result<()> {
    let version = version
        .map(|v| v.parse::<BackupVersion>())
        .transpose()
        .context("parsing backup version")?;

    let report = project
        .backups()
        .verify(version.as_ref())
        .context("verifying backup")?;

    let name = report
        .version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".to_string());

    println!("Backup {}: {} files verified", name, report.verified);
    for path in &report.mismatched {
        println!("  ✗ changed: {}", path);
    }
    for path in &report.missing {
        println!("  ✗ missing: {}", path);
    }

    if report.is_intact() {
        println!("✓ Backup is intact");
        Ok(())
    } else {
        Err(anyhow!("backup {} does not match its manifest", name))
    }
}

fn print_due(report: &DueReport) {
    for artifact in report.artifacts() {
        let age = match artifact.age {
            Some(age) => format_age(age),
            None => "missing".to_string(),
        };
        let verdict = if artifact.must_initialize {
            "due (initialize)"
        } else if artifact.due {
            "due"
        } else {
            "ok"
        };
        println!(
            "  {:<10} age {:<10} threshold {:<8} {}",
            artifact.artifact,
            age,
            format_age(artifact.threshold),
            verdict
        );
    }
}

fn due_json(report: &DueReport) -> serde_json::Value {
    let entry = |a: &tidemark_lib::core::ArtifactReport| {
        serde_json::json!({
            "path": a.path,
            "age_seconds": a.age.map(|d| d.as_secs()),
            "threshold_seconds": a.threshold.as_secs(),
            "due": a.due,
            "must_initialize": a.must_initialize,
        })
    };

    serde_json::json!({
        "task_list": entry(&report.task_list),
        "backup": entry(&report.backup),
    })
}

fn format_age(age: Duration) -> String {
    let minutes = age.as_secs() / 60;
    match minutes {
        0 => "<1m".to_string(),
        m if m < 60 => format!("{}m", m),
        m if m < 24 * 60 => format!("{}h{}m", m / 60, m % 60),
        m => format!("{}d{}h", m / (24 * 60), (m / 60) % 24),
    }
}
