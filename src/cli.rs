use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use para_classifier_lib::models::migration::{MigrationOutcome, MigrationResult};
use para_classifier_lib::models::task::TaskStage;
use para_classifier_lib::services::ambiguity_service::DecisionItem;
use para_classifier_lib::services::reconcile_service::TreeEntry;
use para_classifier_lib::{
    check_api_key, format_duration, get_classification_view, migrate_task, start_classification,
    ApiKeyCheck, AppState, ChatCompletionClient, ClassificationView, ClassifierConfig,
    StatusPoller,
};

#[derive(Debug, Parser)]
#[command(
    name = "para-classifier",
    version,
    about = "Propose a PARA layout for a folder with an AI model and migrate the files"
)]
pub struct Cli {
    /// Path to a TOML config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "PARA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze a source folder and print the proposed layout
    Classify {
        /// Folder whose files should be classified
        #[arg(long)]
        source: String,

        /// PARA root the files should end up in
        #[arg(long)]
        target: String,

        /// Move every unambiguous file once analysis completes
        #[arg(long)]
        migrate: bool,

        /// Print the result as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Verify the configured API key with a trivial request
    CheckKey,
    /// Print the effective configuration
    Config,
}

pub async fn run(args: Cli) -> Result<()> {
    let config = ClassifierConfig::load(args.config.as_deref()).context("loading configuration")?;
    match args.command {
        Command::Classify {
            source,
            target,
            migrate,
            json,
        } => classify(config, &source, &target, migrate, json).await,
        Command::CheckKey => {
            let client = ChatCompletionClient::from_config(&config)?;
            match check_api_key(&client).await {
                ApiKeyCheck::Valid { model, reply } => {
                    println!("API key OK (model {model}): {reply}");
                    Ok(())
                }
                ApiKeyCheck::Invalid {
                    message, detail, ..
                } => bail!("{message}: {detail}"),
            }
        }
        Command::Config => {
            let mut shown = config;
            if shown.api_key.is_some() {
                shown.api_key = Some("********".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        }
    }
}

async fn classify(
    config: ClassifierConfig,
    source: &str,
    target: &str,
    migrate: bool,
    json: bool,
) -> Result<()> {
    let client = Arc::new(ChatCompletionClient::from_config(&config)?);
    let interval = config.poll_interval();
    let state = Arc::new(AppState::new(config));

    let task_id = start_classification(&state, client, source, target).await?;
    let mut poller = StatusPoller::spawn(Arc::clone(&state), task_id.clone(), interval);
    let mut last_line = String::new();
    let mut last = None;
    while let Some(snapshot) = poller.next().await {
        let line = format!(
            "[{:>3}%] {:<12} {}",
            snapshot.progress.percentage,
            snapshot.task.stage,
            snapshot.task.message.as_deref().unwrap_or_default()
        );
        if line != last_line {
            eprintln!("{line}");
            last_line = line;
        }
        last = Some(snapshot);
    }

    let Some(finished) = last else {
        bail!("task {task_id} disappeared before finishing");
    };
    if finished.task.stage == TaskStage::Error {
        bail!(finished
            .task
            .error
            .unwrap_or_else(|| "classification failed".to_string()));
    }
    if let Some(duration) = finished.task.total_duration {
        eprintln!("Finished in {}", format_duration(duration));
    }

    let view = get_classification_view(&state, &task_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_view(&view);
    }

    if migrate {
        let result = migrate_task(&state, &task_id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_migration(&result);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Text output
// ---------------------------------------------------------------------------

fn print_tree(entries: &[TreeEntry], depth: usize) {
    let indent = "  ".repeat(depth);
    for entry in entries {
        match entry {
            TreeEntry::File { name } => println!("{indent}{name}"),
            TreeEntry::FileList {
                name,
                is_new,
                files,
            } => {
                println!("{indent}{name}/{}", if *is_new { "  (new)" } else { "" });
                for file in files {
                    println!("{indent}  {file}");
                }
            }
            TreeEntry::Directory {
                name,
                is_new,
                children,
                ..
            } => {
                println!("{indent}{name}/{}", if *is_new { "  (new)" } else { "" });
                print_tree(children, depth + 1);
            }
        }
    }
}

fn print_view(view: &ClassificationView) {
    println!("Base path: {}", view.reconciled.base_path);
    println!();
    print_tree(&view.reconciled.tree, 0);
    println!();

    for row in &view.reconciled.rows {
        let levels = &row.levels;
        println!(
            "{}{}\t{} / {} / {}\t{}",
            if row.ambiguous { "? " } else { "" },
            row.filename,
            levels.level1,
            levels.level2,
            levels.level3,
            row.new_directory
        );
    }

    let ambiguity = &view.ambiguity;
    println!();
    println!(
        "{} ready to migrate, {} need a decision",
        ambiguity.migratable.len(),
        ambiguity.needs_decision.len()
    );
    for item in &ambiguity.needs_decision {
        match item {
            DecisionItem::AmbiguousEntry(entry) => {
                println!("  - {}: {}", entry.filename, entry.new_directory)
            }
            DecisionItem::Discussion(point) => {
                println!("  - {}: {}", point.filename, point.suggestion)
            }
        }
    }
}

fn print_migration(result: &MigrationResult) {
    for record in &result.records {
        match &record.outcome {
            MigrationOutcome::Success => println!("moved    {} -> {}", record.source, record.target),
            MigrationOutcome::Skipped { reason } => {
                println!("skipped  {} ({reason})", record.source)
            }
            MigrationOutcome::Failed { error } => println!("failed   {} ({error})", record.source),
        }
    }
    let summary = &result.summary;
    println!(
        "Migration: {} total, {} moved, {} skipped, {} failed",
        summary.total, summary.success, summary.skipped, summary.failed
    );
}
