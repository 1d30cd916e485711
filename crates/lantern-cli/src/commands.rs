use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context};
use chrono::Utc;
use colored::{ColoredString, Colorize};
use lantern_criteria::{Criteria, CustomField, CustomRule, Operator, SortOrder};
use lantern_sdk::{
    retention_cutoff, CancelFlag, LoggerStore, OpenOptions, ShareOptions, ShareOutput,
    SharingTimeRange, StoreConfig,
};
use lantern_store::{EntityStore, StoreWriter};
use lantern_types::{BlobKey, Entity, LogLevel, Message, NetworkTask, TaskState};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let json = matches!(cli.format, OutputFormat::Json);
    match cli.command {
        Command::Info(args) => cmd_info(&args.path, json),
        Command::Messages(args) => cmd_messages(args, json),
        Command::Tasks(args) => cmd_tasks(args, json),
        Command::Blob(args) => cmd_blob(args),
        Command::Verify(args) => cmd_verify(&args.path, json),
        Command::Export(args) => cmd_export(args),
        Command::Prune(args) => cmd_prune(args, json),
        Command::Config(args) => cmd_config(args, json),
    }
}

/// A store directory opened read-only, or a document loaded into memory.
fn open_source(path: &Path) -> anyhow::Result<LoggerStore> {
    debug!(path = %path.display(), "opening source");
    if path.is_dir() {
        let config = StoreConfig::load_for_store(path)?;
        LoggerStore::open(path, OpenOptions::readonly(), config)
            .with_context(|| format!("cannot open store {}", path.display()))
    } else {
        LoggerStore::from_archive(path)
            .with_context(|| format!("cannot open document {}", path.display()))
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn entities(logger: &LoggerStore, criteria: &Criteria) -> anyhow::Result<Vec<Entity>> {
    let ids = logger.query(criteria)?;
    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
        out.push(logger.fetch(id)?);
    }
    Ok(out)
}

// ---- info / verify ----

fn cmd_info(path: &Path, json: bool) -> anyhow::Result<()> {
    if !path.is_dir() {
        let document = LoggerStore::open_archive(path)?;
        let info = document.info()?;
        document.close();
        if json {
            return print_json(&info);
        }
        println!("{} {}", "Document".bold(), path.display());
        println!("  Schema:       {}", info.schema_version);
        println!("  Created:      {}", info.created_at.to_rfc3339().dimmed());
        println!("  Sessions:     {}", info.session_count);
        println!("  Messages:     {}", info.message_count.to_string().bold());
        println!("  Tasks:        {}", info.task_count.to_string().bold());
        println!("  Transactions: {}", info.transaction_count);
        println!("  Blobs:        {} ({} bytes)", info.blob_count, info.total_blob_bytes);
        if let Some(filter) = &info.filter {
            println!("  Filter:       {}", filter.cyan());
        }
        for (key, value) in &info.app_info {
            println!("  {key}: {value}");
        }
        return Ok(());
    }

    let logger = open_source(path)?;
    let info = logger.info();
    if json {
        return print_json(&info);
    }
    println!("{} {}", "Store".bold(), path.display());
    println!("  Sessions:     {}", info.counts.sessions);
    println!("  Messages:     {}", info.counts.messages.to_string().bold());
    println!("  Tasks:        {}", info.counts.tasks.to_string().bold());
    println!("  Transactions: {}", info.counts.transactions);
    println!(
        "  Blobs:        {} ({} bytes, {} on disk)",
        info.blob_count, info.blob_logical_bytes, info.blob_stored_bytes
    );
    match info.current_session {
        Some(session) => println!("  Active:       {}", session.to_string().cyan()),
        None => println!("  Active:       {}", "none".dimmed()),
    }
    Ok(())
}

fn cmd_verify(path: &Path, json: bool) -> anyhow::Result<()> {
    let document = LoggerStore::open_archive(path)?;
    let report = document
        .verify()
        .with_context(|| format!("{} failed verification", path.display()))?;
    document.close();
    if json {
        return print_json(&serde_json::json!({
            "sections": report.sections,
            "records": report.records,
            "blobs": report.blobs,
        }));
    }
    println!("{} Document integrity verified", "✓".green().bold());
    println!("  Sections: {}", report.sections);
    println!("  Records:  {}", report.records);
    println!("  Blobs:    {}", report.blobs);
    Ok(())
}

// ---- messages / tasks ----

fn order(oldest_first: bool) -> SortOrder {
    if oldest_first {
        SortOrder::OldestFirst
    } else {
        SortOrder::NewestFirst
    }
}

pub(crate) fn message_criteria(args: &MessagesArgs) -> Criteria {
    let mut criteria = Criteria::messages()
        .with_limit(args.limit)
        .with_order(order(args.oldest_first));
    if let Some(level) = args.level {
        criteria = criteria.with_levels(level.and_above());
    }
    criteria.labels.focused = args.label.clone();
    criteria.pinned_only = args.pinned;
    if let Some(text) = &args.grep {
        criteria.custom.is_enabled = true;
        criteria
            .custom
            .rules
            .push(CustomRule::new(CustomField::Text, Operator::Contains, text.as_str()));
    }
    criteria
}

pub(crate) fn task_criteria(args: &TasksArgs) -> Criteria {
    let mut criteria = Criteria::tasks()
        .with_limit(args.limit)
        .with_order(order(args.oldest_first));
    criteria.hosts.allowed = args.host.iter().cloned().collect();
    if args.min_status.is_some() || args.max_status.is_some() {
        criteria.response.is_enabled = true;
        criteria.response.status_code.from = args.min_status;
        criteria.response.status_code.to = args.max_status;
    }
    if let Some(text) = &args.grep {
        criteria.custom.is_enabled = true;
        criteria
            .custom
            .rules
            .push(CustomRule::new(CustomField::Url, Operator::Contains, text.as_str()));
    }
    criteria
}

fn level_tag(level: LogLevel) -> ColoredString {
    let tag = format!("{:<8}", level.as_str());
    match level {
        LogLevel::Trace | LogLevel::Debug => tag.dimmed(),
        LogLevel::Info => tag.normal(),
        LogLevel::Notice => tag.cyan(),
        LogLevel::Warning => tag.yellow(),
        LogLevel::Error => tag.red(),
        LogLevel::Critical => tag.red().bold(),
    }
}

fn print_message(message: &Message) {
    println!(
        "{} {} {} {}",
        message.created_at.format("%H:%M:%S%.3f").to_string().dimmed(),
        level_tag(message.level),
        format!("[{}]", message.label).bold(),
        message.text
    );
}

fn print_task(task: &NetworkTask) {
    let status = match (task.state, task.status_code) {
        (TaskState::Pending, _) => "…".dimmed(),
        (TaskState::Failure, None) => "ERR".red().bold(),
        (_, Some(code)) if code < 400 => code.to_string().green(),
        (_, Some(code)) => code.to_string().red(),
        (TaskState::Success, None) => "-".dimmed(),
    };
    let duration = task
        .duration
        .map(|d| format!("{}ms", d.as_millis()))
        .unwrap_or_default();
    println!(
        "{} {} {} {} {}",
        task.created_at.format("%H:%M:%S%.3f").to_string().dimmed(),
        status,
        task.method.bold(),
        task.url,
        duration.dimmed()
    );
    if let Some(error) = &task.error {
        println!("    {} {} ({} {})", "error:".red(), error.description, error.domain, error.code);
    }
}

fn cmd_messages(args: MessagesArgs, json: bool) -> anyhow::Result<()> {
    let logger = open_source(&args.path)?;
    let found = entities(&logger, &message_criteria(&args))?;
    let messages: Vec<&Message> = found.iter().filter_map(Entity::as_message).collect();
    if json {
        return print_json(&messages);
    }
    if messages.is_empty() {
        println!("No messages.");
    }
    for message in messages {
        print_message(message);
    }
    Ok(())
}

fn cmd_tasks(args: TasksArgs, json: bool) -> anyhow::Result<()> {
    let logger = open_source(&args.path)?;
    let found = entities(&logger, &task_criteria(&args))?;
    let tasks: Vec<&NetworkTask> = found.iter().filter_map(Entity::as_task).collect();
    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No tasks.");
    }
    for task in tasks {
        print_task(task);
    }
    Ok(())
}

// ---- blob ----

fn cmd_blob(args: BlobArgs) -> anyhow::Result<()> {
    let key = BlobKey::from_hex(&args.key).context("invalid blob key")?;
    let logger = open_source(&args.path)?;
    let data = logger.blob(&key)?;
    match &args.output {
        Some(path) => {
            fs::write(path, &data)?;
            eprintln!("{} Wrote {} bytes to {}", "✓".green(), data.len(), path.display());
        }
        None => io::stdout().write_all(&data)?,
    }
    Ok(())
}

// ---- export / prune ----

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let logger = open_source(&args.store)?;
    let options = ShareOptions {
        time_range: match args.range {
            RangeArg::Session => SharingTimeRange::CurrentSession,
            RangeArg::Hour => SharingTimeRange::LastHour,
            RangeArg::Today => SharingTimeRange::Today,
            RangeArg::All => SharingTimeRange::All,
        },
        min_level: args.min_level,
        output: if args.text {
            ShareOutput::Text
        } else {
            ShareOutput::Document
        },
        include_blobs: !args.no_blobs,
    };
    let report = logger.export(&args.output, &options, &CancelFlag::new())?;
    println!(
        "{} Exported {} records to {} ({} bytes)",
        "✓".green().bold(),
        report.records.to_string().bold(),
        report.path.display(),
        report.bytes
    );
    Ok(())
}

fn cmd_prune(args: PruneArgs, json: bool) -> anyhow::Result<()> {
    let config = StoreConfig::load_for_store(&args.store)?;
    let options = OpenOptions {
        create: false,
        readonly: false,
    };
    let store = EntityStore::open(&args.store, options, config.settings())
        .with_context(|| format!("cannot open store {}", args.store.display()))?;

    let report = if args.all {
        store.remove_all()?
    } else {
        let Some(days) = args.older_than_days.or(config.max_age_days) else {
            bail!("no retention configured; pass --older-than-days or --all");
        };
        let before = retention_cutoff(days, Utc::now())?;
        store.prune(before, &CancelFlag::new())?
    };
    store.checkpoint()?;
    debug!(removed = report.total(), "prune committed");

    if json {
        return print_json(&report);
    }
    println!("{} Pruned {} records", "✓".green().bold(), report.total().to_string().bold());
    println!("  Messages: {}", report.messages);
    println!("  Tasks:    {}", report.tasks);
    println!("  Sessions: {}", report.sessions);
    println!("  Blob references released: {}", report.blobs_released);
    Ok(())
}

fn cmd_config(args: ConfigArgs, json: bool) -> anyhow::Result<()> {
    let config = match &args.store {
        Some(dir) => StoreConfig::load_for_store(dir)?,
        None => StoreConfig::default(),
    };
    if json {
        return print_json(&config);
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
