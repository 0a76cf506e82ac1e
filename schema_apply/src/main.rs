//! schema_apply CLI
//!
//! Usage:
//!   schema_apply apply [FILES...]   - Apply migrations in order
//!   schema_apply apply --dry-run    - List the statements that would run
//!   schema_apply apply --verify     - Apply, then check the schema
//!   schema_apply verify             - Check expected tables and column types
//!   schema_apply status             - Show applied/pending migrations

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;

mod cli;

use cli::{ApplyArgs, Cli, Commands, StatusArgs, VerifyArgs};
use schema_apply::migrations::{file, plan, FsStore};
use schema_apply::config::Driver;
use schema_apply::{config, utils, Config, SchemaApplyClient, VerificationReport};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded
async fn run(cli: Cli) -> Result<bool> {
    let config = config::load(cli.global.config.as_deref()).context("loading configuration")?;
    utils::init_logging(&config.logging, cli.global.verbose)?;

    match cli.command {
        Commands::Apply(args) => apply(config, args).await,
        Commands::Verify(args) => verify(config, args).await,
        Commands::Status(args) => status(config, args).await,
    }
}

async fn apply(config: Config, args: ApplyArgs) -> Result<bool> {
    let files = file::resolve(&config.migrations, &args.files)?;

    if args.dry_run || config.migrations.dry_run {
        let backslash_escapes = config
            .database
            .driver()
            .map_or(false, |driver| driver == Driver::MySql);
        let planned = plan(&files, &FsStore, backslash_escapes);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&planned)?);
        } else {
            for entry in &planned {
                match &entry.error {
                    Some(error) => println!("{}: skipped ({})", entry.name, error),
                    None => println!("{}: {} statement(s)", entry.name, entry.statements.len()),
                }
            }
        }
        return Ok(true);
    }

    let verify_after = args.verify && config.verify.is_some();
    if args.verify && !verify_after {
        tracing::warn!("--verify given but no [verify] section is configured; skipping");
    }

    let client = SchemaApplyClient::new(config).await?;
    let summary = match client.apply_migrations(&files).await {
        Ok(summary) => summary,
        Err(e) => {
            client.close().await;
            return Err(e.into());
        }
    };
    let report = if verify_after {
        Some(client.verify_schema().await)
    } else {
        None
    };
    client.close().await;
    let report = report.transpose()?;

    if args.json {
        let output = match &report {
            Some(report) => serde_json::json!({ "migrations": summary, "verification": report }),
            None => serde_json::to_value(&summary)?,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", summary);
        if let Some(report) = &report {
            print_report(report);
        }
    }

    let verified = report.as_ref().map_or(true, VerificationReport::is_success);
    Ok(summary.is_success() && verified)
}

async fn verify(config: Config, args: VerifyArgs) -> Result<bool> {
    let client = SchemaApplyClient::new(config).await?;
    let report = client.verify_schema().await;
    client.close().await;
    let report = report?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(report.is_success())
}

fn print_report(report: &VerificationReport) {
    for table in report.tables.values() {
        if table.exists {
            println!("{}: exists with {} columns", table.name, table.columns.len());
        } else {
            println!("{}: missing", table.name);
        }
        for violation in &table.violations {
            println!(
                "  {}: {} (allowed: {})",
                violation.column,
                violation.data_type,
                violation.allowed_types.join(", ")
            );
        }
    }
}

async fn status(config: Config, args: StatusArgs) -> Result<bool> {
    let files = file::resolve(&config.migrations, &args.files)?;
    let client = SchemaApplyClient::new(config).await?;
    let statuses = client.migration_status(&files).await;
    client.close().await;

    for status in statuses? {
        let state = match &status.applied_at {
            Some(at) if status.checksum_changed => format!("applied {} (changed since)", at),
            Some(at) => format!("applied {}", at),
            None => "pending".to_string(),
        };
        println!("{:<60} {}", status.name, state);
    }

    Ok(true)
}
