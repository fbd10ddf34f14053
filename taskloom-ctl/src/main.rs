/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! `taskloom-ctl`: maintenance CLI for a taskloom database.
//!
//! Reaches directly into the queue and record tables rather than going
//! through the orchestrator's API — a deliberate exception noted in
//! `DESIGN.md`, since this is the one blessed entry point for bulk cleanup
//! of abandoned process records.

#[cfg(all(feature = "postgres", feature = "sqlite"))]
compile_error!("taskloom-ctl: enable exactly one of the `postgres` or `sqlite` features, not both");

#[cfg(not(any(feature = "postgres", feature = "sqlite")))]
compile_error!("taskloom-ctl: enable exactly one of the `postgres` or `sqlite` features");

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taskloom::dal::DAL;
use taskloom::database::Database;
use taskloom::{OrchestratorConfig, ProcessStatus};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskloom-ctl", about = "Maintenance utility for taskloom orchestrator state", version)]
struct Cli {
    /// Database URL. Overrides `TASKLOOM_DATABASE_URL` and any value in `--config`.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Optional TOML config file, same format `Orchestrator::new` reads.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deletes scheduled_tasks, tasks, and process_records rows whose id
    /// matches a SQL LIKE pattern (e.g. `demo-%` or a single exact id).
    Cleanup {
        /// SQL LIKE pattern matched against process_records.id /
        /// tasks.process_record_id / scheduled_tasks.task_instance.
        pattern: String,
    },
    /// Lists process records in a given status.
    Status {
        /// One of PENDING, IN_PROGRESS, COMPLETED, FAILED, STOPPED.
        status: String,
    },
    /// Lists enabled cron schedules.
    ListSchedules,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "taskloom-ctl failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let mut config = OrchestratorConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    // The CLI never needs to run migrations itself; it operates against an
    // already-initialized schema.
    config.run_migrations_on_start = false;

    let database = Database::new(&config.database_url, 1)?;
    let dal = DAL::new(database);

    match cli.command {
        Command::Cleanup { pattern } => cleanup(&dal, &pattern).await,
        Command::Status { status } => print_status(&dal, &status).await,
        Command::ListSchedules => list_schedules(&dal).await,
    }
}

async fn cleanup(dal: &DAL, pattern: &str) -> anyhow::Result<()> {
    let scheduled = dal.work_item().delete_matching(pattern).await?;
    let tasks = dal.task_data().delete_matching(pattern).await?;
    let records = dal.process_record().delete_matching(pattern).await?;

    info!(pattern, scheduled, tasks, records, "cleanup complete");
    println!("deleted {scheduled} scheduled_tasks row(s), {tasks} tasks row(s), {records} process_records row(s) matching {pattern:?}");
    Ok(())
}

async fn print_status(dal: &DAL, status: &str) -> anyhow::Result<()> {
    let status: ProcessStatus = status
        .to_ascii_uppercase()
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let records = dal.process_record().find_by_status(status).await?;
    if records.is_empty() {
        println!("no process records in status {status}");
        return Ok(());
    }

    for record in records {
        println!(
            "{}\t{}\t{}/{}\t{}",
            record.id,
            record.type_name,
            record.current_task_index,
            record.total_tasks,
            record.last_error_message.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn list_schedules(dal: &DAL) -> anyhow::Result<()> {
    let schedules = dal.cron_schedule().list_enabled().await?;
    if schedules.is_empty() {
        println!("no enabled cron schedules");
        return Ok(());
    }

    for schedule in schedules {
        println!(
            "{}\t{}\t{}\tnext_run_at={}",
            schedule.id, schedule.process_record_id, schedule.cron_expression, schedule.next_run_at,
        );
    }
    Ok(())
}
