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

//! A persistent, cluster-safe orchestrator for command-line task processes.
//!
//! `taskloom` runs user-defined **process types** — ordered sequences of
//! shell-command **tasks** — to completion, durably. A process type is
//! registered once at startup:
//!
//! ```no_run
//! use std::time::Duration;
//! use taskloom::{ProcessType, TaskDefinition, Orchestrator, OrchestratorConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default()).await?;
//! orchestrator.registry().register(
//!     ProcessType::new("demo")
//!         .description("three-step smoke test")
//!         .task(TaskDefinition::new("A", "echo one").timeout(Duration::from_secs(60)))
//!         .task(TaskDefinition::new("B", "echo two"))
//!         .task(TaskDefinition::new("C", "echo three")),
//! );
//!
//! orchestrator.start().await?;
//! let process_id = orchestrator.start_process("demo", Default::default()).await?;
//! # let _ = process_id;
//! # Ok(())
//! # }
//! ```
//!
//! From there, [`Orchestrator::start_process`] materializes a durable run
//! and enqueues its first step; the work queue's poller and worker pool
//! carry it through to `COMPLETED`, `FAILED`, or `STOPPED` without further
//! calls, including across a crash and restart on a peer node sharing the
//! same database.
//!
//! # Module map
//!
//! | Module | Role |
//! |---|---|
//! | [`executor`] | Command Executor (C1): spawns one child process, enforces its timeout. |
//! | [`template`] | Template Expander (C2): `${key}` substitution in command strings. |
//! | [`registry`] | Process Type Registry (C3): in-memory process-type definitions. |
//! | [`queue`] | Durable Work Queue (C4): cluster-safe claim/heartbeat/reclaim protocol. |
//! | [`dal`] | State Store (C5): CRUD plus the few non-trivial transitions over the schema. |
//! | [`orchestrator`] | Orchestrator (C6): process lifecycle and the two work-queue handlers. |
//! | [`cron`] | Cron dispatcher: starts new runs off `cron_schedules`. |
//! | [`config`] | Layered runtime configuration (defaults < TOML < environment). |
//! | [`database`] | Connection pooling and the Diesel schema. |
//! | [`models`] | Persisted and transient row/struct types. |
//! | [`error`] | The crate's typed error hierarchy. |
//!
//! See `DESIGN.md` in the repository root for the rationale behind each
//! module's design and the Open Question resolutions made while building it.

pub mod cache;
pub mod config;
pub mod cron;
pub mod dal;
pub mod database;
pub mod error;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod template;

pub use config::OrchestratorConfig;
pub use cron::{CronEvaluator, CronerEvaluator};
pub use error::{ExecutionError, OrchestratorError, SerializationError, StoreError, ValidationError};
pub use executor::{execute, ExecutionResult};
pub use models::{CatchupPolicy, CronSchedule, NewCronSchedule, ProcessData, ProcessRecord, ProcessStatus, TaskData, TaskStatus};
pub use orchestrator::Orchestrator;
pub use registry::{ProcessType, ProcessTypeRegistry, TaskDefinition};
