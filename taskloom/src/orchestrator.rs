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

//! Orchestrator (C6): the public API, and the two work-queue handlers
//! (`process-step`, `cli-task`) that carry a process from `StartProcess`
//! through to a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use diesel_migrations::MigrationHarness;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ProcessCache;
use crate::config::OrchestratorConfig;
use crate::cron::{CronDispatcher, CronEvaluator, CronerEvaluator, StartProcessFn};
use crate::dal::DAL;
use crate::database::{Connection, Database, MIGRATIONS};
use crate::error::{OrchestratorError, SerializationError, StoreError, ValidationError};
use crate::models::{
    NewProcessRecord, NewTaskData, NewWorkItem, ProcessData, ProcessRecord, ProcessStatus, TaskData, TaskStatus,
};
use crate::queue::{Handler, HandlerOutcome, QueueConfig, WorkQueue};
use crate::registry::ProcessTypeRegistry;

const PROCESS_STEP: &str = "process-step";
const CLI_TASK: &str = "cli-task";

fn task_id(process_id: &str, index: i32) -> String {
    format!("{process_id}-task-{index}")
}

fn process_step_instance(process_id: &str) -> String {
    process_id.to_string()
}

/// Entry point for the orchestration engine. Cheap to clone: every clone
/// shares the same pool, cache, registry, and background tasks.
#[derive(Clone)]
pub struct Orchestrator(Arc<Inner>);

struct Inner {
    dal: DAL,
    registry: ProcessTypeRegistry,
    cache: ProcessCache,
    config: OrchestratorConfig,
    queue: WorkQueue,
    cron: CronDispatcher,
    node_id: String,
    running: Mutex<Option<RunningHandles>>,
}

struct RunningHandles {
    queue: tokio::task::JoinHandle<()>,
    cron: tokio::task::JoinHandle<()>,
}

fn upgrade(weak: &Weak<Inner>) -> Result<Orchestrator, OrchestratorError> {
    weak.upgrade().map(Orchestrator).ok_or(OrchestratorError::NotRunning)
}

impl Orchestrator {
    /// Builds a new orchestrator: opens the connection pool, runs embedded
    /// migrations if configured to, and wires the two work-queue handlers
    /// plus the cron dispatcher. Does not start polling — call
    /// [`Orchestrator::start`] for that.
    pub async fn new(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        config.validate().map_err(OrchestratorError::Config)?;

        let database = Database::new(&config.database_url, config.db_pool_size as usize)?;
        if config.run_migrations_on_start {
            run_migrations(&database).await?;
        }

        let dal = DAL::new(database);
        let node_id = Uuid::new_v4().to_string();

        let queue_config = QueueConfig {
            poll_interval: config.poll_interval,
            lease_duration: config.lease_duration,
            heartbeat_interval: config.heartbeat_interval,
            retry_backoff_base: config.retry_backoff_base,
            worker_pool_size: config.worker_pool_size,
        };
        let queue = WorkQueue::new(dal.clone(), node_id.clone(), queue_config);
        let evaluator: Arc<dyn CronEvaluator> = Arc::new(CronerEvaluator);
        let cron_poll_interval = config.cron_poll_interval;
        let cron_dal = dal.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let process_step: Arc<dyn Handler> = Arc::new(ProcessStepHandler { orchestrator: weak.clone() });
            let cli_task: Arc<dyn Handler> = Arc::new(CliTaskHandler { orchestrator: weak.clone() });
            queue.register(PROCESS_STEP, process_step);
            queue.register(CLI_TASK, cli_task);

            let start_process: StartProcessFn = {
                let weak = weak.clone();
                Arc::new(move |type_name, input_data, triggered_by| {
                    let weak = weak.clone();
                    Box::pin(async move {
                        let orchestrator = upgrade(&weak)?;
                        orchestrator
                            .start_process_with_id(&type_name, input_data, Uuid::new_v4().to_string(), triggered_by)
                            .await
                    })
                })
            };

            let cron = CronDispatcher::new(cron_dal, evaluator, start_process, cron_poll_interval);

            Inner {
                dal,
                registry: ProcessTypeRegistry::new(),
                cache: ProcessCache::new(),
                config,
                queue,
                cron,
                node_id,
                running: Mutex::new(None),
            }
        });

        Ok(Orchestrator(inner))
    }

    pub fn registry(&self) -> &ProcessTypeRegistry {
        &self.0.registry
    }

    pub fn node_id(&self) -> &str {
        &self.0.node_id
    }

    pub fn dal(&self) -> &DAL {
        &self.0.dal
    }

    /// Starts the work-queue poller and cron dispatcher as background Tokio
    /// tasks. Idempotent: calling it while already running is a no-op.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let mut guard = self.0.running.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!(node_id = %self.0.node_id, "starting orchestrator");
        reconcile_dangling_processes(&self.0.dal, &self.0.queue).await?;

        let queue_handle = tokio::spawn(self.0.queue.clone().run());
        let cron_handle = tokio::spawn(self.0.cron.clone().run());
        *guard = Some(RunningHandles {
            queue: queue_handle,
            cron: cron_handle,
        });

        Ok(())
    }

    /// Signals both background loops to stop and waits up to a grace period
    /// for in-flight handlers to finish. In-flight `cli-task` handlers are
    /// not killed; they keep running and their lease is reclaimed by a peer
    /// if they outlive the grace period.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let mut guard = self.0.running.lock().await;
        let Some(handles) = guard.take() else {
            return Ok(());
        };

        info!(node_id = %self.0.node_id, "stopping orchestrator");
        self.0.queue.stop();
        self.0.cron.stop();

        let grace = Duration::from_secs(30);
        let _ = tokio::time::timeout(grace, handles.queue).await;
        let _ = tokio::time::timeout(grace, handles.cron).await;
        Ok(())
    }

    /// Starts a new run of `type_name` with a generated id.
    pub async fn start_process(&self, type_name: &str, input_data: HashMap<String, String>) -> Result<String, OrchestratorError> {
        self.start_process_with_id(type_name, input_data, Uuid::new_v4().to_string(), None).await
    }

    /// Starts a new run of `type_name` under a caller-supplied id.
    pub async fn start_process_with_id(
        &self,
        type_name: &str,
        input_data: HashMap<String, String>,
        process_record_id: String,
        triggered_by: Option<String>,
    ) -> Result<String, OrchestratorError> {
        let process_type = self.0.registry.get(type_name)?;
        if process_type.tasks.is_empty() {
            return Err(ValidationError::EmptyProcessType(type_name.to_string()).into());
        }

        let now = Utc::now().naive_utc();
        let input_json = serde_json::to_string(&input_data).map_err(|e| SerializationError::Encode(e.to_string()))?;

        let record = self
            .0
            .dal
            .process_record()
            .create(NewProcessRecord {
                id: process_record_id,
                type_name: type_name.to_string(),
                input_data: input_json,
                schedule: None,
                current_status: ProcessStatus::Pending.as_str().to_string(),
                current_task_index: 0,
                total_tasks: process_type.tasks.len() as i32,
                triggered_by,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let mut tasks = Vec::with_capacity(process_type.tasks.len());
        for (index, def) in process_type.tasks.iter().enumerate() {
            let row = self
                .0
                .dal
                .task_data()
                .upsert(NewTaskData {
                    task_id: task_id(&record.id, index as i32),
                    process_record_id: record.id.clone(),
                    task_index: index as i32,
                    task_name: def.name.clone(),
                    command: def.command.clone(),
                    working_directory: def.working_directory.clone(),
                    timeout_minutes: (def.timeout.as_secs() / 60).max(1) as i32,
                    max_retries: def.max_retries,
                    retry_count: 0,
                    status: TaskStatus::Pending.as_str().to_string(),
                    started_at: None,
                    completed_at: None,
                    exit_code: None,
                    output: None,
                    error_message: None,
                })
                .await?;
            tasks.push(row);
        }

        let data = ProcessData {
            process_id: record.id.clone(),
            process_record_id: Some(record.id.clone()),
            type_name: type_name.to_string(),
            input_data,
            total_tasks: tasks.len() as i32,
            current_task_index: 0,
            status: ProcessStatus::Pending,
            process_context: HashMap::new(),
            tasks,
            created_at: now,
            updated_at: now,
        };
        self.0.cache.insert(data.clone());

        let payload = data.to_json()?;
        self.0
            .queue
            .schedule(PROCESS_STEP, &process_step_instance(&data.process_id), &payload, now)
            .await?;

        Ok(data.process_id)
    }

    /// Marks a record `STOPPED` and evicts its cache entry. An in-flight
    /// `cli-task` is not interrupted; its completion will find the record
    /// stopped and skip the advance step.
    pub async fn stop_process(&self, record_id: &str) -> Result<(), OrchestratorError> {
        let now = Utc::now().naive_utc();
        self.0.dal.process_record().update_status(record_id, ProcessStatus::Stopped, now, None).await?;
        self.0.cache.evict(record_id);
        Ok(())
    }

    pub async fn get_process_tasks(&self, record_id: &str) -> Result<Vec<TaskData>, OrchestratorError> {
        Ok(self.0.dal.task_data().list_by_process_record(record_id).await?)
    }

    pub async fn get_process_record(&self, record_id: &str) -> Result<ProcessRecord, OrchestratorError> {
        Ok(self.0.dal.process_record().get_by_id(record_id).await?)
    }

    /// Re-runs a terminal process record from its first task: resets every
    /// task row to `PENDING`, clears terminal timestamps, and enqueues a
    /// fresh `process-step`.
    pub async fn restart_process(&self, record_id: &str) -> Result<(), OrchestratorError> {
        let now = Utc::now().naive_utc();
        self.0.dal.process_record().restart(record_id, now).await?;
        let record = self.0.dal.process_record().get_by_id(record_id).await?;
        let existing = self.0.dal.task_data().list_by_process_record(record_id).await?;

        let mut tasks = Vec::with_capacity(existing.len());
        for task in existing {
            let mut reset: NewTaskData = task.into();
            reset.status = TaskStatus::Pending.as_str().to_string();
            reset.retry_count = 0;
            reset.started_at = None;
            reset.completed_at = None;
            reset.exit_code = None;
            reset.output = None;
            reset.error_message = None;
            tasks.push(self.0.dal.task_data().upsert(reset).await?);
        }

        let input_data: HashMap<String, String> = serde_json::from_str(&record.input_data).unwrap_or_default();
        let data = ProcessData {
            process_id: record.id.clone(),
            process_record_id: Some(record.id.clone()),
            type_name: record.type_name.clone(),
            input_data,
            total_tasks: record.total_tasks,
            current_task_index: 0,
            status: ProcessStatus::Pending,
            process_context: HashMap::new(),
            tasks,
            created_at: record.created_at,
            updated_at: now,
        };
        self.0.cache.insert(data.clone());

        let payload = data.to_json()?;
        self.0
            .queue
            .schedule(PROCESS_STEP, &process_step_instance(&record.id), &payload, now)
            .await?;
        Ok(())
    }

    async fn process_data_for(&self, process_id: &str, record: &ProcessRecord) -> Result<ProcessData, OrchestratorError> {
        if let Some(data) = self.0.cache.get(process_id) {
            return Ok(data);
        }

        debug!(process_id, "process data cache miss, reconstructing from durable rows");
        let tasks = self.0.dal.task_data().list_by_process_record(&record.id).await?;
        let input_data: HashMap<String, String> = serde_json::from_str(&record.input_data).unwrap_or_default();
        let data = ProcessData {
            process_id: process_id.to_string(),
            process_record_id: Some(record.id.clone()),
            type_name: record.type_name.clone(),
            input_data,
            total_tasks: record.total_tasks,
            current_task_index: record.current_task_index,
            status: record.status(),
            process_context: rebuild_context(&tasks),
            tasks,
            created_at: record.created_at,
            updated_at: record.updated_at,
        };
        self.0.cache.insert(data.clone());
        Ok(data)
    }

    async fn handle_process_step(&self, payload: &str, _queue: &WorkQueue) -> Result<HandlerOutcome, OrchestratorError> {
        let mut data = ProcessData::from_json(payload)?;
        let record_id = data.process_record_id.clone().unwrap_or_else(|| data.process_id.clone());
        let now = Utc::now().naive_utc();

        if data.current_task_index == 0 {
            self.0.dal.process_record().update_status(&record_id, ProcessStatus::InProgress, now, None).await?;
            data.status = ProcessStatus::InProgress;
        }

        if data.is_complete() {
            return Ok(HandlerOutcome::Done);
        }

        let current_task = data
            .tasks
            .get(data.current_task_index as usize)
            .cloned()
            .ok_or_else(|| ValidationError::RecordNotFound(data.process_id.clone()))?;

        let mut running: NewTaskData = current_task.into();
        running.status = TaskStatus::Running.as_str().to_string();
        running.started_at = Some(now);

        // The row a successful upsert would return is fully determined by
        // `running` (no server-generated columns), so it's built once here
        // and reused both for the cli-task payload and the in-memory cache —
        // no second round trip needed to learn what was just written.
        let running_row: TaskData = running.clone().into();
        let cli_payload = serde_json::to_string(&running_row).map_err(|e| SerializationError::Encode(e.to_string()))?;
        let new_work_item = NewWorkItem {
            task_name: CLI_TASK.to_string(),
            task_instance: running_row.task_id.clone(),
            task_data: cli_payload,
            execution_time: now,
            picked: false,
            consecutive_failures: 0,
            version: 1,
        };

        // The task write and the cli-task enqueue commit in one transaction
        // (§5's preferred option (a)): a crash between them is impossible,
        // closing the gap the reconciliation sweep otherwise has to patch up.
        self.0
            .dal
            .transaction(move |conn| {
                crate::dal::task_data::upsert_conn(conn, &running)?;
                crate::dal::work_item::schedule_conn(conn, &new_work_item)?;
                Ok(())
            })
            .await?;

        if let Some(slot) = data.tasks.get_mut(data.current_task_index as usize) {
            *slot = running_row;
        }
        self.0.cache.insert(data);
        Ok(HandlerOutcome::Done)
    }

    async fn handle_cli_task(&self, payload: &str, _queue: &WorkQueue) -> Result<HandlerOutcome, OrchestratorError> {
        let task: TaskData = serde_json::from_str(payload).map_err(SerializationError::from)?;

        if task.status() == TaskStatus::Completed {
            debug!(task_id = %task.task_id, "cli-task re-delivered for a completed task; skipping");
            return Ok(HandlerOutcome::Done);
        }

        let record = self.0.dal.process_record().get_by_id(&task.process_record_id).await?;
        if record.status() == ProcessStatus::Stopped {
            debug!(process_record_id = %record.id, "process stopped; skipping cli-task advance");
            return Ok(HandlerOutcome::Done);
        }

        let mut data = self.process_data_for(&task.process_record_id, &record).await?;
        let command = crate::template::expand(&task.command, &data.input_data, &data.process_context);
        let timeout = Duration::from_secs((task.timeout_minutes.max(0) as u64) * 60);
        let outcome = crate::executor::execute(&command, &task.working_directory, timeout, self.0.config.max_output_bytes).await;

        let now = Utc::now().naive_utc();

        let succeeded = matches!(&outcome, Ok(exec) if exec.success);
        if succeeded {
            let exec = outcome.expect("checked Ok above");
            let mut completed: NewTaskData = task.clone().into();
            completed.status = TaskStatus::Completed.as_str().to_string();
            completed.completed_at = Some(now);
            completed.exit_code = exec.exit_code;
            completed.output = Some(exec.output.clone());
            completed.error_message = None;
            let completed_row: TaskData = completed.clone().into();

            data.record_task_output(&task.task_name, exec.exit_code.unwrap_or(0), &exec.output);
            if let Some(slot) = data.tasks.get_mut(task.task_index as usize) {
                *slot = completed_row;
            }
            data.current_task_index = task.task_index + 1;

            // Both branches below commit the task-completion write together
            // with whatever it implies — marking the record terminal, or
            // advancing the index and enqueuing the next step — in one
            // transaction, per §5's resolution of the "record write + next
            // item enqueue" crash window. The reconciliation sweep in
            // `Orchestrator::start` remains as defense-in-depth for any
            // record left dangling by an older code path or a mid-flight
            // deploy, not as the primary mechanism.
            if data.is_complete() {
                let record_id = record.id.clone();
                self.0
                    .dal
                    .transaction(move |conn| {
                        crate::dal::task_data::upsert_conn(conn, &completed)?;
                        crate::dal::process_record::set_status_conn(conn, &record_id, ProcessStatus::Completed, now, None)?;
                        Ok(())
                    })
                    .await?;
                self.0.cache.evict(&record.id);
            } else {
                data.status = ProcessStatus::InProgress;
                let new_index = data.current_task_index;
                let step_payload = data.to_json()?;
                let record_id = record.id.clone();
                let new_work_item = NewWorkItem {
                    task_name: PROCESS_STEP.to_string(),
                    task_instance: process_step_instance(&record.id),
                    task_data: step_payload,
                    execution_time: now,
                    picked: false,
                    consecutive_failures: 0,
                    version: 1,
                };
                self.0
                    .dal
                    .transaction(move |conn| {
                        crate::dal::task_data::upsert_conn(conn, &completed)?;
                        crate::dal::process_record::advance_task_index_conn(conn, &record_id, new_index, now)?;
                        crate::dal::work_item::schedule_conn(conn, &new_work_item)?;
                        Ok(())
                    })
                    .await?;
                self.0.cache.insert(data);
            }
            return Ok(HandlerOutcome::Done);
        }

        let (error_message, output, exit_code) = match outcome {
            Ok(exec) => (exec.error_message, Some(exec.output), exec.exit_code),
            Err(e) => (Some(e.to_string()), None, None),
        };

        let mut failed: NewTaskData = task.clone().into();
        failed.error_message = error_message;
        failed.exit_code = exit_code;
        if let Some(output) = output {
            failed.output = Some(output);
        }

        if task.retry_count < task.max_retries {
            failed.status = TaskStatus::Pending.as_str().to_string();
            failed.retry_count = task.retry_count + 1;
            let failed_row: TaskData = failed.clone().into();
            let retry_payload = serde_json::to_string(&failed_row).map_err(|e| SerializationError::Encode(e.to_string()))?;
            let next = now + ChronoDuration::from_std(self.0.config.retry_backoff_base).unwrap_or(ChronoDuration::seconds(30));
            let new_work_item = NewWorkItem {
                task_name: CLI_TASK.to_string(),
                task_instance: failed_row.task_id.clone(),
                task_data: retry_payload,
                execution_time: next,
                picked: false,
                consecutive_failures: 0,
                version: 1,
            };
            self.0
                .dal
                .transaction(move |conn| {
                    crate::dal::task_data::upsert_conn(conn, &failed)?;
                    crate::dal::work_item::schedule_conn(conn, &new_work_item)?;
                    Ok(())
                })
                .await?;

            // `schedule_conn` above already rewrote this same
            // `(cli-task, task_id)` row with the retry's due time; telling
            // the worker `Rescheduled` instead of `Done` keeps it from
            // deleting that row out from under the retry it just wrote.
            return Ok(HandlerOutcome::Rescheduled);
        } else {
            failed.status = TaskStatus::Failed.as_str().to_string();
            failed.completed_at = Some(now);
            let failed_row: TaskData = failed.clone().into();
            let message = format!("{}: {}", failed_row.task_name, failed_row.error_message.clone().unwrap_or_default());
            let record_id = record.id.clone();
            self.0
                .dal
                .transaction(move |conn| {
                    crate::dal::task_data::upsert_conn(conn, &failed)?;
                    crate::dal::process_record::set_status_conn(conn, &record_id, ProcessStatus::Failed, now, Some(message))?;
                    Ok(())
                })
                .await?;
            self.0.cache.evict(&record.id);
        }

        Ok(HandlerOutcome::Done)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("node_id", &self.0.node_id).finish()
    }
}

fn rebuild_context(tasks: &[TaskData]) -> HashMap<String, String> {
    let mut ctx = HashMap::new();
    for t in tasks {
        if t.status() != TaskStatus::Completed {
            continue;
        }
        if let Some(code) = t.exit_code {
            ctx.insert(format!("{}_exit_code", t.task_name), code.to_string());
        }
        if let Some(output) = &t.output {
            ctx.insert(format!("{}_output", t.task_name), output.clone());
        }
        ctx.insert("last_completed_task".to_string(), t.task_name.clone());
    }
    ctx
}

async fn run_migrations(database: &Database) -> Result<(), OrchestratorError> {
    database
        .interact(|conn: &mut Connection| {
            conn.run_pending_migrations(MIGRATIONS)
                .map(|_| ())
                .map_err(diesel::result::Error::QueryBuilderError)
        })
        .await?;
    Ok(())
}

/// Defense-in-depth recovery sweep (§5's option (b)): re-enqueues a
/// `process-step` for any `IN_PROGRESS` record whose latest task completed
/// but has no corresponding work item, closing the crash window between the
/// task-completion write and the next-step enqueue on deployments where that
/// pair somehow landed outside one transaction.
async fn reconcile_dangling_processes(dal: &DAL, queue: &WorkQueue) -> Result<(), OrchestratorError> {
    let in_progress = dal.process_record().find_by_status(ProcessStatus::InProgress).await?;

    for record in in_progress {
        if record.current_task_index == 0 || record.current_task_index >= record.total_tasks {
            continue;
        }

        let tasks = dal.task_data().list_by_process_record(&record.id).await?;
        let Some(last_completed) = tasks.get((record.current_task_index - 1) as usize) else {
            continue;
        };
        if last_completed.status() != TaskStatus::Completed {
            continue;
        }

        let instance = process_step_instance(&record.id);
        if dal.work_item().get(PROCESS_STEP, &instance).await.is_ok() {
            continue;
        }

        warn!(process_record_id = %record.id, "reconciling dangling process: re-enqueuing process-step");
        let input_data: HashMap<String, String> = serde_json::from_str(&record.input_data).unwrap_or_default();
        let data = ProcessData {
            process_id: record.id.clone(),
            process_record_id: Some(record.id.clone()),
            type_name: record.type_name.clone(),
            input_data,
            total_tasks: record.total_tasks,
            current_task_index: record.current_task_index,
            status: record.status(),
            process_context: rebuild_context(&tasks),
            tasks,
            created_at: record.created_at,
            updated_at: record.updated_at,
        };
        let payload = data.to_json()?;
        queue.schedule(PROCESS_STEP, &instance, &payload, Utc::now().naive_utc()).await?;
    }

    Ok(())
}

struct ProcessStepHandler {
    orchestrator: Weak<Inner>,
}

#[async_trait]
impl Handler for ProcessStepHandler {
    async fn handle(&self, _task_instance: &str, payload: &str, queue: &WorkQueue) -> Result<HandlerOutcome, OrchestratorError> {
        upgrade(&self.orchestrator)?.handle_process_step(payload, queue).await
    }
}

struct CliTaskHandler {
    orchestrator: Weak<Inner>,
}

#[async_trait]
impl Handler for CliTaskHandler {
    async fn handle(&self, _task_instance: &str, payload: &str, queue: &WorkQueue) -> Result<HandlerOutcome, OrchestratorError> {
        upgrade(&self.orchestrator)?.handle_cli_task(payload, queue).await
    }
}
