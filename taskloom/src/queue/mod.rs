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

//! Durable Work Queue (C4): handler registration, scheduling, and the
//! poller/worker pool that drains `scheduled_tasks`.
//!
//! This is deliberately a flat queue, not a DAG executor — handlers chain by
//! scheduling the next work item themselves (see `crate::orchestrator`),
//! which keeps this module's job to exactly three things: claim due items
//! without double-picking them, run a handler with a live lease, and
//! reschedule on failure.

mod worker;

pub use worker::{backoff, Handler, HandlerOutcome};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, warn};

use crate::dal::DAL;
use crate::error::StoreError;
use crate::models::NewWorkItem;

/// Configuration the queue needs from [`crate::config::OrchestratorConfig`],
/// copied in rather than borrowed so the queue can be cloned freely across
/// the worker tasks it spawns.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub retry_backoff_base: Duration,
    pub worker_pool_size: usize,
}

/// A handle to the durable work queue, cheap to clone: every clone shares
/// the same handler table, semaphore, and shutdown signal.
#[derive(Clone)]
pub struct WorkQueue {
    dal: DAL,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
    node_id: Arc<String>,
    config: QueueConfig,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl WorkQueue {
    pub fn new(dal: DAL, node_id: String, config: QueueConfig) -> Self {
        let worker_pool_size = config.worker_pool_size.max(1);
        Self {
            dal,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            node_id: Arc::new(node_id),
            config,
            semaphore: Arc::new(Semaphore::new(worker_pool_size)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Registers the handler invoked for work items scheduled under
    /// `task_name`. Replaces any existing registration.
    pub fn register(&self, task_name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .expect("work queue handler table lock poisoned")
            .insert(task_name.into(), handler);
    }

    /// Enqueues (or re-enqueues) a work item due at `execution_time`.
    pub async fn schedule(
        &self,
        task_name: &str,
        task_instance: &str,
        payload: &str,
        execution_time: chrono::NaiveDateTime,
    ) -> Result<(), StoreError> {
        self.dal
            .work_item()
            .schedule(NewWorkItem {
                task_name: task_name.to_string(),
                task_instance: task_instance.to_string(),
                task_data: payload.to_string(),
                execution_time,
                picked: false,
                consecutive_failures: 0,
                version: 1,
            })
            .await?;
        Ok(())
    }

    /// Runs the poller loop until [`WorkQueue::stop`] is called. Intended to
    /// be spawned as its own Tokio task.
    pub async fn run(self) {
        let batch = (self.config.worker_pool_size * 2) as i64;
        let lease = ChronoDuration::from_std(self.config.lease_duration).unwrap_or(ChronoDuration::minutes(5));

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!("work queue poller stopping");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.poll_once(lease, batch).await;
                }
            }
        }
    }

    async fn poll_once(&self, lease: ChronoDuration, batch: i64) {
        let now = Utc::now().naive_utc();
        let claimed = match self.dal.work_item().claim_due(&self.node_id, lease, batch, now).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "failed to poll work queue");
                return;
            }
        };

        for item in claimed {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let queue = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                worker::execute_claimed(&queue, item).await;
            });
        }
    }

    /// Signals the poller to stop accepting new work. In-flight handlers are
    /// not interrupted; their leases expire naturally if they outlive the
    /// grace period the caller waits for.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    pub(crate) fn dal(&self) -> &DAL {
        &self.dal
    }

    pub(crate) fn handler_for(&self, task_name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .expect("work queue handler table lock poisoned")
            .get(task_name)
            .cloned()
    }

    pub(crate) fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    pub(crate) fn retry_backoff_base(&self) -> Duration {
        self.config.retry_backoff_base
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").field("node_id", &self.node_id).finish()
    }
}

pub(crate) fn log_unknown_handler(task_name: &str) {
    error!(task_name, "no handler registered for work item; it will be retried with backoff until one is");
}
