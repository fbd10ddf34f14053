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

//! Per-item execution: heartbeat ticker, handler invocation, and the
//! success/failure outcome of a single claimed work item.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{error, warn};

use crate::error::OrchestratorError;
use crate::models::WorkItem;

use super::{log_unknown_handler, WorkQueue};

/// What a successful [`Handler::handle`] did with the work item it was
/// handed, so [`execute_claimed`] knows whether it still owns the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler is finished with this work item; delete the row.
    Done,
    /// The handler already wrote a replacement row under the same
    /// `(task_name, task_instance)` key (e.g. a `cli-task` retry reschedule)
    /// — deleting now would wipe out that write instead of the stale one
    /// the claim was originally for.
    Rescheduled,
}

/// Implemented by the two handlers the orchestrator registers
/// (`process-step`, `cli-task`); a handler never bubbles an error it can
/// recover from itself — only store/serialization failures propagate here,
/// where they become a backed-off retry of the whole work item.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, task_instance: &str, payload: &str, queue: &WorkQueue) -> Result<HandlerOutcome, OrchestratorError>;
}

/// Base-delay exponential backoff, capped at 30 minutes so a consistently
/// failing item doesn't drift out to days between attempts.
pub fn backoff(consecutive_failures: i32, base: Duration) -> Duration {
    let exponent = consecutive_failures.clamp(1, 10) as u32 - 1;
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(Duration::from_secs(30 * 60))
}

pub(super) async fn execute_claimed(queue: &WorkQueue, item: WorkItem) {
    let Some(handler) = queue.handler_for(&item.task_name) else {
        log_unknown_handler(&item.task_name);
        reschedule_after_failure(queue, &item).await;
        return;
    };

    let heartbeat = spawn_heartbeat(queue, &item);
    let result = handler.handle(&item.task_instance, &item.task_data, queue).await;
    heartbeat.abort();

    match result {
        Ok(HandlerOutcome::Done) => {
            if let Err(e) = queue.dal().work_item().delete(&item.task_name, &item.task_instance).await {
                warn!(
                    task_name = %item.task_name,
                    task_instance = %item.task_instance,
                    error = %e,
                    "failed to delete completed work item; it may have already been reclaimed"
                );
            }
        }
        Ok(HandlerOutcome::Rescheduled) => {
            // The handler already wrote this item's replacement (e.g. a
            // retry reschedule) under the same key; deleting here would
            // destroy that write rather than the claim it was made under.
        }
        Err(OrchestratorError::Serialization(e)) => {
            error!(
                task_name = %item.task_name,
                task_instance = %item.task_instance,
                error = %e,
                "work item payload could not be deserialized; quarantining rather than retrying"
            );
            quarantine(queue, &item).await;
        }
        Err(e) => {
            error!(
                task_name = %item.task_name,
                task_instance = %item.task_instance,
                error = %e,
                "work item handler failed"
            );
            reschedule_after_failure(queue, &item).await;
        }
    }
}

/// A bad payload cannot become a good one by waiting, so a
/// `SerializationError` skips the usual backoff and is dead-lettered instead
/// (see [`crate::dal::work_item::QUARANTINE_SENTINEL`]).
async fn quarantine(queue: &WorkQueue, item: &WorkItem) {
    let now = Utc::now().naive_utc();
    if let Err(e) = queue.dal().work_item().quarantine(&item.task_name, &item.task_instance, now).await {
        warn!(
            task_name = %item.task_name,
            task_instance = %item.task_instance,
            error = %e,
            "failed to quarantine undeserializable work item"
        );
    }
}

async fn reschedule_after_failure(queue: &WorkQueue, item: &WorkItem) {
    let consecutive_failures = item.consecutive_failures + 1;
    let delay = backoff(consecutive_failures, queue.retry_backoff_base());
    let now = Utc::now().naive_utc();
    let next = now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(30));

    if let Err(e) = queue
        .dal()
        .work_item()
        .fail_and_reschedule(&item.task_name, &item.task_instance, next, consecutive_failures, now)
        .await
    {
        warn!(
            task_name = %item.task_name,
            task_instance = %item.task_instance,
            error = %e,
            "failed to reschedule failed work item"
        );
    }
}

/// Spawns the ticker that extends this item's lease while its handler runs.
/// Aborted as soon as the handler returns; it never outlives the item it
/// watches.
fn spawn_heartbeat(queue: &WorkQueue, item: &WorkItem) -> tokio::task::JoinHandle<()> {
    let dal = queue.dal().clone();
    let task_name = item.task_name.clone();
    let task_instance = item.task_instance.clone();
    let interval = queue.heartbeat_interval();

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let now = Utc::now().naive_utc();
            if let Err(e) = dal.work_item().heartbeat(&task_name, &task_instance, now).await {
                warn!(task_name = %task_name, task_instance = %task_instance, error = %e, "lease heartbeat failed");
            }
        }
    })
}
