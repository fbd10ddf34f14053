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

//! Cron Dispatcher (supplemented): polls `cron_schedules` and starts new
//! process runs on schedule.
//!
//! The cron-expression evaluator itself is injected behind [`CronEvaluator`]
//! so the orchestrator's polling/catch-up logic stays independent of any one
//! crate's parsing quirks; [`CronerEvaluator`] is the real implementation
//! shipped so the crate is runnable standalone.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use croner::Cron;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::dal::DAL;
use crate::error::{OrchestratorError, ValidationError};
use crate::models::CatchupPolicy;

/// Computes the next fire time strictly after `after`, both in UTC.
/// `tz` scopes the evaluation (a schedule fires on its own clock, e.g.
/// business hours in `America/New_York`), but the stored and returned
/// instants are always UTC so `cron_schedules.next_run_at` sorts correctly
/// regardless of the schedule's timezone.
pub trait CronEvaluator: Send + Sync {
    fn next_after(&self, expr: &str, tz: &str, after: NaiveDateTime) -> Result<NaiveDateTime, ValidationError>;
}

/// Default evaluator backed by `croner` + `chrono-tz`.
pub struct CronerEvaluator;

impl CronEvaluator for CronerEvaluator {
    fn next_after(&self, expr: &str, tz: &str, after: NaiveDateTime) -> Result<NaiveDateTime, ValidationError> {
        let zone: Tz = tz.parse().map_err(|_| ValidationError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("unknown timezone: {tz}"),
        })?;

        let cron = Cron::new(expr).parse().map_err(|e| ValidationError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;

        let after_local = zone.from_utc_datetime(&after);
        let next_local = cron
            .find_next_occurrence(&after_local, false)
            .map_err(|e| ValidationError::InvalidCron {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;

        Ok(next_local.with_timezone(&Utc).naive_utc())
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback the dispatcher uses to start a new process run. Bound to
/// `Orchestrator::start_process` once the orchestrator exists; kept as a
/// plain closure type here so this module has no dependency on
/// `crate::orchestrator`.
pub type StartProcessFn = Arc<
    dyn Fn(String, HashMap<String, String>, Option<String>) -> BoxFuture<'static, Result<String, OrchestratorError>>
        + Send
        + Sync,
>;

pub struct CronDispatcher {
    dal: DAL,
    evaluator: Arc<dyn CronEvaluator>,
    start_process: StartProcessFn,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
}

impl CronDispatcher {
    pub fn new(dal: DAL, evaluator: Arc<dyn CronEvaluator>, start_process: StartProcessFn, poll_interval: Duration) -> Self {
        Self {
            dal,
            evaluator,
            start_process,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!("cron dispatcher stopping");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_once().await;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    async fn poll_once(&self) {
        let now = Utc::now().naive_utc();
        let due = match self.dal.cron_schedule().list_due(now).await {
            Ok(schedules) => schedules,
            Err(e) => {
                warn!(error = %e, "failed to poll cron schedules");
                return;
            }
        };

        for schedule in due {
            if let Err(e) = self.fire_one(&schedule, now).await {
                error!(schedule_id = %schedule.id, error = %e, "cron dispatch failed");
            }
        }
    }

    async fn fire_one(&self, schedule: &crate::models::CronSchedule, now: NaiveDateTime) -> Result<(), OrchestratorError> {
        let template = self.dal.process_record().get_by_id(&schedule.process_record_id).await?;

        // A schedule only ever shows up here once `next_run_at <= now`, so at
        // least one fire time has elapsed; `missed` counts how many. The
        // ordinary case — the dispatcher was polling all along and this is
        // simply the next on-time fire — is `missed == 1`, and both catch-up
        // policies fire it identically. They only diverge when the
        // dispatcher was down across more than one period: `RunOnce` still
        // runs a single catch-up execution for the whole backlog, `Skip`
        // runs none and just resumes from the next future slot.
        let mut next = schedule.next_run_at;
        let mut missed: u32 = 0;
        while next <= now {
            next = self.evaluator.next_after(&schedule.cron_expression, &schedule.timezone, next)?;
            missed += 1;
        }

        let should_fire = match schedule.catchup_policy() {
            CatchupPolicy::RunOnce => missed >= 1,
            CatchupPolicy::Skip => missed == 1,
        };

        if should_fire {
            let input_data: HashMap<String, String> =
                serde_json::from_str(&template.input_data).unwrap_or_default();
            info!(schedule_id = %schedule.id, "cron fire: starting process");
            (self.start_process)(template.type_name.clone(), input_data, Some(format!("cron:{}", schedule.id))).await?;
        } else {
            debug!(schedule_id = %schedule.id, missed, "cron fire: catch-up policy Skip, not replaying missed runs");
        }

        self.dal.cron_schedule().update_after_fire(&schedule.id, next, now).await?;
        Ok(())
    }
}

impl std::fmt::Debug for CronDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronDispatcher").finish()
    }
}
