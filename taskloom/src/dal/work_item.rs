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

//! DAL operations for `scheduled_tasks`, the durable work queue (C4).
//!
//! Claiming a work item is a compare-and-swap on `version`: a worker first
//! selects candidate rows, then issues an `UPDATE ... WHERE version = $seen`
//! for each one. Only the worker whose update actually affects a row won the
//! claim; everyone else's update affects zero rows and moves on.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use diesel::prelude::*;

use crate::database::schema::scheduled_tasks::dsl;
use crate::database::Connection;
use crate::error::StoreError;
use crate::models::work_item::{NewWorkItem, WorkItem};

use super::DAL;

/// Synchronous enqueue, usable directly inside a [`DAL::transaction`]
/// closure so a work item's insertion commits atomically with whatever task
/// or record write produced it.
pub(crate) fn schedule_conn(conn: &mut Connection, item: &NewWorkItem) -> Result<WorkItem, diesel::result::Error> {
    diesel::insert_into(dsl::scheduled_tasks)
        .values(item)
        .on_conflict((dsl::task_name, dsl::task_instance))
        .do_update()
        .set((
            dsl::task_data.eq(&item.task_data),
            dsl::execution_time.eq(item.execution_time),
            dsl::picked.eq(item.picked),
            dsl::consecutive_failures.eq(item.consecutive_failures),
            dsl::version.eq(item.version),
        ))
        .execute(conn)?;
    dsl::scheduled_tasks
        .filter(dsl::task_name.eq(&item.task_name))
        .filter(dsl::task_instance.eq(&item.task_instance))
        .first(conn)
}

/// `consecutive_failures` value marking a work item as dead-lettered rather
/// than merely behind on retries (§7: a `SerializationError` item is
/// quarantined, not retried — a bad payload cannot become a good one by
/// waiting).
pub const QUARANTINE_SENTINEL: i32 = i32::MAX;

pub struct WorkItemDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> WorkItemDAL<'a> {
    /// Enqueues a work item, replacing any existing row with the same
    /// `(task_name, task_instance)` key — re-scheduling an instance that was
    /// never picked up simply moves its execution time.
    pub async fn schedule(&self, item: NewWorkItem) -> Result<WorkItem, StoreError> {
        self.dal.database.interact(move |conn| schedule_conn(conn, &item)).await
    }

    pub async fn get(&self, task_name: &str, task_instance: &str) -> Result<WorkItem, StoreError> {
        let task_name = task_name.to_string();
        let task_instance = task_instance.to_string();
        let found = self
            .dal
            .database
            .interact(move |conn| {
                dsl::scheduled_tasks
                    .filter(dsl::task_name.eq(&task_name))
                    .filter(dsl::task_instance.eq(&task_instance))
                    .first(conn)
                    .optional()
            })
            .await?;

        found.ok_or_else(|| StoreError::NotFound("scheduled_task".to_string()))
    }

    /// Claims up to `batch` due or lease-expired items for `worker_id`.
    ///
    /// Selects candidates, then CASes each one individually on `version` so
    /// two workers racing for the same row never both succeed. Candidates
    /// another worker wins in the meantime are silently skipped rather than
    /// retried — they'll be picked up on the next poll.
    pub async fn claim_due(
        &self,
        worker_id: &str,
        lease: ChronoDuration,
        batch: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let worker_id = worker_id.to_string();
        let lease_cutoff = now - lease;

        self.dal
            .database
            .interact(move |conn| {
                let candidates: Vec<WorkItem> = dsl::scheduled_tasks
                    .filter(dsl::execution_time.le(now))
                    .filter(
                        dsl::picked
                            .eq(false)
                            .or(dsl::last_heartbeat.lt(lease_cutoff))
                            .or(dsl::last_heartbeat.is_null().and(dsl::picked.eq(true))),
                    )
                    .order(dsl::execution_time.asc())
                    .limit(batch)
                    .load(conn)?;

                let mut claimed = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let rows = diesel::update(
                        dsl::scheduled_tasks
                            .filter(dsl::task_name.eq(&candidate.task_name))
                            .filter(dsl::task_instance.eq(&candidate.task_instance))
                            .filter(dsl::version.eq(candidate.version)),
                    )
                    .set((
                        dsl::picked.eq(true),
                        dsl::picked_by.eq(Some(worker_id.clone())),
                        dsl::last_heartbeat.eq(Some(now)),
                        dsl::version.eq(candidate.version + 1),
                    ))
                    .execute(conn)?;

                    if rows == 1 {
                        let mut won = candidate;
                        won.picked = true;
                        won.picked_by = Some(worker_id.clone());
                        won.last_heartbeat = Some(now);
                        won.version += 1;
                        claimed.push(won);
                    }
                }

                Ok(claimed)
            })
            .await
    }

    /// Extends a held lease. Silently a no-op if the item was reclaimed out
    /// from under this worker (rows affected == 0) — the worker notices on
    /// its next completion attempt instead of here.
    pub async fn heartbeat(&self, task_name: &str, task_instance: &str, now: NaiveDateTime) -> Result<(), StoreError> {
        let task_name = task_name.to_string();
        let task_instance = task_instance.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::update(
                    dsl::scheduled_tasks
                        .filter(dsl::task_name.eq(&task_name))
                        .filter(dsl::task_instance.eq(&task_instance)),
                )
                .set(dsl::last_heartbeat.eq(Some(now)))
                .execute(conn)
                .map(|_| ())
            })
            .await
    }

    /// Removes a work item after its task completed successfully.
    pub async fn delete(&self, task_name: &str, task_instance: &str) -> Result<(), StoreError> {
        let task_name = task_name.to_string();
        let task_instance = task_instance.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::delete(
                    dsl::scheduled_tasks
                        .filter(dsl::task_name.eq(&task_name))
                        .filter(dsl::task_instance.eq(&task_instance)),
                )
                .execute(conn)
                .map(|_| ())
            })
            .await
    }

    /// Releases the claim and reschedules for retry at `next_execution_time`,
    /// recording the failure.
    pub async fn fail_and_reschedule(
        &self,
        task_name: &str,
        task_instance: &str,
        next_execution_time: NaiveDateTime,
        consecutive_failures: i32,
        now: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let task_name = task_name.to_string();
        let task_instance = task_instance.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::update(
                    dsl::scheduled_tasks
                        .filter(dsl::task_name.eq(&task_name))
                        .filter(dsl::task_instance.eq(&task_instance)),
                )
                .set((
                    dsl::picked.eq(false),
                    dsl::picked_by.eq(Option::<String>::None),
                    dsl::execution_time.eq(next_execution_time),
                    dsl::last_failure.eq(Some(now)),
                    dsl::consecutive_failures.eq(consecutive_failures),
                ))
                .execute(conn)
                .map(|_| ())
            })
            .await
    }

    /// Dead-letters a work item whose payload could not be deserialized: it
    /// is released (`picked = false`) but pushed a century out so the
    /// poller's due-time filter never selects it again, and its
    /// `consecutive_failures` is set to [`QUARANTINE_SENTINEL`] so an
    /// operator inspecting the table can tell a quarantined item apart from
    /// one that is merely backed off.
    pub async fn quarantine(&self, task_name: &str, task_instance: &str, now: NaiveDateTime) -> Result<(), StoreError> {
        let task_name = task_name.to_string();
        let task_instance = task_instance.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::update(
                    dsl::scheduled_tasks
                        .filter(dsl::task_name.eq(&task_name))
                        .filter(dsl::task_instance.eq(&task_instance)),
                )
                .set((
                    dsl::picked.eq(false),
                    dsl::picked_by.eq(Option::<String>::None),
                    dsl::last_failure.eq(Some(now)),
                    dsl::consecutive_failures.eq(QUARANTINE_SENTINEL),
                    dsl::execution_time.eq(now + ChronoDuration::days(365 * 100)),
                ))
                .execute(conn)
                .map(|_| ())
            })
            .await
    }

    /// Deletes every `scheduled_tasks` row whose `task_instance` matches a
    /// SQL `LIKE` pattern. Backs `taskloom-ctl`'s cleanup subcommand; exists
    /// here rather than as raw SQL in the CLI so the pattern semantics are
    /// tested alongside the rest of the DAL.
    pub async fn delete_matching(&self, pattern: &str) -> Result<usize, StoreError> {
        let pattern = pattern.to_string();
        self.dal
            .database
            .interact(move |conn| diesel::delete(dsl::scheduled_tasks.filter(dsl::task_instance.like(&pattern))).execute(conn))
            .await
    }

    /// Records a heartbeat-less success marker without deleting the row —
    /// used by the cron dispatcher's own bookkeeping rows, where the
    /// schedule itself persists across fires rather than being consumed.
    pub async fn mark_success(&self, task_name: &str, task_instance: &str, now: NaiveDateTime) -> Result<(), StoreError> {
        let task_name = task_name.to_string();
        let task_instance = task_instance.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::update(
                    dsl::scheduled_tasks
                        .filter(dsl::task_name.eq(&task_name))
                        .filter(dsl::task_instance.eq(&task_instance)),
                )
                .set((
                    dsl::picked.eq(false),
                    dsl::picked_by.eq(Option::<String>::None),
                    dsl::last_success.eq(Some(now)),
                    dsl::consecutive_failures.eq(0),
                ))
                .execute(conn)
                .map(|_| ())
            })
            .await
    }
}
