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

//! DAL operations for `tasks`, one row per task-execution attempt.

use diesel::prelude::*;

use crate::database::schema::tasks::dsl;
use crate::database::Connection;
use crate::error::StoreError;
use crate::models::task_data::{NewTaskData, TaskData};

use super::DAL;

pub struct TaskDataDAL<'a> {
    pub(super) dal: &'a DAL,
}

/// Synchronous upsert, usable directly inside a [`DAL::transaction`] closure
/// alongside writes to other tables so a task-state write and whatever it
/// implies (advancing the owning record, enqueuing the next work item)
/// commit together.
pub(crate) fn upsert_conn(conn: &mut Connection, task: &NewTaskData) -> Result<TaskData, diesel::result::Error> {
    diesel::insert_into(dsl::tasks)
        .values(task)
        .on_conflict(dsl::task_id)
        .do_update()
        .set(task)
        .execute(conn)?;
    dsl::tasks.filter(dsl::task_id.eq(&task.task_id)).first(conn)
}

impl<'a> TaskDataDAL<'a> {
    /// Inserts a task row, or updates it in place if `task_id` already
    /// exists — every transition of a task (pending -> running -> completed
    /// or failed) upserts the same row rather than appending a new one.
    pub async fn upsert(&self, task: NewTaskData) -> Result<TaskData, StoreError> {
        self.dal.database.interact(move |conn| upsert_conn(conn, &task)).await
    }

    pub async fn get_by_id(&self, task_id: &str) -> Result<TaskData, StoreError> {
        let lookup = task_id.to_string();
        let found = self
            .dal
            .database
            .interact(move |conn| {
                dsl::tasks
                    .filter(dsl::task_id.eq(&lookup))
                    .first(conn)
                    .optional()
            })
            .await?;

        found.ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))
    }

    /// All task rows for a process record, in execution order.
    pub async fn list_by_process_record(&self, process_record_id: &str) -> Result<Vec<TaskData>, StoreError> {
        let id = process_record_id.to_string();
        self.dal
            .database
            .interact(move |conn| {
                dsl::tasks
                    .filter(dsl::process_record_id.eq(&id))
                    .order(dsl::task_index.asc())
                    .load(conn)
            })
            .await
    }

    /// Deletes every `tasks` row whose `process_record_id` matches a SQL
    /// `LIKE` pattern. Backs `taskloom-ctl`'s cleanup subcommand.
    pub async fn delete_matching(&self, pattern: &str) -> Result<usize, StoreError> {
        let pattern = pattern.to_string();
        self.dal
            .database
            .interact(move |conn| diesel::delete(dsl::tasks.filter(dsl::process_record_id.like(&pattern))).execute(conn))
            .await
    }
}
