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

//! Task execution row model.
//!
//! One row per task-execution attempt, upserted on every state transition
//! and keyed by `task_id` (`<process_id>-task-<index>`).

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::tasks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A task execution row as stored in `tasks`.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = tasks)]
pub struct TaskData {
    pub task_id: String,
    pub process_record_id: String,
    pub task_index: i32,
    pub task_name: String,
    pub command: String,
    pub working_directory: String,
    pub timeout_minutes: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub status: String,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error_message: Option<String>,
}

impl TaskData {
    pub fn status(&self) -> TaskStatus {
        self.status.parse().unwrap_or(TaskStatus::Pending)
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct NewTaskData {
    pub task_id: String,
    pub process_record_id: String,
    pub task_index: i32,
    pub task_name: String,
    pub command: String,
    pub working_directory: String,
    pub timeout_minutes: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub status: String,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error_message: Option<String>,
}

impl From<TaskData> for NewTaskData {
    fn from(t: TaskData) -> Self {
        Self {
            task_id: t.task_id,
            process_record_id: t.process_record_id,
            task_index: t.task_index,
            task_name: t.task_name,
            command: t.command,
            working_directory: t.working_directory,
            timeout_minutes: t.timeout_minutes,
            max_retries: t.max_retries,
            retry_count: t.retry_count,
            status: t.status,
            started_at: t.started_at,
            completed_at: t.completed_at,
            exit_code: t.exit_code,
            output: t.output,
            error_message: t.error_message,
        }
    }
}

/// The mirror conversion: a freshly built `NewTaskData` echoes back exactly
/// as the row Diesel would return from the upsert, since every column here
/// is client-supplied and none is server-generated. Lets call sites build
/// the post-write row once, before the write happens, and reuse it both for
/// payload serialization and for updating in-memory state.
impl From<NewTaskData> for TaskData {
    fn from(t: NewTaskData) -> Self {
        Self {
            task_id: t.task_id,
            process_record_id: t.process_record_id,
            task_index: t.task_index,
            task_name: t.task_name,
            command: t.command,
            working_directory: t.working_directory,
            timeout_minutes: t.timeout_minutes,
            max_retries: t.max_retries,
            retry_count: t.retry_count,
            status: t.status,
            started_at: t.started_at,
            completed_at: t.completed_at,
            exit_code: t.exit_code,
            output: t.output,
            error_message: t.error_message,
        }
    }
}
