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

//! Process record model.
//!
//! A `ProcessRecord` is the long-lived, user-facing template instance: it
//! names a process type, carries the input that seeds each run, and tracks
//! the status of its most recent run.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::schema::process_records;

/// Lifecycle status of a process record's current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Stopped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Pending => "PENDING",
            ProcessStatus::InProgress => "IN_PROGRESS",
            ProcessStatus::Completed => "COMPLETED",
            ProcessStatus::Failed => "FAILED",
            ProcessStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessStatus::Pending),
            "IN_PROGRESS" => Ok(ProcessStatus::InProgress),
            "COMPLETED" => Ok(ProcessStatus::Completed),
            "FAILED" => Ok(ProcessStatus::Failed),
            "STOPPED" => Ok(ProcessStatus::Stopped),
            other => Err(format!("unknown process status: {other}")),
        }
    }
}

/// A process record row as stored in `process_records`.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = process_records)]
pub struct ProcessRecord {
    pub id: String,
    pub type_name: String,
    pub input_data: String,
    pub schedule: Option<String>,
    pub current_status: String,
    pub current_task_index: i32,
    pub total_tasks: i32,
    pub started_when: Option<NaiveDateTime>,
    pub completed_when: Option<NaiveDateTime>,
    pub failed_when: Option<NaiveDateTime>,
    pub stopped_when: Option<NaiveDateTime>,
    pub last_error_message: Option<String>,
    pub triggered_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ProcessRecord {
    /// Parses `current_status`, falling back to `Pending` if the stored
    /// value is somehow not one of the known statuses (defensive: this
    /// column is only ever written by this crate).
    pub fn status(&self) -> ProcessStatus {
        self.current_status.parse().unwrap_or(ProcessStatus::Pending)
    }
}

/// A new process record to insert.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = process_records)]
pub struct NewProcessRecord {
    pub id: String,
    pub type_name: String,
    pub input_data: String,
    pub schedule: Option<String>,
    pub current_status: String,
    pub current_task_index: i32,
    pub total_tasks: i32,
    pub triggered_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
