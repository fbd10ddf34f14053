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

//! Durable work queue row model (`scheduled_tasks`).
//!
//! Keyed by `(task_name, task_instance)`; see [`crate::queue::WorkQueue`] for
//! the claim/heartbeat/reclaim protocol built on top of this row shape.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::scheduled_tasks;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = scheduled_tasks)]
pub struct WorkItem {
    pub task_name: String,
    pub task_instance: String,
    pub task_data: String,
    pub execution_time: NaiveDateTime,
    pub picked: bool,
    pub picked_by: Option<String>,
    pub last_success: Option<NaiveDateTime>,
    pub last_failure: Option<NaiveDateTime>,
    pub consecutive_failures: i32,
    pub last_heartbeat: Option<NaiveDateTime>,
    pub version: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = scheduled_tasks)]
pub struct NewWorkItem {
    pub task_name: String,
    pub task_instance: String,
    pub task_data: String,
    pub execution_time: NaiveDateTime,
    pub picked: bool,
    pub consecutive_failures: i32,
    pub version: i64,
}
