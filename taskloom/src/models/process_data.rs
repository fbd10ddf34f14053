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

//! Transient per-run process context.
//!
//! `ProcessData` is materialized once when a process starts, carried inside
//! work-item payloads so a peer node can reconstruct it after a crash (see
//! `DESIGN.md` on the in-memory cache vs durable payload), and mirrored into
//! an in-process cache purely as a context-propagation optimization.

use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SerializationError;
use crate::models::process_record::ProcessStatus;
use crate::models::task_data::TaskData;

/// Per-run context: input data, accumulated task outputs, and the ordered
/// task list for a single process execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessData {
    /// Identifies this run, distinct from the parent `ProcessRecord.id`.
    pub process_id: String,
    /// Back-reference to the owning record, by id only (no pointer cycle).
    pub process_record_id: Option<String>,
    pub type_name: String,
    pub input_data: HashMap<String, String>,
    pub total_tasks: i32,
    pub current_task_index: i32,
    pub status: ProcessStatus,
    /// Accumulates `<task_name>_exit_code`, `<task_name>_output`, and
    /// `last_completed_task` as tasks complete.
    pub process_context: HashMap<String, String>,
    pub tasks: Vec<TaskData>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ProcessData {
    /// `0 ≤ current_task_index ≤ total_tasks`, enforced at every call site
    /// that advances it.
    pub fn is_complete(&self) -> bool {
        self.current_task_index >= self.total_tasks
    }

    pub fn current_task(&self) -> Option<&TaskData> {
        self.tasks.get(self.current_task_index as usize)
    }

    /// Records a completed task's outcome into the accumulated context so
    /// later tasks' command templates can reference it.
    pub fn record_task_output(&mut self, task_name: &str, exit_code: i32, output: &str) {
        self.process_context
            .insert(format!("{task_name}_exit_code"), exit_code.to_string());
        self.process_context
            .insert(format!("{task_name}_output"), output.to_string());
        self.process_context
            .insert("last_completed_task".to_string(), task_name.to_string());
        self.updated_at = Utc::now().naive_utc();
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        serde_json::to_string(self).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        serde_json::from_str(json).map_err(SerializationError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProcessData {
        ProcessData {
            process_id: "proc-1".to_string(),
            process_record_id: Some("rec-1".to_string()),
            type_name: "demo".to_string(),
            input_data: HashMap::new(),
            total_tasks: 2,
            current_task_index: 0,
            status: ProcessStatus::InProgress,
            process_context: HashMap::new(),
            tasks: vec![],
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn record_task_output_populates_context() {
        let mut data = sample();
        data.record_task_output("A", 0, "one\n");
        assert_eq!(data.process_context.get("A_exit_code").unwrap(), "0");
        assert_eq!(data.process_context.get("A_output").unwrap(), "one\n");
        assert_eq!(data.process_context.get("last_completed_task").unwrap(), "A");
    }

    #[test]
    fn json_round_trip_preserves_context() {
        let mut data = sample();
        data.record_task_output("A", 0, "one\n");
        let json = data.to_json().unwrap();
        let restored = ProcessData::from_json(&json).unwrap();
        assert_eq!(restored.process_context, data.process_context);
        assert_eq!(restored.process_id, data.process_id);
    }

    #[test]
    fn is_complete_reflects_task_index() {
        let mut data = sample();
        assert!(!data.is_complete());
        data.current_task_index = 2;
        assert!(data.is_complete());
    }
}
