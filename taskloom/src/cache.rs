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

//! In-memory `ProcessData` cache.
//!
//! A context-propagation optimization only: the durable source of truth is
//! always the `tasks`/`process_records` rows, and a cache miss is recovered
//! by reconstructing a minimal `ProcessData` from those rows rather than
//! treated as an error. Concurrent updates to a single entry never happen by
//! construction — only one `cli-task` for a given process is ever in flight
//! — so a coarse `RwLock<HashMap<..>>`, the same primitive `ProcessTypeRegistry`
//! uses, is enough; no per-entry locking is needed.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::ProcessData;

#[derive(Default)]
pub struct ProcessCache {
    entries: RwLock<HashMap<String, ProcessData>>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data: ProcessData) {
        self.entries
            .write()
            .expect("process cache lock poisoned")
            .insert(data.process_id.clone(), data);
    }

    pub fn get(&self, process_id: &str) -> Option<ProcessData> {
        self.entries
            .read()
            .expect("process cache lock poisoned")
            .get(process_id)
            .cloned()
    }

    pub fn evict(&self, process_id: &str) {
        self.entries
            .write()
            .expect("process cache lock poisoned")
            .remove(process_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(id: &str) -> ProcessData {
        ProcessData {
            process_id: id.to_string(),
            process_record_id: Some("rec".to_string()),
            type_name: "demo".to_string(),
            input_data: HashMap::new(),
            total_tasks: 1,
            current_task_index: 0,
            status: crate::models::ProcessStatus::InProgress,
            process_context: HashMap::new(),
            tasks: vec![],
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let cache = ProcessCache::new();
        cache.insert(sample("p1"));
        assert!(cache.get("p1").is_some());
    }

    #[test]
    fn evict_removes_entry() {
        let cache = ProcessCache::new();
        cache.insert(sample("p1"));
        cache.evict("p1");
        assert!(cache.get("p1").is_none());
    }
}
