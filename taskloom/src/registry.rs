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

//! Process type registry (C3): an in-memory mapping from type name to an
//! ordered list of task definitions.
//!
//! Registration is expected at startup, but the registry stays mutable for
//! the lifetime of the process — additions made after the orchestrator has
//! started are not required to be visible to work items already enqueued,
//! since a process's task list is captured into its `ProcessData` at
//! enqueue time and carried from there on.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::error::ValidationError;

/// A single task within a process type: its command template, working
/// directory, and retry/timeout policy.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub command: String,
    pub working_directory: String,
    pub timeout: Duration,
    pub max_retries: i32,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_directory: ".".to_string(),
            timeout: Duration::from_secs(60 * 60),
            max_retries: 3,
        }
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A named, ordered sequence of tasks that `StartProcess` materializes into
/// a run.
#[derive(Debug, Clone)]
pub struct ProcessType {
    pub name: String,
    pub description: String,
    pub tasks: Vec<TaskDefinition>,
}

impl ProcessType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tasks: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }
}

/// In-memory registry of process types, safe to share across the worker
/// pool and the orchestrator's public API.
#[derive(Default)]
pub struct ProcessTypeRegistry {
    types: RwLock<HashMap<String, ProcessType>>,
}

impl ProcessTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a process type, replacing any existing registration under
    /// the same name.
    pub fn register(&self, process_type: ProcessType) {
        self.types
            .write()
            .expect("process type registry lock poisoned")
            .insert(process_type.name.clone(), process_type);
    }

    pub fn get(&self, name: &str) -> Result<ProcessType, ValidationError> {
        self.types
            .read()
            .expect("process type registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownProcessType(name.to_string()))
    }

    pub fn validate(&self, name: &str) -> bool {
        self.types
            .read()
            .expect("process type registry lock poisoned")
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_round_trips() {
        let registry = ProcessTypeRegistry::new();
        registry.register(
            ProcessType::new("demo")
                .task(TaskDefinition::new("A", "echo one"))
                .task(TaskDefinition::new("B", "echo two")),
        );

        let pt = registry.get("demo").unwrap();
        assert_eq!(pt.tasks.len(), 2);
        assert!(registry.validate("demo"));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = ProcessTypeRegistry::new();
        assert!(registry.get("missing").is_err());
        assert!(!registry.validate("missing"));
    }

    #[test]
    fn registering_same_name_twice_replaces() {
        let registry = ProcessTypeRegistry::new();
        registry.register(ProcessType::new("demo").task(TaskDefinition::new("A", "echo one")));
        registry.register(ProcessType::new("demo").task(TaskDefinition::new("A", "echo two")));

        let pt = registry.get("demo").unwrap();
        assert_eq!(pt.tasks[0].command, "echo two");
    }
}
