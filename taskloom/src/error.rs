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

//! Error types for the orchestration engine.
//!
//! Errors are split by the layer that raises them rather than lumped into one
//! enum: a `StoreError` from the DAL, a `ValidationError` from the
//! orchestrator's state machine, and an `ExecutionError` from the command
//! executor all mean different things to a caller and retry differently.

use thiserror::Error;

/// Errors raised by the Data Access Layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A transient failure talking to the database (connection drop, pool
    /// exhaustion). Callers may retry.
    #[error("transient store error: {0}")]
    Transient(String),

    /// A non-recoverable failure (schema drift, permission denied). Callers
    /// should surface this and halt rather than retry.
    #[error("fatal store error: {0}")]
    Fatal(String),

    /// A write attempted to move a terminal status to a non-terminal one, or
    /// otherwise violated a state machine invariant.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("database error: {0}")]
    Diesel(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// True if retrying the same operation later has a reasonable chance of
    /// succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Pool(_))
    }
}

/// Errors raised validating input or a requested state transition.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown process type: {0}")]
    UnknownProcessType(String),

    #[error("process type {0} has no tasks")]
    EmptyProcessType(String),

    #[error("process record {0} is already in progress")]
    AlreadyRunning(String),

    #[error("process record {0} not found")]
    RecordNotFound(String),

    #[error("invalid cron expression {expr}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the command executor (C1).
#[derive(Debug, Error, Clone)]
pub enum ExecutionError {
    /// The child exited with a non-zero status.
    #[error("command exited with status {code}")]
    NonZeroExit { code: i32, output: String },

    /// The child did not finish before its configured timeout and was
    /// killed.
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The child could not be spawned at all (missing binary, permission
    /// denied, bad working directory).
    #[error("failed to launch command: {0}")]
    Spawn(String),

    /// The child was killed by a signal rather than exiting normally.
    #[error("command terminated by signal")]
    Signaled,
}

/// Errors raised deserializing or serializing a work-item payload.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to serialize payload: {0}")]
    Encode(String),

    #[error("failed to deserialize payload: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for SerializationError {
    fn from(e: serde_json::Error) -> Self {
        SerializationError::Decode(e.to_string())
    }
}

/// Top-level error type returned by the orchestrator's public API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("orchestrator is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    Config(String),
}
