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

//! DAL operations for `process_records`.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::schema::process_records::dsl;
use crate::database::Connection;
use crate::error::StoreError;
use crate::models::process_record::{NewProcessRecord, ProcessRecord, ProcessStatus};

use super::DAL;

pub struct ProcessRecordDAL<'a> {
    pub(super) dal: &'a DAL,
}

/// Synchronous status transition, usable directly inside a
/// [`DAL::transaction`] closure. Does not re-check the terminal-state guard
/// [`ProcessRecordDAL::update_status`] enforces: every internal call site
/// that reaches for this helper is already transitioning a known-in-progress
/// record to a terminal one, which is always a legal move.
pub(crate) fn set_status_conn(
    conn: &mut Connection,
    record_id: &str,
    new_status: ProcessStatus,
    timestamp: NaiveDateTime,
    error_message: Option<String>,
) -> Result<(), diesel::result::Error> {
    use dsl::*;

    diesel::update(process_records.filter(id.eq(record_id)))
        .set((
            current_status.eq(new_status.as_str()),
            updated_at.eq(timestamp),
            last_error_message.eq(&error_message),
        ))
        .execute(conn)?;

    match new_status {
        ProcessStatus::InProgress => diesel::update(process_records.filter(id.eq(record_id)))
            .set(started_when.eq(Some(timestamp)))
            .execute(conn),
        ProcessStatus::Completed => diesel::update(process_records.filter(id.eq(record_id)))
            .set(completed_when.eq(Some(timestamp)))
            .execute(conn),
        ProcessStatus::Failed => diesel::update(process_records.filter(id.eq(record_id)))
            .set(failed_when.eq(Some(timestamp)))
            .execute(conn),
        ProcessStatus::Stopped => diesel::update(process_records.filter(id.eq(record_id)))
            .set(stopped_when.eq(Some(timestamp)))
            .execute(conn),
        ProcessStatus::Pending => Ok(0),
    }?;

    Ok(())
}

/// Synchronous task-index advance, usable directly inside a
/// [`DAL::transaction`] closure.
pub(crate) fn advance_task_index_conn(
    conn: &mut Connection,
    record_id: &str,
    new_index: i32,
    timestamp: NaiveDateTime,
) -> Result<(), diesel::result::Error> {
    use dsl::*;
    diesel::update(process_records.filter(id.eq(record_id)))
        .set((current_task_index.eq(new_index), updated_at.eq(timestamp)))
        .execute(conn)
        .map(|_| ())
}

impl<'a> ProcessRecordDAL<'a> {
    pub async fn create(&self, record: NewProcessRecord) -> Result<ProcessRecord, StoreError> {
        self.dal
            .database
            .interact(move |conn| {
                diesel::insert_into(dsl::process_records)
                    .values(&record)
                    .execute(conn)?;
                dsl::process_records
                    .filter(dsl::id.eq(&record.id))
                    .first(conn)
            })
            .await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<ProcessRecord, StoreError> {
        let lookup = id.to_string();
        let found = self
            .dal
            .database
            .interact(move |conn| {
                dsl::process_records
                    .filter(dsl::id.eq(&lookup))
                    .first(conn)
                    .optional()
            })
            .await?;

        found.ok_or_else(|| StoreError::NotFound(format!("process_record {id}")))
    }

    pub async fn find_by_status(&self, status: ProcessStatus) -> Result<Vec<ProcessRecord>, StoreError> {
        let status = status.as_str().to_string();
        self.dal
            .database
            .interact(move |conn| {
                dsl::process_records
                    .filter(dsl::current_status.eq(&status))
                    .load(conn)
            })
            .await
    }

    /// Idempotent status transition. Refuses to move a terminal status to any
    /// other status, terminal or not (the only exception is `restart`, which
    /// is a distinct, explicit operation below) — a repeat call with the same
    /// status is a no-op, not an error, so e.g. re-stopping an already
    /// `STOPPED` record is harmless, but `STOPPED` -> `COMPLETED` would leave
    /// two terminal timestamps set (P1) and is rejected.
    pub async fn update_status(
        &self,
        id: &str,
        new_status: ProcessStatus,
        timestamp: NaiveDateTime,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let current = self.get_by_id(&id).await?;

        if current.status().is_terminal() && current.status() != new_status {
            return Err(StoreError::InvalidTransition(format!(
                "cannot move process_record {id} from terminal {} to {new_status}",
                current.status()
            )));
        }

        let record_id = id;
        self.dal
            .database
            .interact(move |conn| set_status_conn(conn, &record_id, new_status, timestamp, error_message))
            .await
    }

    pub async fn advance_task_index(&self, id: &str, new_index: i32, timestamp: NaiveDateTime) -> Result<(), StoreError> {
        let record_id = id.to_string();
        self.dal
            .database
            .interact(move |conn| advance_task_index_conn(conn, &record_id, new_index, timestamp))
            .await
    }

    /// Resets a record to run again from the first task. Allowed from any
    /// terminal state.
    pub async fn restart(&self, id: &str, timestamp: NaiveDateTime) -> Result<(), StoreError> {
        let current = self.get_by_id(id).await?;
        if !current.status().is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "cannot restart process_record {id}: not in a terminal state ({})",
                current.status()
            )));
        }

        let record_id = id.to_string();
        self.dal
            .database
            .interact(move |conn| {
                use dsl::*;
                diesel::update(process_records.filter(id.eq(&record_id)))
                    .set((
                        current_status.eq(ProcessStatus::Pending.as_str()),
                        current_task_index.eq(0),
                        started_when.eq(Option::<NaiveDateTime>::None),
                        completed_when.eq(Option::<NaiveDateTime>::None),
                        failed_when.eq(Option::<NaiveDateTime>::None),
                        stopped_when.eq(Option::<NaiveDateTime>::None),
                        last_error_message.eq(Option::<String>::None),
                        updated_at.eq(timestamp),
                    ))
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    /// Deletes a process record, refusing to delete one currently in
    /// progress.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let current = self.get_by_id(id).await?;
        if current.status() == ProcessStatus::InProgress {
            return Err(StoreError::InvalidTransition(format!(
                "cannot delete process_record {id}: currently IN_PROGRESS"
            )));
        }

        let id = id.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::delete(dsl::process_records.filter(dsl::id.eq(&id)))
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    /// Deletes every `process_records` row whose `id` matches a SQL `LIKE`
    /// pattern, regardless of status. Backs `taskloom-ctl`'s cleanup
    /// subcommand, which is the one blessed maintenance entry point allowed
    /// to bypass the in-progress guard `delete` enforces.
    pub async fn delete_matching(&self, pattern: &str) -> Result<usize, StoreError> {
        let pattern = pattern.to_string();
        self.dal
            .database
            .interact(move |conn| diesel::delete(dsl::process_records.filter(dsl::id.like(&pattern))).execute(conn))
            .await
    }
}
