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

//! Data Access Layer (C5): thin CRUD plus the handful of non-trivial
//! operations the state store needs — idempotent status transitions,
//! task upserts, and status-filtered listing.

pub mod cron_schedule;
pub mod process_record;
pub mod task_data;
pub mod work_item;

use diesel::prelude::*;

use crate::database::{Connection, Database};
use crate::error::StoreError;

pub use cron_schedule::CronScheduleDAL;
pub use process_record::ProcessRecordDAL;
pub use task_data::TaskDataDAL;
pub use work_item::WorkItemDAL;

/// Entry point for all persistence operations, cheap to clone.
#[derive(Clone)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn process_record(&self) -> ProcessRecordDAL<'_> {
        ProcessRecordDAL { dal: self }
    }

    pub fn task_data(&self) -> TaskDataDAL<'_> {
        TaskDataDAL { dal: self }
    }

    pub fn work_item(&self) -> WorkItemDAL<'_> {
        WorkItemDAL { dal: self }
    }

    pub fn cron_schedule(&self) -> CronScheduleDAL<'_> {
        CronScheduleDAL { dal: self }
    }

    /// Runs `f` inside a single Diesel transaction on the compiled-in
    /// backend connection. Used to make the "task row write + next work
    /// item enqueue" pair atomic, per the crash-consistency requirement in
    /// the orchestrator's state machine.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, diesel::result::Error> + Send + 'static,
        R: Send + 'static,
    {
        self.database.interact(move |conn| conn.transaction(f)).await
    }
}
