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

//! Cron schedule model (`cron_schedules`).
//!
//! Binds a cron expression + timezone to a [`crate::models::ProcessRecord`]
//! so the [`crate::cron::CronDispatcher`] can start new runs automatically.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::cron_schedules;

/// What to do when the orchestrator was down across one or more fire times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatchupPolicy {
    /// Jump straight to the next future fire time; missed fires are simply
    /// skipped.
    Skip,
    /// Run a single catch-up execution for the whole missed window, then
    /// resume normal cadence.
    RunOnce,
}

impl CatchupPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CatchupPolicy::Skip => "Skip",
            CatchupPolicy::RunOnce => "RunOnce",
        }
    }
}

impl std::str::FromStr for CatchupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Skip" => Ok(CatchupPolicy::Skip),
            "RunOnce" => Ok(CatchupPolicy::RunOnce),
            other => Err(format!("unknown catchup policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = cron_schedules)]
pub struct CronSchedule {
    pub id: String,
    pub process_record_id: String,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub catchup_policy: String,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub next_run_at: NaiveDateTime,
    pub last_run_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CronSchedule {
    pub fn catchup_policy(&self) -> CatchupPolicy {
        self.catchup_policy.parse().unwrap_or(CatchupPolicy::Skip)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cron_schedules)]
pub struct NewCronSchedule {
    pub id: String,
    pub process_record_id: String,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub catchup_policy: String,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub next_run_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
