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

//! DAL operations for `cron_schedules`.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::schema::cron_schedules::dsl;
use crate::error::StoreError;
use crate::models::cron_schedule::{CronSchedule, NewCronSchedule};

use super::DAL;

pub struct CronScheduleDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> CronScheduleDAL<'a> {
    pub async fn create(&self, schedule: NewCronSchedule) -> Result<CronSchedule, StoreError> {
        self.dal
            .database
            .interact(move |conn| {
                diesel::insert_into(dsl::cron_schedules)
                    .values(&schedule)
                    .execute(conn)?;
                dsl::cron_schedules.filter(dsl::id.eq(&schedule.id)).first(conn)
            })
            .await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<CronSchedule, StoreError> {
        let lookup = id.to_string();
        let found = self
            .dal
            .database
            .interact(move |conn| {
                dsl::cron_schedules
                    .filter(dsl::id.eq(&lookup))
                    .first(conn)
                    .optional()
            })
            .await?;

        found.ok_or_else(|| StoreError::NotFound(format!("cron_schedule {id}")))
    }

    pub async fn list_enabled(&self) -> Result<Vec<CronSchedule>, StoreError> {
        self.dal
            .database
            .interact(move |conn| dsl::cron_schedules.filter(dsl::enabled.eq(true)).load(conn))
            .await
    }

    /// Schedules due to fire at or before `now`.
    pub async fn list_due(&self, now: NaiveDateTime) -> Result<Vec<CronSchedule>, StoreError> {
        self.dal
            .database
            .interact(move |conn| {
                dsl::cron_schedules
                    .filter(dsl::enabled.eq(true))
                    .filter(dsl::next_run_at.le(now))
                    .load(conn)
            })
            .await
    }

    /// Advances a schedule past a fire: records when it last ran and when it
    /// should next be considered due.
    pub async fn update_after_fire(&self, id: &str, next_run_at: NaiveDateTime, last_run_at: NaiveDateTime) -> Result<(), StoreError> {
        let id = id.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::update(dsl::cron_schedules.filter(dsl::id.eq(&id)))
                    .set((
                        dsl::next_run_at.eq(next_run_at),
                        dsl::last_run_at.eq(Some(last_run_at)),
                        dsl::updated_at.eq(last_run_at),
                    ))
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let id = id.to_string();
        self.dal
            .database
            .interact(move |conn| {
                diesel::update(dsl::cron_schedules.filter(dsl::id.eq(&id)))
                    .set(dsl::enabled.eq(enabled))
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }
}
