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

//! Diesel table definitions.
//!
//! Every column is a Diesel type with a `FromSql`/`ToSql` impl for both
//! PostgreSQL and SQLite (`Text`, `Integer`, `BigInt`, `Bool`, `Timestamp`).
//! Deliberately no `Uuid` or `Binary` columns: those require separate
//! per-backend row structs for native UUID primary keys, which this schema
//! avoids by using plain string ids everywhere. One set of
//! `Queryable`/`Insertable` structs in `models/` is therefore valid against
//! either backend. See `DESIGN.md` for the trade-off this resolves.

diesel::table! {
    process_records (id) {
        id -> Text,
        type_name -> Text,
        input_data -> Text,
        schedule -> Nullable<Text>,
        current_status -> Text,
        current_task_index -> Integer,
        total_tasks -> Integer,
        started_when -> Nullable<Timestamp>,
        completed_when -> Nullable<Timestamp>,
        failed_when -> Nullable<Timestamp>,
        stopped_when -> Nullable<Timestamp>,
        last_error_message -> Nullable<Text>,
        triggered_by -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    tasks (task_id) {
        task_id -> Text,
        process_record_id -> Text,
        task_index -> Integer,
        task_name -> Text,
        command -> Text,
        working_directory -> Text,
        timeout_minutes -> Integer,
        max_retries -> Integer,
        retry_count -> Integer,
        status -> Text,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        exit_code -> Nullable<Integer>,
        output -> Nullable<Text>,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    scheduled_tasks (task_name, task_instance) {
        task_name -> Text,
        task_instance -> Text,
        task_data -> Text,
        execution_time -> Timestamp,
        picked -> Bool,
        picked_by -> Nullable<Text>,
        last_success -> Nullable<Timestamp>,
        last_failure -> Nullable<Timestamp>,
        consecutive_failures -> Integer,
        last_heartbeat -> Nullable<Timestamp>,
        version -> BigInt,
    }
}

diesel::table! {
    cron_schedules (id) {
        id -> Text,
        process_record_id -> Text,
        cron_expression -> Text,
        timezone -> Text,
        enabled -> Bool,
        catchup_policy -> Text,
        start_date -> Nullable<Timestamp>,
        end_date -> Nullable<Timestamp>,
        next_run_at -> Timestamp,
        last_run_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    process_records,
    tasks,
    scheduled_tasks,
    cron_schedules,
);
