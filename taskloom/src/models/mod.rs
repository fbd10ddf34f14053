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

//! Persisted and transient data structures for the orchestration engine.

pub mod cron_schedule;
pub mod process_data;
pub mod process_record;
pub mod task_data;
pub mod work_item;

pub use cron_schedule::{CatchupPolicy, CronSchedule, NewCronSchedule};
pub use process_data::ProcessData;
pub use process_record::{NewProcessRecord, ProcessRecord, ProcessStatus};
pub use task_data::{NewTaskData, TaskData, TaskStatus};
pub use work_item::{NewWorkItem, WorkItem};
