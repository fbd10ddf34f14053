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

//! End-to-end scenarios against a real (file-backed) SQLite database,
//! exercising the full `StartProcess` → work queue → handler → terminal
//! status path. Mirrors the scenario list documented for this crate's
//! design: happy path, retry-then-succeed, permanent failure, template
//! expansion, and context propagation between tasks.

use std::collections::HashMap;
use std::time::Duration;

use taskloom::{Orchestrator, OrchestratorConfig, ProcessStatus, ProcessType, TaskDefinition, TaskStatus};
use tempfile::TempDir;

/// A config tuned for fast, deterministic tests: short poll/lease/backoff
/// intervals instead of the minutes-scale production defaults.
fn fast_config(dir: &TempDir) -> OrchestratorConfig {
    let db_path = dir.path().join("taskloom.db");
    let mut config = OrchestratorConfig::default();
    config.database_url = format!("sqlite://{}", db_path.display());
    config.db_pool_size = 4;
    config.worker_pool_size = 4;
    config.poll_interval = Duration::from_millis(30);
    config.lease_duration = Duration::from_secs(2);
    config.heartbeat_interval = Duration::from_millis(300);
    config.retry_backoff_base = Duration::from_millis(100);
    config.cron_poll_interval = Duration::from_secs(5);
    config
}

async fn wait_for_terminal(orchestrator: &Orchestrator, process_id: &str) -> taskloom::ProcessRecord {
    tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let record = orchestrator.get_process_record(process_id).await.expect("record exists");
            if record.status().is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process reached a terminal status before the test timeout")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_three_tasks_completes_in_order() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(fast_config(&dir)).await.unwrap();
    orchestrator.registry().register(
        ProcessType::new("demo")
            .description("three-step smoke test")
            .task(TaskDefinition::new("A", "echo one").timeout(Duration::from_secs(10)))
            .task(TaskDefinition::new("B", "echo two").timeout(Duration::from_secs(10)))
            .task(TaskDefinition::new("C", "echo three").timeout(Duration::from_secs(10))),
    );
    orchestrator.start().await.unwrap();

    let process_id = orchestrator.start_process("demo", HashMap::new()).await.unwrap();
    let record = wait_for_terminal(&orchestrator, &process_id).await;

    assert_eq!(record.status(), ProcessStatus::Completed);
    assert_eq!(record.current_task_index, 3);

    let tasks = orchestrator.get_process_tasks(&process_id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    for (task, expected_output) in tasks.iter().zip(["one\n", "two\n", "three\n"]) {
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.exit_code, Some(0));
        assert_eq!(task.output.as_deref(), Some(expected_output));
    }

    orchestrator.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn task_retries_then_succeeds() {
    let dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(fast_config(&dir)).await.unwrap();

    // Fails on the first two attempts, succeeds on the third.
    let flaky_command = "n=$(( $(cat attempts.count 2>/dev/null || echo 0) + 1 )); \
        echo $n > attempts.count; \
        if [ $n -ge 3 ]; then exit 0; else exit 1; fi";

    orchestrator.registry().register(
        ProcessType::new("flaky")
            .task(TaskDefinition::new("A", "echo start").timeout(Duration::from_secs(10)))
            .task(
                TaskDefinition::new("B", flaky_command)
                    .working_directory(work_dir.path().to_string_lossy().to_string())
                    .timeout(Duration::from_secs(10))
                    .max_retries(3),
            ),
    );
    orchestrator.start().await.unwrap();

    let process_id = orchestrator.start_process("flaky", HashMap::new()).await.unwrap();
    let record = wait_for_terminal(&orchestrator, &process_id).await;

    assert_eq!(record.status(), ProcessStatus::Completed);

    let tasks = orchestrator.get_process_tasks(&process_id).await.unwrap();
    let task_b = tasks.iter().find(|t| t.task_name == "B").unwrap();
    assert_eq!(task_b.status(), TaskStatus::Completed);
    assert_eq!(task_b.retry_count, 2);
    assert_eq!(task_b.exit_code, Some(0));

    orchestrator.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn task_exhausting_retries_fails_the_process() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(fast_config(&dir)).await.unwrap();

    orchestrator.registry().register(
        ProcessType::new("always_fails").task(
            TaskDefinition::new("B", "exit 1")
                .timeout(Duration::from_secs(10))
                .max_retries(2),
        ),
    );
    orchestrator.start().await.unwrap();

    let process_id = orchestrator.start_process("always_fails", HashMap::new()).await.unwrap();
    let record = wait_for_terminal(&orchestrator, &process_id).await;

    assert_eq!(record.status(), ProcessStatus::Failed);
    let message = record.last_error_message.as_deref().unwrap_or_default();
    assert!(message.contains('B'), "error message should name the failing task: {message}");
    assert!(message.to_ascii_lowercase().contains("exit"), "error message should mention the exit status: {message}");

    let tasks = orchestrator.get_process_tasks(&process_id).await.unwrap();
    let task_b = tasks.iter().find(|t| t.task_name == "B").unwrap();
    assert_eq!(task_b.status(), TaskStatus::Failed);
    assert_eq!(task_b.retry_count, 2);
    assert_eq!(task_b.exit_code, Some(1));

    orchestrator.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn command_template_is_expanded_from_input_data() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(fast_config(&dir)).await.unwrap();

    orchestrator.registry().register(
        ProcessType::new("templated")
            .task(TaskDefinition::new("A", "echo ${input_file}--${user_id}").timeout(Duration::from_secs(10))),
    );
    orchestrator.start().await.unwrap();

    let mut input = HashMap::new();
    input.insert("input_file".to_string(), "/x".to_string());
    input.insert("user_id".to_string(), "u".to_string());

    let process_id = orchestrator.start_process("templated", input).await.unwrap();
    let record = wait_for_terminal(&orchestrator, &process_id).await;
    assert_eq!(record.status(), ProcessStatus::Completed);

    let tasks = orchestrator.get_process_tasks(&process_id).await.unwrap();
    let output = tasks[0].output.as_deref().unwrap_or_default();
    assert!(output.contains("/x--u"), "expected expanded output, got {output:?}");

    orchestrator.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn later_task_sees_earlier_tasks_exit_code_in_context() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(fast_config(&dir)).await.unwrap();

    orchestrator.registry().register(
        ProcessType::new("context_chain")
            .task(TaskDefinition::new("A", "exit 0").timeout(Duration::from_secs(10)))
            .task(TaskDefinition::new("followup", "echo code=${A_exit_code}").timeout(Duration::from_secs(10))),
    );
    orchestrator.start().await.unwrap();

    let process_id = orchestrator.start_process("context_chain", HashMap::new()).await.unwrap();
    let record = wait_for_terminal(&orchestrator, &process_id).await;
    assert_eq!(record.status(), ProcessStatus::Completed);

    let tasks = orchestrator.get_process_tasks(&process_id).await.unwrap();
    let followup = tasks.iter().find(|t| t.task_name == "followup").unwrap();
    assert_eq!(followup.output.as_deref(), Some("code=0\n"));

    orchestrator.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn redelivering_a_completed_task_payload_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(fast_config(&dir)).await.unwrap();

    orchestrator
        .registry()
        .register(ProcessType::new("solo").task(TaskDefinition::new("A", "echo one").timeout(Duration::from_secs(10))));
    orchestrator.start().await.unwrap();

    let process_id = orchestrator.start_process("solo", HashMap::new()).await.unwrap();
    let record = wait_for_terminal(&orchestrator, &process_id).await;
    assert_eq!(record.status(), ProcessStatus::Completed);

    let tasks = orchestrator.get_process_tasks(&process_id).await.unwrap();
    let completed_task = tasks[0].clone();
    assert_eq!(completed_task.status(), TaskStatus::Completed);

    // Re-enqueue the already-completed task's exact payload directly; the
    // handler must recognize it as already COMPLETED and return without
    // re-running the command or mutating the row.
    let payload = serde_json::to_string(&completed_task).unwrap();
    orchestrator
        .dal()
        .work_item()
        .schedule(taskloom::models::NewWorkItem {
            task_name: "cli-task".to_string(),
            task_instance: format!("{}-redelivered", completed_task.task_id),
            task_data: payload,
            execution_time: chrono::Utc::now().naive_utc(),
            picked: false,
            consecutive_failures: 0,
            version: 1,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let tasks_after = orchestrator.get_process_tasks(&process_id).await.unwrap();
    assert_eq!(tasks_after[0].output, completed_task.output);
    assert_eq!(tasks_after[0].status(), TaskStatus::Completed);

    orchestrator.stop().await.unwrap();
}
