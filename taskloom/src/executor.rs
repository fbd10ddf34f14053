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

//! Command Executor (C1): spawns a single shell command, captures its
//! combined output up to a configured cap, and enforces a timeout.
//!
//! This module is intentionally pure — no persistence, no retry policy, no
//! knowledge of the queue or the orchestrator. It only knows how to run one
//! command and report what happened.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ExecutionError;

/// Outcome of a single command invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub error_message: Option<String>,
}

/// Runs `command` in `working_directory` via the platform shell, killing it
/// if it runs past `timeout`, and capping combined stdout+stderr at
/// `max_output_bytes`.
pub async fn execute(
    command: &str,
    working_directory: &str,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<ExecutionResult, ExecutionError> {
    let mut cmd = shell_command(command);
    cmd.current_dir(working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ExecutionError::Spawn(e.to_string()))?;

    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut stderr = child.stderr.take().expect("stderr was piped");

    let read_output = async {
        let mut combined = Vec::new();
        let mut truncated = false;
        truncated |= read_capped(&mut stdout, &mut combined, max_output_bytes).await;
        truncated |= read_capped(&mut stderr, &mut combined, max_output_bytes).await;
        (combined, truncated)
    };

    let wait = child.wait();

    let run = async {
        let ((output_bytes, truncated), status) = tokio::join!(read_output, wait);
        let status = status.map_err(|e| ExecutionError::Spawn(e.to_string()))?;
        Ok::<_, ExecutionError>((output_bytes, truncated, status))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok((output_bytes, truncated, status))) => {
            let mut output = String::from_utf8_lossy(&output_bytes).into_owned();
            if truncated {
                output.push_str(&format!(
                    "\n...[truncated, output exceeded {max_output_bytes} bytes]"
                ));
            }

            match status.code() {
                Some(0) => Ok(ExecutionResult {
                    success: true,
                    exit_code: Some(0),
                    output,
                    error_message: None,
                }),
                Some(code) => {
                    debug!(code, "command exited non-zero");
                    Ok(ExecutionResult {
                        success: false,
                        exit_code: Some(code),
                        output: output.clone(),
                        error_message: Some(
                            ExecutionError::NonZeroExit { code, output }.to_string(),
                        ),
                    })
                }
                None => Ok(ExecutionResult {
                    success: false,
                    exit_code: None,
                    output,
                    error_message: Some(ExecutionError::Signaled.to_string()),
                }),
            }
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(?timeout, "command timed out, killing child");
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(ExecutionError::Timeout(timeout))
        }
    }
}

/// Reads `reader` into `dest` up to `cap` bytes, draining and discarding
/// anything beyond the cap so a runaway command can't exhaust memory.
/// Returns whether truncation occurred.
async fn read_capped<R: AsyncRead + Unpin>(reader: &mut R, dest: &mut Vec<u8>, cap: usize) -> bool {
    let mut buf = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if dest.len() < cap {
                    let remaining = cap - dest.len();
                    dest.extend_from_slice(&buf[..n.min(remaining)]);
                    if n > remaining {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    truncated
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let result = execute("echo one", ".", Duration::from_secs(5), 1024 * 1024)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "one\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_as_failure() {
        let result = execute("exit 7", ".", Duration::from_secs(5), 1024 * 1024)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(7));
        assert!(result.error_message.unwrap().contains('7'));
    }

    #[tokio::test]
    async fn timeout_kills_child_and_errors() {
        let err = execute("sleep 5", ".", Duration::from_millis(100), 1024 * 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(_)));
    }

    #[tokio::test]
    async fn output_is_truncated_past_cap() {
        let result = execute("yes x | head -c 200", ".", Duration::from_secs(5), 50)
            .await
            .unwrap();
        assert!(result.output.contains("truncated"));
    }

    #[tokio::test]
    async fn unknown_binary_is_spawn_error() {
        let err = execute(
            "this-binary-does-not-exist-xyz",
            ".",
            Duration::from_secs(5),
            1024,
        )
        .await;
        // `sh -c` itself spawns fine; the *shell* reports the missing
        // binary as a non-zero exit, not a spawn failure.
        assert!(err.is_ok());
        assert!(!err.unwrap().success);
    }
}
