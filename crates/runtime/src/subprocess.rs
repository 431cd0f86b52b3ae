use std::process::Stdio;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("failed to spawn {tool}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exceeded its {deadline:?} deadline")]
    Deadline { tool: String, deadline: Duration },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Run an external tool with a deadline and captured stderr. The child is
/// killed if the deadline passes.
pub async fn run_with_deadline(
    mut command: tokio::process::Command,
    tool: &str,
    deadline: Duration,
) -> Result<Vec<u8>, SubprocessError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| SubprocessError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(SubprocessError::Spawn {
                tool: tool.to_string(),
                source,
            })
        }
        Err(_elapsed) => {
            return Err(SubprocessError::Deadline {
                tool: tool.to_string(),
                deadline,
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Keep the tail: tools tend to print the actual error last.
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SubprocessError::Failed {
            tool: tool.to_string(),
            status: output.status,
            stderr: tail,
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg("echo ok");
        let stdout = run_with_deadline(command, "sh", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&stdout).trim(), "ok");
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg("echo boom >&2; exit 3");
        let err = run_with_deadline(command, "sh", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            SubprocessError::Failed { stderr, .. } => assert!(stderr.contains("boom")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_kills() {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg("sleep 30");
        let err = run_with_deadline(command, "sh", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SubprocessError::Deadline { .. }));
    }
}
