//! Local exec session for running against the current machine
//!
//! Commands run either as host processes or, when a container is set,
//! through `podman exec` inside a locally managed container.

use super::{CommandOutput, CommandRunner};
use crate::error::SessionError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const PODMAN: &str = "podman";

/// Container run with podman on the local machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalContainer {
    pub name: String,
    pub image: String,
    pub privileged: bool,
}

impl LocalContainer {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            privileged: false,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Arguments starting the container detached with a TTY on the host network
    pub fn start_args(&self) -> Vec<String> {
        let mut args = vec![
            PODMAN.to_string(),
            "run".to_string(),
            "--detach".to_string(),
            "--tty".to_string(),
            "--network=host".to_string(),
            format!("--name={}", self.name),
        ];
        if self.privileged {
            args.push("--privileged".to_string());
        }
        args.push(self.image.clone());
        args
    }

    pub fn stop_args(&self) -> Vec<String> {
        vec![PODMAN.to_string(), "stop".to_string(), self.name.clone()]
    }

    /// Pull the image if needed and start the container
    pub async fn start(&self) -> Result<(), SessionError> {
        debug!(container = %self.name, image = %self.image, "Starting local container");
        LocalSession::new()
            .run(&self.start_args())
            .await
            .map_err(|e| SessionError::SessionSetupFailed(e.to_string()))?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        debug!(container = %self.name, "Stopping local container");
        LocalSession::new().run(&self.stop_args()).await?;
        Ok(())
    }
}

/// Runs commands as child processes of the collector
#[derive(Debug, Clone, Default)]
pub struct LocalSession {
    container: Option<LocalContainer>,
}

impl LocalSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session running every command inside `container`
    pub fn in_container(container: LocalContainer) -> Self {
        Self {
            container: Some(container),
        }
    }

    pub fn container(&self) -> Option<&LocalContainer> {
        self.container.as_ref()
    }

    /// Full argument list for `command`, wrapped in `podman exec` when containerized
    fn command_line(&self, command: &[String], with_stdin: bool) -> Vec<String> {
        match &self.container {
            Some(container) => {
                let mut line = vec![PODMAN.to_string(), "exec".to_string()];
                if with_stdin {
                    line.push("--interactive".to_string());
                }
                line.push(container.name.clone());
                line.extend_from_slice(command);
                line
            }
            None => command.to_vec(),
        }
    }

    async fn exec_command(
        &self,
        command: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, SessionError> {
        if command.is_empty() {
            return Err(SessionError::SessionSetupFailed("empty command".to_string()));
        }
        let command = self.command_line(command, stdin.is_some());
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SessionError::SessionSetupFailed("empty command".to_string()))?;

        debug!(cmd = %command.join(" "), "Executing local command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::SessionSetupFailed(format!("{}: {}", program, e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| SessionError::StreamFailed(e.to_string()))?;
            // Dropping the pipe sends EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SessionError::StreamFailed(e.to_string()))?;

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            debug!(
                status = %output.status,
                stdout = %captured.stdout,
                stderr = %captured.stderr,
                stdin = ?stdin,
                "Local command failed"
            );
            return Err(SessionError::StreamFailed(format!(
                "{} exited with {}",
                program, output.status
            )));
        }

        Ok(captured)
    }
}

#[async_trait]
impl CommandRunner for LocalSession {
    async fn run(&self, command: &[String]) -> Result<CommandOutput, SessionError> {
        self.exec_command(command, None).await
    }

    async fn run_with_input(
        &self,
        command: &[String],
        input: &str,
    ) -> Result<CommandOutput, SessionError> {
        self.exec_command(command, Some(input)).await
    }
}
