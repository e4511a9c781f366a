//! Persistent multiplexed shell session
//!
//! One interactive shell is opened per session. Two background tasks cooperate:
//! - a stream pump relaying raw shell output into a channel
//! - a serializer that owns the shell's stdin, takes one request at a time
//!   from a bounded queue, writes it, and reads output until the prompt shows up
//!
//! Callers only hold the queue's sender, so commands run strictly in
//! submission order and never overlap.

use super::{ClusterProvider, CommandOutput, CommandRunner, SessionTarget, SHELL_COMMAND};
use crate::error::SessionError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Prompt printed by `sh` running as root, e.g. `sh-4.4# `
pub const DEFAULT_PROMPT_PATTERN: &str = r"sh-\d\.\d#\s*$";

const PUMP_BUFFER_SIZE: usize = 4096;

/// Configuration for a persistent session
#[derive(Debug, Clone)]
pub struct PersistentSessionConfig {
    /// Shell to start in the container
    pub shell: String,
    /// Pattern that marks the end of a command's output
    pub prompt_pattern: String,
    /// How long a single command may take before it is abandoned
    pub command_timeout: Duration,
    /// Capacity of the request queue
    pub queue_capacity: usize,
    /// Line sent to the shell on close
    pub exit_command: String,
}

impl Default for PersistentSessionConfig {
    fn default() -> Self {
        Self {
            shell: SHELL_COMMAND.to_string(),
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            command_timeout: Duration::from_secs(60),
            queue_capacity: 10,
            exit_command: "exit".to_string(),
        }
    }
}

enum ShellRequest {
    Run {
        command: String,
        reply: oneshot::Sender<Result<CommandOutput, SessionError>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Shell session shared by all commands of one collector
pub struct PersistentSession {
    target: SessionTarget,
    pod_name: Arc<RwLock<String>>,
    requests: mpsc::Sender<ShellRequest>,
}

impl PersistentSession {
    /// Resolve the pod, open the shell and wait for its first prompt
    pub async fn open(
        provider: Arc<dyn ClusterProvider>,
        target: SessionTarget,
        config: PersistentSessionConfig,
    ) -> Result<Self, SessionError> {
        let prompt = Regex::new(&config.prompt_pattern).map_err(|e| {
            SessionError::SessionSetupFailed(format!("invalid prompt pattern: {}", e))
        })?;

        let pod_name = Arc::new(RwLock::new(String::new()));
        let mut worker = ShellWorker {
            provider,
            target: target.clone(),
            shell: config.shell,
            pod_name: pod_name.clone(),
            connection: None,
            pending: String::new(),
            stderr: Arc::new(Mutex::new(String::new())),
            prompt,
            command_timeout: config.command_timeout,
            exit_command: config.exit_command,
            resync: false,
        };
        worker.connect().await?;

        let (requests, request_rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(worker.serve(request_rx));

        Ok(Self {
            target,
            pod_name,
            requests,
        })
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Pod the shell currently runs in; changes when the shell is reopened
    pub fn pod_name(&self) -> String {
        match self.pod_name.read() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn dispatch(&self, command: String) -> Result<CommandOutput, SessionError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(ShellRequest::Run { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Ask the serializer to exit the shell and wait until its output is drained
    ///
    /// Requests queued before the close still run first.
    pub async fn close(&self) -> Result<(), SessionError> {
        let (done, finished) = oneshot::channel();
        self.requests
            .send(ShellRequest::Close { done })
            .await
            .map_err(|_| SessionError::Closed)?;
        finished.await.map_err(|_| SessionError::Closed)
    }
}

#[async_trait]
impl CommandRunner for PersistentSession {
    async fn run(&self, command: &[String]) -> Result<CommandOutput, SessionError> {
        self.dispatch(command.join(" ")).await
    }

    /// The shell is already running, so the input itself is the command line
    async fn run_with_input(
        &self,
        _command: &[String],
        input: &str,
    ) -> Result<CommandOutput, SessionError> {
        self.dispatch(input.trim_end().to_string()).await
    }
}

/// Streams of one opened shell
struct ShellConnection {
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    output: mpsc::Receiver<String>,
    stdout_pump: JoinHandle<()>,
    stderr_pump: Option<JoinHandle<()>>,
}

/// Owner of the shell connection; reopens it after the stream is lost
struct ShellWorker {
    provider: Arc<dyn ClusterProvider>,
    target: SessionTarget,
    shell: String,
    pod_name: Arc<RwLock<String>>,
    /// `None` once the stream failed; the next request reopens the shell
    connection: Option<ShellConnection>,
    /// Output received but not yet attributed to a command
    pending: String,
    stderr: Arc<Mutex<String>>,
    prompt: Regex,
    command_timeout: Duration,
    exit_command: String,
    /// A timed out command may still be running and owns the next prompt
    resync: bool,
}

impl ShellWorker {
    async fn serve(mut self, mut requests: mpsc::Receiver<ShellRequest>) {
        while let Some(request) = requests.recv().await {
            match request {
                ShellRequest::Run { command, reply } => {
                    let result = self.execute(&command).await;
                    // The caller may have given up waiting
                    let _ = reply.send(result);
                }
                ShellRequest::Close { done } => {
                    self.shutdown().await;
                    let _ = done.send(());
                    return;
                }
            }
        }
        // Every session handle was dropped without an explicit close
        self.shutdown().await;
    }

    /// Resolve the pod from the prefix, open a shell and wait for its prompt
    async fn connect(&mut self) -> Result<(), SessionError> {
        let pod_name = self
            .provider
            .find_pod_name(&self.target.namespace, &self.target.pod_prefix)
            .await
            .map_err(|e| SessionError::SessionSetupFailed(e.to_string()))?;

        debug!(
            namespace = %self.target.namespace,
            pod = %pod_name,
            container = %self.target.container,
            shell = %self.shell,
            "Opening persistent shell"
        );

        let streams = self
            .provider
            .open_shell(
                &self.target.namespace,
                &pod_name,
                &self.target.container,
                &self.shell,
            )
            .await
            .map_err(|e| SessionError::SessionSetupFailed(e.to_string()))?;

        let (output_tx, output) = mpsc::channel(64);
        let stdout_pump = tokio::spawn(pump_stdout(streams.stdout, output_tx));
        let stderr_pump = streams
            .stderr
            .map(|stderr| tokio::spawn(pump_stderr(stderr, self.stderr.clone())));

        self.connection = Some(ShellConnection {
            stdin: streams.stdin,
            output,
            stdout_pump,
            stderr_pump,
        });
        self.pending.clear();
        self.resync = false;

        if let Err(e) = self.read_until_prompt().await {
            self.shutdown().await;
            return Err(SessionError::SessionSetupFailed(format!(
                "shell did not present a prompt: {}",
                e
            )));
        }

        match self.pod_name.write() {
            Ok(mut name) => *name = pod_name,
            Err(poisoned) => *poisoned.into_inner() = pod_name,
        }
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> Result<CommandOutput, SessionError> {
        if self.connection.is_none() {
            info!(
                namespace = %self.target.namespace,
                prefix = %self.target.pod_prefix,
                "Reopening persistent shell"
            );
            self.connect().await?;
        }

        if self.resync {
            // Wait out the abandoned command before writing anything new
            let late = self.read_until_prompt().await.map_err(|e| self.on_failure(e))?;
            debug!(output = %late, "Discarding output of timed out command");
            self.resync = false;
        }

        // Anything left over belongs to no command
        if let Some(connection) = self.connection.as_mut() {
            while let Ok(stale) = connection.output.try_recv() {
                self.pending.push_str(&stale);
            }
        }
        if !self.pending.is_empty() {
            debug!(output = %self.pending, "Discarding unattributed shell output");
            self.pending.clear();
        }

        self.send_line(command).await.map_err(|e| self.on_failure(e))?;
        let raw = self.read_until_prompt().await.map_err(|e| self.on_failure(e))?;
        let stdout = strip_echo(&raw, command);
        let stderr = take_buffer(&self.stderr);

        Ok(CommandOutput { stdout, stderr })
    }

    /// Record what a failed read or write means for the next request
    fn on_failure(&mut self, err: SessionError) -> SessionError {
        match &err {
            SessionError::Timeout(_) => self.resync = true,
            SessionError::StreamFailed(_) => {
                warn!(error = %err, "Persistent shell lost, reopening on next request");
                if let Some(connection) = self.connection.take() {
                    connection.stdout_pump.abort();
                    if let Some(pump) = connection.stderr_pump {
                        pump.abort();
                    }
                }
                self.pending.clear();
                self.resync = false;
            }
            _ => {}
        }
        err
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let connection = self.connection.as_mut().ok_or(SessionError::Closed)?;
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        connection
            .stdin
            .write_all(&bytes)
            .await
            .map_err(|e| SessionError::StreamFailed(e.to_string()))?;
        connection
            .stdin
            .flush()
            .await
            .map_err(|e| SessionError::StreamFailed(e.to_string()))
    }

    /// Accumulate output until the prompt appears, returning what preceded it
    async fn read_until_prompt(&mut self) -> Result<String, SessionError> {
        let deadline = Instant::now() + self.command_timeout;
        let connection = self.connection.as_mut().ok_or(SessionError::Closed)?;
        loop {
            let bounds = self.prompt.find(&self.pending).map(|m| (m.start(), m.end()));
            if let Some((start, end)) = bounds {
                let before = self.pending[..start].to_string();
                self.pending.drain(..end);
                return Ok(before);
            }

            match timeout_at(deadline, connection.output.recv()).await {
                Ok(Some(chunk)) => self.pending.push_str(&chunk),
                Ok(None) => {
                    return Err(SessionError::StreamFailed(
                        "shell output closed before prompt".to_string(),
                    ))
                }
                Err(_) => return Err(SessionError::Timeout(self.command_timeout)),
            }
        }
    }

    /// Exit the shell, then wait for the pumps so no output is lost
    async fn shutdown(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        let mut exit_line = self.exit_command.as_bytes().to_vec();
        exit_line.push(b'\n');
        if let Err(e) = connection.stdin.write_all(&exit_line).await {
            debug!(error = %e, "Failed to send exit to shell");
        }
        if let Err(e) = connection.stdin.shutdown().await {
            debug!(error = %e, "Failed to close shell stdin");
        }

        // Keep draining so the pump is never blocked on a full channel
        while let Some(chunk) = connection.output.recv().await {
            self.pending.push_str(&chunk);
        }
        if !self.pending.is_empty() {
            debug!(output = %self.pending, "Shell output after exit");
            self.pending.clear();
        }

        for pump in std::iter::once(connection.stdout_pump).chain(connection.stderr_pump) {
            if let Err(e) = pump.await {
                error!(error = %e, "Shell stream pump panicked");
            }
        }
    }
}

async fn pump_stdout(mut stdout: Box<dyn AsyncRead + Send + Unpin>, output: mpsc::Sender<String>) {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if output.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Shell output stream failed");
                break;
            }
        }
    }
}

async fn pump_stderr(mut stderr: Box<dyn AsyncRead + Send + Unpin>, sink: Arc<Mutex<String>>) {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                match sink.lock() {
                    Ok(mut sink) => sink.push_str(&chunk),
                    Err(poisoned) => poisoned.into_inner().push_str(&chunk),
                }
            }
            Err(e) => {
                warn!(error = %e, "Shell error stream failed");
                break;
            }
        }
    }
}

fn take_buffer(buffer: &Mutex<String>) -> String {
    match buffer.lock() {
        Ok(mut buffer) => std::mem::take(&mut *buffer),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

/// Normalize TTY line endings and drop the echoed command line
fn strip_echo(raw: &str, command: &str) -> String {
    let normalized = raw.replace("\r\n", "\n");
    match normalized.split_once('\n') {
        Some((first, rest)) if first.trim_end() == command.trim_end() => rest.to_string(),
        _ if normalized.trim_end() == command.trim_end() => String::new(),
        _ => normalized,
    }
}
