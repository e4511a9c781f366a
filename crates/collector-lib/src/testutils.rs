//! Test doubles shared by the unit tests
//!
//! `MockProvider` scripts a cluster: pod listings, exec responses, pod
//! phases, deletions and an in-memory interactive shell (`MockShell`).

use crate::callbacks::Callback;
use crate::error::{CallbackError, ProviderError};
use crate::session::{
    first_with_prefix, ClusterProvider, CommandOutput, ExecRequest, PodPhase, ShellStreams,
    WorkloadSpec,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const MOCK_PROMPT: &str = "sh-4.4# ";

type Responder = Box<dyn Fn(&ExecRequest) -> Result<CommandOutput, ProviderError> + Send + Sync>;

struct PendingDeletion {
    namespace: String,
    name: String,
    remaining_lists: usize,
}

/// Scripted cluster
#[derive(Default)]
pub struct MockProvider {
    pods: Mutex<HashMap<String, Vec<String>>>,
    phases: Mutex<HashMap<String, PodPhase>>,
    phase_script: Mutex<VecDeque<PodPhase>>,
    responder: Mutex<Option<Responder>>,
    exec_requests: Mutex<Vec<ExecRequest>>,
    shell: Mutex<Option<MockShell>>,
    shell_opens: AtomicUsize,
    created: Mutex<Vec<WorkloadSpec>>,
    deletions: Mutex<Vec<PendingDeletion>>,
    delete_requests: Mutex<Vec<String>>,
    /// Number of listings a deleted pod keeps showing up in
    delete_linger: Mutex<usize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pods(namespace: &str, names: &[&str]) -> Self {
        let provider = Self::new();
        provider.set_pods(namespace, names);
        provider
    }

    pub fn set_pods(&self, namespace: &str, names: &[&str]) {
        let mut pods = self.pods.lock().unwrap();
        pods.insert(
            namespace.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&ExecRequest) -> Result<CommandOutput, ProviderError> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    pub fn exec_requests(&self) -> Vec<ExecRequest> {
        self.exec_requests.lock().unwrap().clone()
    }

    pub fn set_shell(&self, shell: MockShell) {
        *self.shell.lock().unwrap() = Some(shell);
    }

    pub fn shell_opens(&self) -> usize {
        self.shell_opens.load(Ordering::SeqCst)
    }

    pub fn set_phase(&self, name: &str, phase: PodPhase) {
        self.phases.lock().unwrap().insert(name.to_string(), phase);
    }

    /// Phases reported by successive `pod_phase` calls; the last one sticks
    pub fn script_phases(&self, phases: &[PodPhase]) {
        *self.phase_script.lock().unwrap() = phases.iter().copied().collect();
    }

    pub fn set_delete_linger(&self, listings: usize) {
        *self.delete_linger.lock().unwrap() = listings;
    }

    pub fn created(&self) -> Vec<WorkloadSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn delete_requests(&self) -> Vec<String> {
        self.delete_requests.lock().unwrap().clone()
    }

    fn pod_exists(&self, namespace: &str, name: &str) -> bool {
        self.pods
            .lock()
            .unwrap()
            .get(namespace)
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }

    fn remove_pod(&self, namespace: &str, name: &str) {
        if let Some(names) = self.pods.lock().unwrap().get_mut(namespace) {
            names.retain(|n| n != name);
        }
        self.phases.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl ClusterProvider for MockProvider {
    async fn find_pod_name(&self, namespace: &str, prefix: &str) -> Result<String, ProviderError> {
        let pods = self.pods.lock().unwrap();
        pods.get(namespace)
            .and_then(|names| first_with_prefix(names, prefix))
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}*", namespace, prefix)))
    }

    async fn exec(&self, request: ExecRequest) -> Result<CommandOutput, ProviderError> {
        self.exec_requests.lock().unwrap().push(request.clone());
        match self.responder.lock().unwrap().as_ref() {
            Some(responder) => responder(&request),
            None => Ok(CommandOutput::default()),
        }
    }

    async fn open_shell(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        _shell: &str,
    ) -> Result<ShellStreams, ProviderError> {
        let shell = self.shell.lock().unwrap().clone();
        self.shell_opens.fetch_add(1, Ordering::SeqCst);
        match shell {
            Some(shell) => Ok(shell.spawn()),
            None => Err(ProviderError::Connect("no shell scripted".to_string())),
        }
    }

    async fn create_pod(&self, spec: &WorkloadSpec) -> Result<(), ProviderError> {
        self.created.lock().unwrap().push(spec.clone());
        self.pods
            .lock()
            .unwrap()
            .entry(spec.namespace.clone())
            .or_default()
            .push(spec.name.clone());
        self.set_phase(&spec.name, PodPhase::Pending);
        Ok(())
    }

    async fn pod_phase(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodPhase>, ProviderError> {
        if !self.pod_exists(namespace, name) {
            return Ok(None);
        }
        let mut script = self.phase_script.lock().unwrap();
        if let Some(next) = script.pop_front() {
            if script.is_empty() {
                script.push_back(next);
            }
            self.set_phase(name, next);
        }
        Ok(Some(
            self.phases
                .lock()
                .unwrap()
                .get(name)
                .copied()
                .unwrap_or(PodPhase::Unknown),
        ))
    }

    async fn list_pod_names(&self, namespace: &str) -> Result<Vec<String>, ProviderError> {
        let finished: Vec<(String, String)> = {
            let mut deletions = self.deletions.lock().unwrap();
            for deletion in deletions.iter_mut() {
                deletion.remaining_lists = deletion.remaining_lists.saturating_sub(1);
            }
            let (done, pending): (Vec<_>, Vec<_>) = deletions
                .drain(..)
                .partition(|deletion| deletion.remaining_lists == 0);
            *deletions = pending;
            done.into_iter().map(|d| (d.namespace, d.name)).collect()
        };
        for (ns, name) in finished {
            self.remove_pod(&ns, &name);
        }

        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ProviderError> {
        self.delete_requests.lock().unwrap().push(name.to_string());
        if !self.pod_exists(namespace, name) {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        let linger = *self.delete_linger.lock().unwrap();
        if linger == 0 {
            self.remove_pod(namespace, name);
        } else {
            self.deletions.lock().unwrap().push(PendingDeletion {
                namespace: namespace.to_string(),
                name: name.to_string(),
                remaining_lists: linger,
            });
        }
        Ok(())
    }
}

type ShellResponder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// In-memory interactive shell speaking over duplex pipes
///
/// Echoes each received line like a TTY, prints the responder's output
/// and then the prompt. A `None` response prints nothing, not even the
/// prompt, simulating a hung command. A delayed command holds its output
/// back, and the crash command drops the output stream.
#[derive(Clone)]
pub struct MockShell {
    responder: ShellResponder,
    received: Arc<Mutex<Vec<String>>>,
    exited: Arc<AtomicBool>,
    delay: Option<(String, Duration)>,
    crash_on: Option<String>,
}

impl MockShell {
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            received: Arc::new(Mutex::new(Vec::new())),
            exited: Arc::new(AtomicBool::new(false)),
            delay: None,
            crash_on: None,
        }
    }

    /// Answer `command` only after `delay`
    pub fn with_delay(mut self, command: &str, delay: Duration) -> Self {
        self.delay = Some((command.to_string(), delay));
        self
    }

    /// Close the output stream when `command` arrives, like a restarted pod
    pub fn crashing_on(mut self, command: &str) -> Self {
        self.crash_on = Some(command.to_string());
        self
    }

    /// Answers `echo X` with `X` and anything else with no output
    pub fn echoing() -> Self {
        Self::with_responder(echo_response)
    }

    /// Like [`MockShell::echoing`] but never answers `command`
    pub fn silent_on(command: &str) -> Self {
        let silent = command.to_string();
        Self::with_responder(move |line| {
            if line == silent {
                None
            } else {
                echo_response(line)
            }
        })
    }

    pub fn received_lines(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn spawn(&self) -> ShellStreams {
        let (client_stdin, server_stdin) = tokio::io::duplex(4096);
        let (mut server_stdout, client_stdout) = tokio::io::duplex(4096);
        let shell = self.clone();

        tokio::spawn(async move {
            let _ = server_stdout.write_all(MOCK_PROMPT.as_bytes()).await;
            let mut lines = BufReader::new(server_stdin).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim_end().to_string();
                shell.received.lock().unwrap().push(line.clone());

                if line == "exit" {
                    shell.exited.store(true, Ordering::SeqCst);
                    let _ = server_stdout.write_all(b"exit\r\n").await;
                    break;
                }
                if shell.crash_on.as_deref() == Some(line.as_str()) {
                    break;
                }

                let _ = server_stdout
                    .write_all(format!("{}\r\n", line).as_bytes())
                    .await;
                if let Some((_, delay)) = shell.delay.as_ref().filter(|(c, _)| *c == line) {
                    tokio::time::sleep(*delay).await;
                }
                if let Some(output) = (shell.responder)(&line) {
                    let _ = server_stdout
                        .write_all(format!("{}{}", output, MOCK_PROMPT).as_bytes())
                        .await;
                }
            }
            // Dropping the writer ends the session's output stream
        });

        ShellStreams {
            stdin: Box::new(client_stdin),
            stdout: Box::new(client_stdout),
            stderr: None,
        }
    }
}

fn echo_response(line: &str) -> Option<String> {
    match line.strip_prefix("echo ") {
        Some(text) => Some(format!("{}\r\n", text)),
        None => Some(String::new()),
    }
}

/// Callback remembering every record, optionally failing for one key
#[derive(Default)]
pub struct RecordingCallback {
    records: Mutex<Vec<(String, String, String)>>,
    fail_key: Option<String>,
    cleaned: AtomicBool,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(key: &str) -> Self {
        Self {
            fail_key: Some(key.to_string()),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<(String, String, String)> {
        self.records.lock().unwrap().clone()
    }

    pub fn was_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Callback for RecordingCallback {
    async fn call(&self, collector: &str, key: &str, payload: &str) -> Result<(), CallbackError> {
        if self.fail_key.as_deref() == Some(key) {
            return Err(CallbackError::Write(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sink rejected record",
            )));
        }
        self.records.lock().unwrap().push((
            collector.to_string(),
            key.to_string(),
            payload.to_string(),
        ));
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CallbackError> {
        self.cleaned.store(true, Ordering::SeqCst);
        Ok(())
    }
}
