//! Per-call exec session

use super::{ClusterProvider, CommandOutput, CommandRunner, ExecRequest, SessionTarget};
use crate::error::{ProviderError, SessionError};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Runs every command as its own remote exec call
///
/// The resolved pod name is cached. When a call reports the pod as missing
/// the name is re-resolved from the prefix, but the failed call is not
/// retried: it still returns its error and only the next call benefits.
pub struct ContainerSession {
    provider: Arc<dyn ClusterProvider>,
    target: SessionTarget,
    pod_name: RwLock<String>,
}

impl ContainerSession {
    /// Resolve the pod name from the target's prefix and build a session
    pub async fn connect(
        provider: Arc<dyn ClusterProvider>,
        target: SessionTarget,
    ) -> Result<Self, SessionError> {
        let pod_name = provider
            .find_pod_name(&target.namespace, &target.pod_prefix)
            .await
            .map_err(|e| {
                SessionError::SessionSetupFailed(format!(
                    "could not resolve pod with prefix {} in {}: {}",
                    target.pod_prefix, target.namespace, e
                ))
            })?;

        debug!(
            namespace = %target.namespace,
            pod = %pod_name,
            container = %target.container,
            "Resolved container session"
        );

        Ok(Self {
            provider,
            target,
            pod_name: RwLock::new(pod_name),
        })
    }

    /// Build a session for a pod whose exact name is already known
    pub fn for_pod(
        provider: Arc<dyn ClusterProvider>,
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        let pod_name = pod_name.into();
        Self {
            provider,
            target: SessionTarget::new(namespace, pod_name.clone(), container),
            pod_name: RwLock::new(pod_name),
        }
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn pod_name(&self) -> String {
        match self.pod_name.read() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-resolve the pod name from the stored prefix
    pub async fn refresh(&self) -> Result<(), ProviderError> {
        let new_name = self
            .provider
            .find_pod_name(&self.target.namespace, &self.target.pod_prefix)
            .await?;
        match self.pod_name.write() {
            Ok(mut name) => *name = new_name,
            Err(poisoned) => *poisoned.into_inner() = new_name,
        }
        Ok(())
    }

    async fn exec_command(
        &self,
        command: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, SessionError> {
        let pod_name = self.pod_name();
        debug!(
            namespace = %self.target.namespace,
            pod = %pod_name,
            container = %self.target.container,
            cmd = %command.join(" "),
            "Executing command"
        );

        let request = ExecRequest {
            namespace: self.target.namespace.clone(),
            pod: pod_name.clone(),
            container: self.target.container.clone(),
            command: command.to_vec(),
            stdin: stdin.map(|input| input.as_bytes().to_vec()),
        };

        match self.provider.exec(request).await {
            Ok(output) => Ok(output),
            Err(err) => {
                if err.is_not_found() {
                    debug!(
                        pod = %pod_name,
                        "Pod was not found, likely restarted so refreshing session"
                    );
                    if let Err(refresh_err) = self.refresh().await {
                        debug!(error = %refresh_err, "Failed to refresh container session");
                    }
                    return Err(SessionError::TargetNotFound(pod_name));
                }

                debug!(
                    error = %err,
                    command = ?command,
                    stdin = ?stdin,
                    "Remote command failed"
                );
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ContainerSession {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::argv;
    use crate::testutils::MockProvider;

    fn target() -> SessionTarget {
        SessionTarget::new("TestNamespace", "Test", "TestContainer")
    }

    #[tokio::test]
    async fn test_connect_to_missing_pod_fails() {
        let provider = Arc::new(MockProvider::with_pods("TestNamespace", &["NotATestPod-3989"]));

        let result = ContainerSession::connect(provider, target()).await;

        assert!(matches!(result, Err(SessionError::SessionSetupFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_resolves_prefix() {
        let provider = Arc::new(MockProvider::with_pods(
            "TestNamespace",
            &["NotATestPod-3989", "TestPod-8292"],
        ));

        let session = ContainerSession::connect(provider, target()).await.unwrap();

        assert_eq!(session.target().namespace, "TestNamespace");
        assert_eq!(session.target().container, "TestContainer");
        assert_eq!(session.pod_name(), "TestPod-8292");
    }

    #[tokio::test]
    async fn test_run_returns_std_buffers() {
        let provider = Arc::new(MockProvider::with_pods("TestNamespace", &["TestPod-8292"]));
        provider.respond_with(|_| {
            Ok(CommandOutput::new(
                "my test command stdout",
                "my test command stderr",
            ))
        });

        let session = ContainerSession::connect(provider.clone(), target())
            .await
            .unwrap();
        let output = session.run(&argv(&["my", "test", "command"])).await.unwrap();

        assert_eq!(output.stdout, "my test command stdout");
        assert_eq!(output.stderr, "my test command stderr");

        let requests = provider.exec_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].pod, "TestPod-8292");
        assert_eq!(requests[0].container, "TestContainer");
        assert!(requests[0].stdin.is_none());
    }

    #[tokio::test]
    async fn test_run_with_input_passes_stdin() {
        let provider = Arc::new(MockProvider::with_pods("TestNamespace", &["TestPod-8292"]));
        provider.respond_with(|req| {
            let input = String::from_utf8(req.stdin.clone().unwrap_or_default()).unwrap();
            Ok(CommandOutput::new(input, ""))
        });

        let session = ContainerSession::connect(provider, target()).await.unwrap();
        let output = session
            .run_with_input(&argv(&["/usr/bin/sh"]), "echo hi")
            .await
            .unwrap();

        assert_eq!(output.stdout, "echo hi");
    }

    #[tokio::test]
    async fn test_stream_failure_is_returned() {
        let provider = Arc::new(MockProvider::with_pods("TestNamespace", &["TestPod-8292"]));
        provider.respond_with(|_| {
            Err(ProviderError::Stream(
                "Something went horribly wrong with the stream".into(),
            ))
        });

        let session = ContainerSession::connect(provider, target()).await.unwrap();
        let result = session.run(&argv(&["my", "test", "command"])).await;

        match result {
            Err(SessionError::StreamFailed(msg)) => assert!(msg.contains("horribly wrong")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_refreshes_without_retry() {
        let provider = Arc::new(MockProvider::with_pods("TestNamespace", &["TestPod-8292"]));
        provider.respond_with(|req| {
            if req.pod == "TestPod-8292" {
                Err(ProviderError::NotFound(req.pod.clone()))
            } else {
                Ok(CommandOutput::new("ok", ""))
            }
        });

        let session = ContainerSession::connect(provider.clone(), target())
            .await
            .unwrap();

        // The pod restarts under a new name
        provider.set_pods("TestNamespace", &["TestPod-0001"]);

        let first = session.run(&argv(&["date"])).await;
        assert!(matches!(first, Err(SessionError::TargetNotFound(_))));
        assert_eq!(session.pod_name(), "TestPod-0001");
        // The failing call was not retried
        assert_eq!(provider.exec_requests().len(), 1);

        let second = session.run(&argv(&["date"])).await.unwrap();
        assert_eq!(second.stdout, "ok");
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let provider = Arc::new(MockProvider::with_pods(
            "TestNamespace",
            &["Other-1", "TestPod-8292", "TestPod-9999"],
        ));
        let session = ContainerSession::connect(provider, target()).await.unwrap();

        for _ in 0..5 {
            session.refresh().await.unwrap();
            assert_eq!(session.pod_name(), "TestPod-8292");
            assert!(session.pod_name().starts_with(&session.target().pod_prefix));
        }
    }
}
