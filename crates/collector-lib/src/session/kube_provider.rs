//! Kubernetes-backed cluster provider

use super::{
    first_with_prefix, ClusterProvider, CommandOutput, ExecRequest, PodPhase, ShellStreams,
    VolumeSource, WorkloadSpec,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, HostPathVolumeSource, Pod, PodSpec, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

/// [`ClusterProvider`] talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeProvider {
    client: Client,
}

impl KubeProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or the default chain
    /// (in-cluster config, then `$KUBECONFIG`, then `~/.kube/config`)
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ProviderError> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ProviderError::Connect(e.to_string()))?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| ProviderError::Connect(e.to_string()))?;
                Client::try_from(config).map_err(|e| ProviderError::Connect(e.to_string()))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| ProviderError::Connect(e.to_string()))?,
        };

        info!(kubeconfig = ?kubeconfig, "Kubernetes client initialized");
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterProvider for KubeProvider {
    async fn find_pod_name(&self, namespace: &str, prefix: &str) -> Result<String, ProviderError> {
        let names = self.list_pod_names(namespace).await?;
        first_with_prefix(&names, prefix).ok_or_else(|| {
            ProviderError::NotFound(format!(
                "no pod with prefix {} in namespace {}",
                prefix, namespace
            ))
        })
    }

    async fn exec(&self, request: ExecRequest) -> Result<CommandOutput, ProviderError> {
        let params = AttachParams::default()
            .container(request.container.clone())
            .stdin(request.stdin.is_some())
            .stdout(true)
            .stderr(true)
            .tty(false);

        let mut attached = self
            .pods(&request.namespace)
            .exec(&request.pod, request.command.clone(), &params)
            .await
            .map_err(|e| match ProviderError::from(e) {
                ProviderError::Api(msg) => ProviderError::Connect(msg),
                other => other,
            })?;

        if let (Some(input), Some(mut stdin)) = (request.stdin.as_ref(), attached.stdin()) {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let status = attached.take_status();

        let read_stdout = async {
            if let Some(mut reader) = stdout_reader {
                reader.read_to_end(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stderr = async {
            if let Some(mut reader) = stderr_reader {
                reader.read_to_end(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out_result, err_result) = tokio::join!(read_stdout, read_stderr);
        out_result?;
        err_result?;

        let failure = match status {
            Some(status) => status.await.and_then(|status| {
                if status.status.as_deref() == Some("Failure") {
                    Some(status.message.unwrap_or_else(|| "command failed".to_string()))
                } else {
                    None
                }
            }),
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| ProviderError::Stream(e.to_string()))?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };

        match failure {
            Some(message) => {
                debug!(
                    stdout = %output.stdout,
                    stderr = %output.stderr,
                    "Remote command reported failure"
                );
                Err(ProviderError::Stream(message))
            }
            None => Ok(output),
        }
    }

    async fn open_shell(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        shell: &str,
    ) -> Result<ShellStreams, ProviderError> {
        let params = AttachParams::interactive_tty().container(container);
        let mut attached = self
            .pods(namespace)
            .exec(pod, vec![shell.to_string()], &params)
            .await?;

        let stdin = attached
            .stdin()
            .ok_or_else(|| ProviderError::Connect("shell has no stdin".to_string()))?;
        let stdout = attached
            .stdout()
            .ok_or_else(|| ProviderError::Connect("shell has no stdout".to_string()))?;

        let pod_name = pod.to_string();
        tokio::spawn(async move {
            if let Err(e) = attached.join().await {
                error!(pod = %pod_name, error = %e, "Shell stream terminated with error");
            }
        });

        Ok(ShellStreams {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: None,
        })
    }

    async fn create_pod(&self, spec: &WorkloadSpec) -> Result<(), ProviderError> {
        let pod = build_pod(spec);
        self.pods(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await?;
        debug!(namespace = %spec.namespace, pod = %spec.name, "Created pod");
        Ok(())
    }

    async fn pod_phase(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodPhase>, ProviderError> {
        let params = ListParams::default().fields(&format!("metadata.name={}", name));
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods.items.into_iter().next().map(|pod| {
            pod.status
                .and_then(|status| status.phase)
                .map(|phase| PodPhase::parse(&phase))
                .unwrap_or(PodPhase::Unknown)
        }))
    }

    async fn list_pod_names(&self, namespace: &str) -> Result<Vec<String>, ProviderError> {
        let pods = self.pods(namespace).list(&ListParams::default()).await?;
        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ProviderError> {
        self.pods(namespace)
            .delete(name, &DeleteParams::foreground())
            .await?;
        Ok(())
    }
}

/// Translate a workload description into a Pod object
fn build_pod(spec: &WorkloadSpec) -> Pod {
    let volumes: Vec<Volume> = spec
        .volumes
        .iter()
        .map(|volume| match &volume.source {
            VolumeSource::HostPath(path) => Volume {
                name: volume.name.clone(),
                host_path: Some(HostPathVolumeSource {
                    path: path.clone(),
                    type_: None,
                }),
                ..Default::default()
            },
            VolumeSource::EmptyDir => Volume {
                name: volume.name.clone(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        })
        .collect();

    let mounts: Vec<VolumeMount> = spec
        .volumes
        .iter()
        .map(|volume| VolumeMount {
            name: volume.name.clone(),
            mount_path: volume.mount_path.clone(),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: spec.container.clone(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: (!spec.command.is_empty()).then(|| spec.command.clone()),
        security_context: spec.privileged.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: (!spec.labels.is_empty()).then(|| spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            host_network: Some(spec.host_network),
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}
