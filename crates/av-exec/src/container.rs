use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use av_model::{
    BackendConnectionError, ExecDetails, ModuleDescriptor, ModuleExecutionError, ModuleTimeoutError,
    SuccessStrategy,
};
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::Docker;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::ExecutionBackend;

/// Drives STANDALONE modules: build an image from the module's directory, run it detached with
/// resolved params as environment variables, wait on it, and always clean the container up.
pub struct ContainerBackend {
    docker: Docker,
    built_images: Mutex<HashSet<String>>,
}

impl ContainerBackend {
    pub fn connect() -> Result<Self, BackendConnectionError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| BackendConnectionError::Docker(e.to_string()))?;
        Ok(Self {
            docker,
            built_images: Mutex::new(HashSet::new()),
        })
    }

    /// Packs the module directory as a tar build context and builds an image tagged
    /// `lower(name)`, recording it for later cleanup (§4.3).
    async fn build_image(&self, descriptor: &ModuleDescriptor) -> Result<String, ModuleExecutionError> {
        let tag = descriptor.name.to_lowercase();
        let context_dir = descriptor
            .path
            .as_deref()
            .ok_or_else(|| ModuleExecutionError::Backend("standalone module has no build path".into()))?;

        let tarball = build_context_tarball(Path::new(context_dir))
            .map_err(|e| ModuleExecutionError::Backend(format!("failed to pack build context: {e}")))?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag.as_str(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tarball.into()));
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(info) => {
                    if let Some(err) = info.error {
                        return Err(ModuleExecutionError::Backend(format!("image build failed: {err}")));
                    }
                }
                Err(e) => return Err(ModuleExecutionError::Backend(format!("image build failed: {e}"))),
            }
        }

        self.built_images.lock().insert(tag.clone());
        Ok(tag)
    }

    /// Removes every image this backend has built; called on shutdown (§5 cancellation).
    pub async fn shutdown(&self) {
        let images: Vec<String> = self.built_images.lock().drain().collect();
        for image in images {
            if let Err(e) = self
                .docker
                .remove_image(&image, Some(RemoveImageOptions { force: true, ..Default::default() }), None)
                .await
            {
                warn!(image = %image, error = %e, "failed to remove tracked image on shutdown");
            }
        }
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        params: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecDetails, ModuleExecutionError> {
        let build_budget = timeout / 2;

        // §4.3: half the total budget is reserved for build+cleanup; the wait on the
        // running container below gets the full budget separately.
        let image = tokio::time::timeout(build_budget, self.build_image(descriptor))
            .await
            .map_err(|_| ModuleExecutionError::Timeout(ModuleTimeoutError))??;
        let env: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(std::iter::once(format!("TIMEOUT={}", build_budget.as_secs())))
            .collect();

        let port_bindings = params.get("LPORT").map(|lport| {
            let mut map = std::collections::HashMap::new();
            map.insert(
                format!("{lport}/tcp"),
                Some(vec![bollard::models::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(lport.clone()),
                }]),
            );
            map
        });

        let host_config = bollard::models::HostConfig {
            port_bindings,
            ..Default::default()
        };

        let container_config = ContainerConfig {
            image: Some(image.as_str()),
            env: Some(env.iter().map(String::as_str).collect()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container_name = format!("avr-{}", uuid::Uuid::new_v4());
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| ModuleExecutionError::Backend(format!("create_container failed: {e}")))?;

        let result = self.run_and_wait(&created.id, descriptor, timeout).await;

        // Always stop+remove, regardless of the run outcome.
        let _ = self.docker.remove_container(
            &created.id,
            Some(RemoveContainerOptions { force: true, ..Default::default() }),
        ).await;

        result
    }
}

impl ContainerBackend {
    async fn run_and_wait(
        &self,
        container_id: &str,
        descriptor: &ModuleDescriptor,
        timeout: Duration,
    ) -> Result<ExecDetails, ModuleExecutionError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ModuleExecutionError::Backend(format!("start_container failed: {e}")))?;

        let wait_future = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>)
            .collect::<Vec<_>>();

        let waited = tokio::time::timeout(timeout, wait_future)
            .await
            .map_err(|_| ModuleExecutionError::Timeout(ModuleTimeoutError))?;

        let exit_code = waited
            .into_iter()
            .find_map(|r| r.ok())
            .map(|w| w.status_code)
            .unwrap_or(-1);

        let output = self.collect_logs(container_id).await;

        debug!(container = %container_id, exit_code, "container finished");

        let uses_exit_code = descriptor
            .success
            .iter()
            .any(|c| c.strategy == SuccessStrategy::ExitCode);

        if exit_code != 0 && !uses_exit_code {
            return Err(ModuleExecutionError::NonZeroExit(exit_code));
        }

        let mut details = ExecDetails::new(descriptor.name.clone(), "container");
        details.output = Some(output);
        details.exit_code = Some(exit_code);
        Ok(details)
    }

    async fn collect_logs(&self, container_id: &str) -> String {
        use bollard::container::LogsOptions;
        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            if let Ok(log) = chunk {
                out.push_str(&log.to_string());
            }
        }
        out
    }
}

fn build_context_tarball(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        builder.append_dir_all(".", dir)?;
        builder.finish()?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_directory_into_nonempty_tarball() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let tarball = build_context_tarball(dir.path()).unwrap();
        assert!(!tarball.is_empty());
    }
}
