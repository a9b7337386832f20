//! 컨테이너 런타임 추상화
//!
//! [`ContainerRuntime`] trait은 테스트 하네스가 소비하는 런타임 연산
//! (네트워크, 볼륨, 이미지, 컨테이너 생성/시작/exec/로그/정지/삭제)을 추상화합니다.
//! 운영 코드는 [`BollardRuntime`]을, 테스트는 `MockRuntime`을 사용합니다.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐ ┌──────────┐ ┌────────────┐
//! │Provisioner │ │ Launcher │ │ LogWatcher │
//! └─────┬──────┘ └────┬─────┘ └─────┬──────┘
//!       └─────────────┼─────────────┘
//!                     ▼
//!           ┌──────────────────┐
//!           │ ContainerRuntime │ (trait)
//!           └──────────────────┘
//!                │         │
//!                ▼         ▼
//!          ┌─────────┐ ┌──────┐
//!          │ Bollard │ │ Mock │
//!          └────┬────┘ └──────┘
//!               ▼
//!         Docker Daemon
//! ```
//!
//! # Idempotent removal
//!
//! `remove_network`, `remove_volume`, `stop_container`, `remove_container`는
//! 대상이 이미 없거나 이미 정지된 경우 `Ok(())`를 반환합니다.
//!
//! # Examples
//!
//! ```ignore
//! use spire_testkit_runtime::BollardRuntime;
//!
//! let runtime = BollardRuntime::connect_local()?;
//! runtime.ping().await?;
//! # Ok::<(), spire_testkit_runtime::RuntimeError>(())
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    EndpointSettings, HostConfig, HostConfigCgroupnsModeEnum, Mount as DockerMount,
    MountTypeEnum,
};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use spire_testkit_core::error::ExecError;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::spec::{ContainerSpec, LogStream, MountSource, NamespaceMode};

/// exec 실행 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// 종료 코드
    pub exit_code: i64,
    /// 표준 출력
    pub stdout: String,
    /// 표준 에러
    pub stderr: String,
}

impl ExecResult {
    /// 종료 코드가 0이 아니면 [`ExecError::NonZeroExit`]로 변환합니다.
    pub fn ensure_success(self, name: &str, argv: &[String]) -> Result<Self, ExecError> {
        if self.exit_code == 0 {
            return Ok(self);
        }
        Err(ExecError::NonZeroExit {
            name: name.to_owned(),
            argv: argv.to_vec(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// 런타임이 돌려준 출력 프레임 하나
///
/// 프레임 경계는 라인 경계와 일치하지 않을 수 있습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    /// 출력 스트림
    pub stream: LogStream,
    /// 원시 바이트
    pub bytes: Vec<u8>,
}

impl LogChunk {
    /// stdout 프레임을 생성합니다.
    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: LogStream::Stdout,
            bytes: bytes.into(),
        }
    }

    /// stderr 프레임을 생성합니다.
    pub fn stderr(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: LogStream::Stderr,
            bytes: bytes.into(),
        }
    }
}

/// 컨테이너 런타임 연산 trait
///
/// `Send + Sync + 'static`이므로 `Arc`로 감싸 여러 태스크에서 공유할 수 있습니다.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// 런타임 연결을 확인합니다.
    fn ping(&self) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 이름과 레이블로 네트워크를 생성합니다.
    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 네트워크를 삭제합니다. 없으면 no-op.
    fn remove_network(&self, name: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 네트워크 존재 여부
    fn network_exists(&self, name: &str)
    -> impl Future<Output = Result<bool, RuntimeError>> + Send;

    /// 이름과 레이블로 볼륨을 생성합니다.
    fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 볼륨을 삭제합니다. 없으면 no-op.
    fn remove_volume(&self, name: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 볼륨 존재 여부
    fn volume_exists(&self, name: &str) -> impl Future<Output = Result<bool, RuntimeError>> + Send;

    /// 이미지가 로컬에 있는지 확인합니다.
    fn image_exists(&self, image: &str) -> impl Future<Output = Result<bool, RuntimeError>> + Send;

    /// 이미지를 pull 합니다.
    fn pull_image(&self, image: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 컨테이너를 생성하고 ID를 반환합니다. 시작하지는 않습니다.
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// 생성된 컨테이너를 시작합니다.
    fn start_container(&self, id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 실행 중인 컨테이너 안에서 명령을 실행하고 완료까지 기다립니다.
    fn exec(
        &self,
        id: &str,
        argv: &[String],
    ) -> impl Future<Output = Result<ExecResult, RuntimeError>> + Send;

    /// 컨테이너 시작 이후의 모든 출력 프레임을 순서대로 반환합니다.
    fn logs(&self, id: &str) -> impl Future<Output = Result<Vec<LogChunk>, RuntimeError>> + Send;

    /// 컨테이너가 실행 중인지 확인합니다. 없으면 `false`.
    fn is_running(&self, id: &str) -> impl Future<Output = Result<bool, RuntimeError>> + Send;

    /// 유예 시간을 두고 컨테이너를 정지합니다. 이미 정지했거나 없으면 no-op.
    fn stop_container(
        &self,
        id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// 컨테이너를 강제 삭제합니다. 없으면 no-op.
    fn remove_container(&self, id: &str)
    -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

/// `bollard` 기반 Docker 런타임
///
/// 내부적으로 `Arc<bollard::Docker>`를 사용합니다.
pub struct BollardRuntime {
    docker: Arc<bollard::Docker>,
}

impl BollardRuntime {
    /// 플랫폼 기본 소켓(`DOCKER_HOST` 또는 `/var/run/docker.sock`)으로 연결합니다.
    pub fn connect_local() -> Result<Self, RuntimeError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            RuntimeError::Connection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// 지정한 소켓 경로로 연결합니다.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, RuntimeError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    RuntimeError::Connection(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// 설정의 `docker_socket`에 따라 연결합니다. 비어 있으면 기본 소켓.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        if config.docker_socket.is_empty() {
            Self::connect_local()
        } else {
            Self::connect_with_socket(&config.docker_socket)
        }
    }
}

fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    status_code(err) == Some(404)
}

fn api_error(op: &str, target: &str, err: bollard::errors::Error) -> RuntimeError {
    if is_not_found(&err) {
        RuntimeError::NotFound(target.to_owned())
    } else {
        RuntimeError::Api(format!("{op} '{target}' failed: {err}"))
    }
}

/// [`ContainerSpec`]을 Docker 생성 요청으로 변환합니다.
pub(crate) fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mounts = spec
        .mounts
        .iter()
        .map(|mount| {
            let (typ, source) = match &mount.source {
                MountSource::Volume(name) => (MountTypeEnum::VOLUME, name.clone()),
                MountSource::Bind(path) => (MountTypeEnum::BIND, path.display().to_string()),
            };
            DockerMount {
                target: Some(mount.target.clone()),
                source: Some(source),
                typ: Some(typ),
                read_only: Some(mount.read_only),
                ..Default::default()
            }
        })
        .collect();

    let host_config = HostConfig {
        privileged: Some(spec.privileged),
        pid_mode: (spec.pid_mode == NamespaceMode::Host).then(|| "host".to_owned()),
        // private는 데몬 기본값에 맡김
        cgroupns_mode: (spec.cgroupns_mode == NamespaceMode::Host)
            .then_some(HostConfigCgroupnsModeEnum::HOST),
        network_mode: spec.network.clone(),
        mounts: Some(mounts),
        ..Default::default()
    };

    let networking_config = spec.network.as_ref().map(|network| NetworkingConfig {
        endpoints_config: HashMap::from([(
            network.clone(),
            EndpointSettings {
                aliases: (!spec.network_aliases.is_empty()).then(|| spec.network_aliases.clone()),
                ..Default::default()
            },
        )]),
    });

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
        labels: Some(spec.labels.clone().into_iter().collect()),
        entrypoint: spec.entrypoint.clone(),
        cmd: spec.command.clone(),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

fn log_chunk(output: LogOutput) -> Option<LogChunk> {
    match output {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            Some(LogChunk::stdout(message.to_vec()))
        }
        LogOutput::StdErr { message } => Some(LogChunk::stderr(message.to_vec())),
        LogOutput::StdIn { .. } => None,
    }
}

impl ContainerRuntime for BollardRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Connection(format!("ping failed: {e}")))?;
        Ok(())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let options = CreateNetworkOptions {
            name: name.to_owned(),
            labels: labels.clone().into_iter().collect(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| api_error("create network", name, e))?;
        debug!(network = name, "network created");
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error("remove network", name, e)),
        }
    }

    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error("inspect network", name, e)),
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let options = CreateVolumeOptions {
            name: name.to_owned(),
            labels: labels.clone().into_iter().collect(),
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map_err(|e| api_error("create volume", name, e))?;
        debug!(volume = name, "volume created");
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error("remove volume", name, e)),
        }
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error("inspect volume", name, e)),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error("inspect image", image, e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.to_owned(),
            ..Default::default()
        };
        let progress: Vec<_> = self
            .docker
            .create_image(Some(options), None, None)
            .try_collect()
            .await
            .map_err(|e| api_error("pull image", image, e))?;
        debug!(image, events = progress.len(), "image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| api_error("create container", &spec.name, e))?;
        for warning in &response.warnings {
            debug!(container = %spec.name, warning = %warning, "runtime warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| api_error("start container", id, e))
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecResult, RuntimeError> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(argv.to_vec()),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| api_error("create exec", id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| api_error("start exec", id, e))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(frame) = output.next().await {
                    let frame = frame.map_err(|e| api_error("read exec output", id, e))?;
                    if let Some(chunk) = log_chunk(frame) {
                        match chunk.stream {
                            LogStream::Stdout => stdout.extend_from_slice(&chunk.bytes),
                            LogStream::Stderr => stderr.extend_from_slice(&chunk.bytes),
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Api(format!(
                    "exec in '{id}' detached unexpectedly"
                )));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| api_error("inspect exec", id, e))?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn logs(&self, id: &str) -> Result<Vec<LogChunk>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_owned(),
            ..Default::default()
        };
        let frames: Vec<LogOutput> = self
            .docker
            .logs(id, Some(options))
            .try_collect()
            .await
            .map_err(|e| api_error("read logs", id, e))?;
        Ok(frames.into_iter().filter_map(log_chunk).collect())
    }

    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_container(id, None).await {
            Ok(details) => Ok(details
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error("inspect container", id, e)),
        }
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let t = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: 이미 정지됨, 404: 없음
            Err(e) if matches!(status_code(&e), Some(304) | Some(404)) => Ok(()),
            Err(e) => Err(api_error("stop container", id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error("remove container", id, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Mount;

    fn agent_spec() -> ContainerSpec {
        ContainerSpec {
            network: Some("example.com-net".to_owned()),
            network_aliases: vec!["spire-agent".to_owned()],
            mounts: vec![
                Mount::volume("example.com-vol", "/tmp/spire/agent/public"),
                Mount::bind("/var/run/docker.sock", "/var/run/docker.sock").read_only(),
            ],
            env: BTreeMap::from([("SPIFFE_ENDPOINT_SOCKET".to_owned(), "/tmp/s.sock".to_owned())]),
            labels: BTreeMap::from([("com.example".to_owned(), "workload".to_owned())]),
            privileged: true,
            pid_mode: NamespaceMode::Host,
            cgroupns_mode: NamespaceMode::Host,
            entrypoint: Some(vec!["/opt/spire/bin/spire-agent".to_owned()]),
            command: Some(vec!["run".to_owned()]),
            ..ContainerSpec::new("spire-agent-1", "ghcr.io/spiffe/spire-agent:1.9.6")
        }
    }

    #[test]
    fn container_config_maps_host_flags() {
        let config = container_config(&agent_spec());
        let host = config.host_config.unwrap();
        assert_eq!(host.privileged, Some(true));
        assert_eq!(host.pid_mode.as_deref(), Some("host"));
        assert_eq!(host.cgroupns_mode, Some(HostConfigCgroupnsModeEnum::HOST));
        assert_eq!(host.network_mode.as_deref(), Some("example.com-net"));
    }

    #[test]
    fn container_config_maps_mounts() {
        let config = container_config(&agent_spec());
        let mounts = config.host_config.unwrap().mounts.unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::VOLUME));
        assert_eq!(mounts[0].source.as_deref(), Some("example.com-vol"));
        assert_eq!(mounts[0].read_only, Some(false));
        assert_eq!(mounts[1].typ, Some(MountTypeEnum::BIND));
        assert_eq!(mounts[1].read_only, Some(true));
    }

    #[test]
    fn container_config_maps_env_labels_and_command() {
        let config = container_config(&agent_spec());
        assert_eq!(
            config.env.unwrap(),
            vec!["SPIFFE_ENDPOINT_SOCKET=/tmp/s.sock".to_owned()]
        );
        assert_eq!(
            config.labels.unwrap().get("com.example").map(String::as_str),
            Some("workload")
        );
        assert_eq!(
            config.entrypoint.unwrap(),
            vec!["/opt/spire/bin/spire-agent".to_owned()]
        );
        assert_eq!(config.cmd.unwrap(), vec!["run".to_owned()]);
    }

    #[test]
    fn container_config_sets_network_aliases() {
        let config = container_config(&agent_spec());
        let endpoints = config.networking_config.unwrap().endpoints_config;
        let endpoint = endpoints.get("example.com-net").unwrap();
        assert_eq!(endpoint.aliases, Some(vec!["spire-agent".to_owned()]));
    }

    #[test]
    fn container_config_private_defaults() {
        let config = container_config(&ContainerSpec::new("server", "spire-server:1.9.6"));
        let host = config.host_config.unwrap();
        assert_eq!(host.privileged, Some(false));
        assert!(host.pid_mode.is_none());
        assert!(host.cgroupns_mode.is_none());
        assert!(config.networking_config.is_none());
    }

    #[test]
    fn exec_result_ensure_success() {
        let ok = ExecResult::default();
        assert!(ok.ensure_success("server", &[]).is_ok());

        let failed = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "unknown flag".to_owned(),
        };
        let err = failed
            .ensure_success("server", &["entry".to_owned()])
            .unwrap_err();
        assert!(matches!(err, ExecError::NonZeroExit { exit_code: 1, .. }));
    }

    #[test]
    fn log_chunk_skips_stdin() {
        use bollard::container::LogOutput;
        assert!(log_chunk(LogOutput::StdIn { message: "x".into() }).is_none());
        let chunk = log_chunk(LogOutput::StdErr { message: "e\n".into() }).unwrap();
        assert_eq!(chunk.stream, LogStream::Stderr);
    }

    #[test]
    fn not_found_detection() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "no such network".to_owned(),
        };
        assert!(is_not_found(&err));
        assert!(matches!(
            api_error("inspect", "net", err),
            RuntimeError::NotFound(_)
        ));
    }

    #[test]
    fn runtime_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<BollardRuntime>();
    }
}
