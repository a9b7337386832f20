//! 컨테이너 런처 -- 명세로부터 컨테이너를 만들고 시작합니다.
//!
//! [`ContainerLauncher::build`]는 이미지 pull 정책을 적용하고 컨테이너를 생성만 합니다.
//! 반환된 [`RunningContainer`]는 다음 상태를 가집니다:
//!
//! ```text
//! Created ──start──▶ Started ──stop──▶ Stopped
//!    │                  │
//!    └──────────────────┴──(시작 거부/준비 실패)──▶ Failed
//! ```
//!
//! 시작 실패는 재시도하지 않고 즉시 반환됩니다.
//! `exec`는 `Started` 상태에서만 허용됩니다.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use spire_testkit_core::error::{ExecError, ResourceError, StartError, TestkitError};
use spire_testkit_core::metrics as m;

use crate::config::{PullPolicy, RuntimeConfig};
use crate::docker::{ContainerRuntime, ExecResult, LogChunk};
use crate::error::RuntimeError;
use crate::log_watcher::{LogAssertion, LogCursor, LogWatcher, Matched};
use crate::spec::{ContainerSpec, LogLine, OutputSink};

/// 컨테이너 수명 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// 생성됨, 아직 시작 전
    Created,
    /// 시작됨
    Started,
    /// 정지 및 삭제됨
    Stopped,
    /// 시작 실패
    Failed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// 컨테이너 런처
pub struct ContainerLauncher<R: ContainerRuntime> {
    runtime: Arc<R>,
    config: RuntimeConfig,
}

impl<R: ContainerRuntime> ContainerLauncher<R> {
    /// 새 런처를 생성합니다.
    pub fn new(runtime: Arc<R>, config: RuntimeConfig) -> Self {
        Self { runtime, config }
    }

    /// 런타임 설정
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// 이 런처가 사용하는 로그 감시기
    pub fn log_watcher(&self) -> LogWatcher {
        LogWatcher::new(&self.config)
    }

    /// 컨테이너를 생성합니다 (시작하지 않음).
    ///
    /// # Errors
    /// - 명세 검증 실패, 런타임 생성 거부: [`StartError::Create`]
    /// - 이미지 없음 (`never` 정책): [`StartError::ImageMissing`]
    /// - pull 실패: [`StartError::ImagePull`]
    pub async fn build(&self, spec: ContainerSpec) -> Result<RunningContainer<R>, TestkitError> {
        spec.validate()?;
        self.ensure_image(&spec.image).await?;

        let id = self.runtime.create_container(&spec).await.map_err(|e| {
            metrics::counter!(m::CONTAINER_START_FAILURES_TOTAL).increment(1);
            StartError::Create {
                name: spec.name.clone(),
                reason: e.to_string(),
            }
        })?;
        debug!(container = %spec.name, id = %id, image = %spec.image, "container created");

        Ok(RunningContainer {
            runtime: Arc::clone(&self.runtime),
            config: self.config.clone(),
            id,
            name: spec.name,
            state: ContainerState::Created,
            output: spec.output,
            ready_when: spec.ready_when,
            forwarder: None,
        })
    }

    /// 컨테이너를 시작합니다. [`RunningContainer::start`]와 같습니다.
    pub async fn start(&self, container: &mut RunningContainer<R>) -> Result<(), TestkitError> {
        container.start().await
    }

    /// 생성과 시작을 한 번에 수행합니다.
    ///
    /// 시작에 실패하면 생성된 컨테이너를 정리한 뒤 에러를 반환합니다.
    pub async fn launch(&self, spec: ContainerSpec) -> Result<RunningContainer<R>, TestkitError> {
        let mut container = self.build(spec).await?;
        if let Err(err) = container.start().await {
            if let Err(cleanup) = container.stop().await {
                warn!(container = %container.name(), error = %cleanup, "cleanup after failed start failed");
            }
            return Err(err);
        }
        Ok(container)
    }

    async fn ensure_image(&self, image: &str) -> Result<(), StartError> {
        let pull_error = |e: RuntimeError| StartError::ImagePull {
            image: image.to_owned(),
            reason: e.to_string(),
        };

        let pull = match self.config.pull_policy {
            PullPolicy::Always => true,
            PullPolicy::Missing | PullPolicy::Never => {
                !self.runtime.image_exists(image).await.map_err(pull_error)?
            }
        };
        if !pull {
            return Ok(());
        }
        if self.config.pull_policy == PullPolicy::Never {
            return Err(StartError::ImageMissing {
                image: image.to_owned(),
            });
        }

        info!(image, policy = %self.config.pull_policy, "pulling image");
        self.runtime.pull_image(image).await.map_err(pull_error)
    }
}

/// 실행 중(또는 생성된) 컨테이너 핸들
///
/// 드롭 시 출력 전달 태스크만 중단합니다. 컨테이너 정리는 [`stop`](Self::stop)
/// 또는 소유 시나리오의 리소스 스코프가 담당합니다.
pub struct RunningContainer<R: ContainerRuntime> {
    runtime: Arc<R>,
    config: RuntimeConfig,
    id: String,
    name: String,
    state: ContainerState,
    output: OutputSink,
    ready_when: Option<LogAssertion>,
    forwarder: Option<JoinHandle<()>>,
}

impl<R: ContainerRuntime> fmt::Debug for RunningContainer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningContainer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

impl<R: ContainerRuntime> RunningContainer<R> {
    /// 런타임 컨테이너 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 컨테이너 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 현재 상태
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// 컨테이너를 시작하고, `ready_when`이 있으면 해당 로그가 나올 때까지 기다립니다.
    ///
    /// # Errors
    /// - `Created`가 아닌 상태: [`StartError::InvalidState`]
    /// - 런타임 거부: [`StartError::Rejected`]
    /// - 준비 로그 미관찰: [`TestkitError::Timeout`]
    pub async fn start(&mut self) -> Result<(), TestkitError> {
        if self.state != ContainerState::Created {
            return Err(StartError::InvalidState {
                name: self.name.clone(),
                state: self.state.to_string(),
            }
            .into());
        }

        if let Err(e) = self.runtime.start_container(&self.id).await {
            self.state = ContainerState::Failed;
            metrics::counter!(m::CONTAINER_START_FAILURES_TOTAL).increment(1);
            return Err(StartError::Rejected {
                name: self.name.clone(),
                reason: e.to_string(),
            }
            .into());
        }
        self.state = ContainerState::Started;
        metrics::counter!(m::CONTAINERS_STARTED_TOTAL).increment(1);
        info!(container = %self.name, "container started");

        self.spawn_forwarder();

        if let Some(assertion) = self.ready_when.clone() {
            if let Err(err) = LogWatcher::new(&self.config)
                .wait_for(self, &assertion)
                .await
            {
                self.state = ContainerState::Failed;
                metrics::counter!(m::CONTAINER_START_FAILURES_TOTAL).increment(1);
                return Err(err);
            }
            debug!(container = %self.name, "container ready");
        }
        Ok(())
    }

    /// 컨테이너 안에서 명령을 실행합니다.
    ///
    /// 0이 아닌 종료 코드는 에러가 아닙니다. 필요하면
    /// [`ExecResult::ensure_success`]로 변환하세요.
    pub async fn exec(&self, argv: &[String]) -> Result<ExecResult, TestkitError> {
        if self.state != ContainerState::Started {
            return Err(ExecError::NotRunning {
                name: self.name.clone(),
                state: self.state.to_string(),
            }
            .into());
        }
        if !self.is_running().await? {
            return Err(ExecError::NotRunning {
                name: self.name.clone(),
                state: "exited".to_owned(),
            }
            .into());
        }

        debug!(container = %self.name, ?argv, "exec");
        let result = self.runtime.exec(&self.id, argv).await.map_err(|e| {
            metrics::counter!(m::EXECS_TOTAL, m::LABEL_RESULT => "error").increment(1);
            ExecError::Runtime {
                name: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        let label = if result.exit_code == 0 {
            "success"
        } else {
            "failure"
        };
        metrics::counter!(m::EXECS_TOTAL, m::LABEL_RESULT => label).increment(1);
        Ok(result)
    }

    /// 지금까지의 출력 프레임을 읽습니다.
    pub async fn logs(&self) -> Result<Vec<LogChunk>, TestkitError> {
        Ok(self.runtime.logs(&self.id).await?)
    }

    /// 컨테이너 프로세스가 실행 중인지 확인합니다.
    pub async fn is_running(&self) -> Result<bool, TestkitError> {
        Ok(self.runtime.is_running(&self.id).await?)
    }

    /// 패턴이 나올 때까지 기다립니다. [`LogWatcher::wait_for`]의 축약입니다.
    pub async fn wait_for(&self, assertion: &LogAssertion) -> Result<Matched, TestkitError> {
        LogWatcher::new(&self.config).wait_for(self, assertion).await
    }

    /// 컨테이너를 정지하고 삭제합니다. 여러 번 호출해도 안전합니다.
    pub async fn stop(&mut self) -> Result<(), TestkitError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.state == ContainerState::Stopped {
            return Ok(());
        }

        let container_error = |e: RuntimeError| ResourceError::Container {
            name: self.name.clone(),
            reason: e.to_string(),
        };
        self.runtime
            .stop_container(&self.id, self.config.stop_timeout())
            .await
            .map_err(container_error)?;
        self.runtime
            .remove_container(&self.id)
            .await
            .map_err(container_error)?;

        self.state = ContainerState::Stopped;
        info!(container = %self.name, "container stopped");
        Ok(())
    }

    fn spawn_forwarder(&mut self) {
        let output = std::mem::take(&mut self.output);
        if matches!(output, OutputSink::Discard) {
            return;
        }

        let runtime = Arc::clone(&self.runtime);
        let id = self.id.clone();
        let name = self.name.clone();
        let interval = self.config.poll_interval();

        self.forwarder = Some(tokio::spawn(async move {
            let mut cursor = LogCursor::new();
            loop {
                let running = runtime.is_running(&id).await.unwrap_or(false);
                let chunks = match runtime.logs(&id).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        debug!(container = %name, error = %e, "output forwarding stopped");
                        return;
                    }
                };
                for (stream, line) in cursor.advance(&chunks, !running) {
                    match &output {
                        OutputSink::Discard => {}
                        OutputSink::Tracing => {
                            info!(
                                target: "spire_testkit::container",
                                container = %name,
                                stream = %stream,
                                "{line}"
                            );
                        }
                        OutputSink::Channel(tx) => {
                            let line = LogLine {
                                container: name.clone(),
                                stream,
                                line,
                            };
                            if tx.send(line).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                if !running {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        }));
    }
}

impl<R: ContainerRuntime> Drop for RunningContainer<R> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RuntimeConfigBuilder;
    use crate::mock::MockRuntime;

    fn launcher(runtime: MockRuntime) -> (Arc<MockRuntime>, ContainerLauncher<MockRuntime>) {
        let runtime = Arc::new(runtime);
        let config = RuntimeConfigBuilder::new()
            .poll_interval_ms(10)
            .build()
            .unwrap();
        (Arc::clone(&runtime), ContainerLauncher::new(runtime, config))
    }

    #[tokio::test]
    async fn build_creates_without_starting() {
        let (runtime, launcher) = launcher(MockRuntime::new());
        let container = launcher
            .build(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap();
        assert_eq!(container.state(), ContainerState::Created);
        assert!(!container.is_running().await.unwrap());
        assert_eq!(runtime.live_containers().await, vec!["server-1".to_owned()]);
    }

    #[tokio::test]
    async fn start_transitions_to_started() {
        let (_, launcher) = launcher(MockRuntime::new());
        let mut container = launcher
            .build(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap();
        launcher.start(&mut container).await.unwrap();
        assert_eq!(container.state(), ContainerState::Started);
        assert!(container.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn start_twice_is_invalid_state() {
        let (_, launcher) = launcher(MockRuntime::new());
        let mut container = launcher
            .launch(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap();
        let err = container.start().await.unwrap_err();
        assert!(matches!(
            err,
            TestkitError::Start(StartError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_start_marks_failed() {
        let (_, launcher) = launcher(MockRuntime::new().fail_start("server"));
        let mut container = launcher
            .build(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap();
        let err = container.start().await.unwrap_err();
        assert!(matches!(err, TestkitError::Start(StartError::Rejected { .. })));
        assert_eq!(container.state(), ContainerState::Failed);
    }

    #[tokio::test]
    async fn launch_cleans_up_after_failed_start() {
        let (runtime, launcher) = launcher(MockRuntime::new().fail_start("server"));
        let result = launcher
            .launch(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await;
        assert!(result.is_err());
        assert!(runtime.live_containers().await.is_empty());
    }

    #[tokio::test]
    async fn pull_policy_never_rejects_missing_image() {
        let runtime = MockRuntime::new().missing_image("spire-server:1.9.6");
        let runtime = Arc::new(runtime);
        let config = RuntimeConfigBuilder::new()
            .pull_policy(PullPolicy::Never)
            .build()
            .unwrap();
        let launcher = ContainerLauncher::new(Arc::clone(&runtime), config);

        let err = launcher
            .build(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TestkitError::Start(StartError::ImageMissing { .. })
        ));
        assert!(runtime.pulled_images().await.is_empty());
    }

    #[tokio::test]
    async fn pull_policy_missing_pulls_absent_image() {
        let (runtime, launcher) = launcher(MockRuntime::new().absent_image("spire-agent:1.9.6"));
        launcher
            .build(ContainerSpec::new("agent-1", "spire-agent:1.9.6"))
            .await
            .unwrap();
        assert_eq!(runtime.pulled_images().await, vec!["spire-agent:1.9.6".to_owned()]);
    }

    #[tokio::test]
    async fn pull_failure_is_image_pull_error() {
        let (_, launcher) = launcher(MockRuntime::new().missing_image("spire-agent:1.9.6"));
        let err = launcher
            .build(ContainerSpec::new("agent-1", "spire-agent:1.9.6"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TestkitError::Start(StartError::ImagePull { .. })
        ));
    }

    #[tokio::test]
    async fn exec_before_start_is_not_running() {
        let (_, launcher) = launcher(MockRuntime::new());
        let container = launcher
            .build(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap();
        let err = container.exec(&["true".to_owned()]).await.unwrap_err();
        assert!(matches!(err, TestkitError::Exec(ExecError::NotRunning { .. })));
    }

    #[tokio::test]
    async fn exec_after_exit_is_not_running() {
        let (runtime, launcher) = launcher(MockRuntime::new());
        let container = launcher
            .launch(ContainerSpec::new("workload-1", "spire-agent:1.9.6"))
            .await
            .unwrap();
        runtime.exit("workload-1").await;
        let err = container.exec(&["true".to_owned()]).await.unwrap_err();
        assert!(matches!(
            err,
            TestkitError::Exec(ExecError::NotRunning { ref state, .. }) if state == "exited"
        ));
    }

    #[tokio::test]
    async fn exec_returns_scripted_output() {
        let output = ExecResult {
            exit_code: 0,
            stdout: "Entry ID : abc\n".to_owned(),
            stderr: String::new(),
        };
        let (runtime, launcher) = launcher(MockRuntime::new().on_exec(&["spire-server"], output));
        let container = launcher
            .launch(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap();
        let argv = vec!["spire-server".to_owned(), "entry".to_owned()];
        let result = container.exec(&argv).await.unwrap();
        assert_eq!(result.stdout, "Entry ID : abc\n");
        assert_eq!(runtime.exec_history().await, vec![argv]);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (runtime, launcher) = launcher(MockRuntime::new());
        let mut container = launcher
            .launch(ContainerSpec::new("server-1", "spire-server:1.9.6"))
            .await
            .unwrap();
        container.stop().await.unwrap();
        container.stop().await.unwrap();
        assert_eq!(container.state(), ContainerState::Stopped);
        assert!(runtime.live_containers().await.is_empty());
    }

    #[tokio::test]
    async fn ready_when_waits_for_log_line() {
        let runtime = MockRuntime::new().on_start_emit("server", "level=info msg=\"Starting Server APIs\"");
        let (_, launcher) = launcher(runtime);
        let spec = ContainerSpec {
            ready_when: Some(LogAssertion::new("Starting Server APIs", Duration::from_secs(1))),
            ..ContainerSpec::new("server-1", "spire-server:1.9.6")
        };
        let container = launcher.launch(spec).await.unwrap();
        assert_eq!(container.state(), ContainerState::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_when_timeout_marks_failed() {
        let (_, launcher) = launcher(MockRuntime::new());
        let spec = ContainerSpec {
            ready_when: Some(LogAssertion::new("Starting Server APIs", Duration::from_secs(2))),
            ..ContainerSpec::new("server-1", "spire-server:1.9.6")
        };
        let mut container = launcher.build(spec).await.unwrap();
        let err = container.start().await.unwrap_err();
        assert!(matches!(err, TestkitError::Timeout(_)));
        assert_eq!(container.state(), ContainerState::Failed);
    }

    #[tokio::test]
    async fn channel_sink_forwards_lines() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let runtime = MockRuntime::new().on_start_emit("agent", "Starting Workload and SDS APIs");
        let (_, launcher) = launcher(runtime);
        let spec = ContainerSpec {
            output: OutputSink::Channel(tx),
            ..ContainerSpec::new("agent-1", "spire-agent:1.9.6")
        };
        let _container = launcher.launch(spec).await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.container, "agent-1");
        assert_eq!(line.line, "Starting Workload and SDS APIs");
    }

    #[tokio::test]
    async fn wait_for_assembles_split_stdout_around_stderr() {
        let (runtime, launcher) = launcher(MockRuntime::new());
        let container = launcher
            .launch(ContainerSpec::new("agent-1", "spire-agent:1.9.6"))
            .await
            .unwrap();

        runtime.push_log("agent-1", "level=debug msg=\"SVID upd").await;
        runtime.push_stderr("agent-1", "level=warn msg=\"retrying\"\r\n").await;
        runtime.push_log("agent-1", "ated\" entry=e-1\n").await;

        let matched = container
            .wait_for(&LogAssertion::new(
                r#"msg="SVID updated" entry=(?P<entry>\S+)"#,
                Duration::from_secs(1),
            ))
            .await
            .unwrap();
        assert_eq!(matched.stream, crate::spec::LogStream::Stdout);
        assert_eq!(matched.line, "level=debug msg=\"SVID updated\" entry=e-1");
        assert_eq!(matched.named("entry"), Some("e-1"));

        let warning = container
            .wait_for(&LogAssertion::new(r#"retrying"$"#, Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(warning.stream, crate::spec::LogStream::Stderr);
    }
}
