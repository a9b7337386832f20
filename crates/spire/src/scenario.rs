//! 엔드투엔드 시나리오 오케스트레이터
//!
//! ```text
//! Init → NetworkReady → ServerRunning → AgentRunning → EntryRegistered
//!      → AgentObservedEntry → WorkloadRunning → IdentityFetched → Complete
//!
//! (어느 단계에서든) ──에러/타임아웃──▶ Failed
//! ```
//!
//! 모든 단계는 순차적으로 실행되며 자동 재시도는 없습니다.
//! 획득한 네트워크/볼륨/컨테이너는 [`ResourceScope`]가 기록하고,
//! 성공이든 실패든 획득 역순으로 해제합니다.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use spire_testkit_core::error::{ConfigError, ResourceError, TestkitError};
use spire_testkit_core::metrics as m;
use spire_testkit_core::types::TrustDomain;
use spire_testkit_runtime::{
    ContainerLauncher, ContainerRuntime, ContainerSpec, LogAssertion, NetworkResource,
    OutputSink, ResourceKind, ResourceProvisioner, RunningContainer, RuntimeConfig, RuntimeError,
    VolumeResource,
};

use crate::config::ScenarioConfig;
use crate::template::{AgentConfigModel, ConfigModel, ConfigTemplateRenderer};
use crate::{agent, defaults, server, workload};

/// 시나리오 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    /// 시작 전
    Init,
    /// 네트워크와 볼륨 준비됨
    NetworkReady,
    /// 서버 실행 중
    ServerRunning,
    /// 에이전트 실행 중
    AgentRunning,
    /// 워크로드 엔트리 등록됨
    EntryRegistered,
    /// 에이전트가 엔트리를 반영함
    AgentObservedEntry,
    /// 워크로드 컨테이너 실행 중
    WorkloadRunning,
    /// 워크로드가 SVID를 받음
    IdentityFetched,
    /// 리소스 해제까지 완료
    Complete,
    /// 실패
    Failed,
}

impl ScenarioState {
    /// 상태 이름 (메트릭 레이블 겸용)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::NetworkReady => "NetworkReady",
            Self::ServerRunning => "ServerRunning",
            Self::AgentRunning => "AgentRunning",
            Self::EntryRegistered => "EntryRegistered",
            Self::AgentObservedEntry => "AgentObservedEntry",
            Self::WorkloadRunning => "WorkloadRunning",
            Self::IdentityFetched => "IdentityFetched",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// 더 이상 전이가 없는 상태인지 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 상태 전이 기록
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRecord {
    /// 도달한 상태
    pub state: ScenarioState,
    /// 시나리오 시작부터 경과 시간
    pub elapsed: Duration,
}

/// 성공한 시나리오의 결과
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// 세션 ID (리소스 레이블 값)
    pub session_id: String,
    /// 트러스트 도메인
    pub trust_domain: TrustDomain,
    /// 등록된 엔트리 ID (출력에서 찾지 못하면 `None`)
    pub entry_id: Option<String>,
    /// 상태 전이 목록
    pub transitions: Vec<StepRecord>,
    /// 워크로드가 SVID 수신을 보고한 로그 라인
    pub svid_line: String,
    /// 해제된 리소스 수
    pub released: usize,
}

impl ScenarioReport {
    /// 마지막 상태
    pub fn final_state(&self) -> ScenarioState {
        self.transitions
            .last()
            .map(|step| step.state)
            .unwrap_or(ScenarioState::Init)
    }

    /// 전체 소요 시간
    pub fn elapsed(&self) -> Duration {
        self.transitions
            .last()
            .map(|step| step.elapsed)
            .unwrap_or_default()
    }
}

struct Progress {
    started: Instant,
    state: ScenarioState,
    transitions: Vec<StepRecord>,
}

impl Progress {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            state: ScenarioState::Init,
            transitions: Vec::new(),
        }
    }

    fn advance(&mut self, state: ScenarioState) {
        let elapsed = self.started.elapsed();
        self.state = state;
        self.transitions.push(StepRecord { state, elapsed });
        metrics::counter!(m::SCENARIO_STEPS_TOTAL, m::LABEL_STEP => state.as_str()).increment(1);
        info!(state = %state, elapsed_ms = millis(elapsed), "scenario step reached");
    }
}

/// 밀리초 (u64 범위를 넘으면 포화)
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

struct Outcome {
    entry_id: Option<String>,
    svid_line: String,
}

/// SPIRE 서버 → 에이전트 → 엔트리 등록 → 워크로드 SVID 수신 시나리오
pub struct ScenarioOrchestrator<R: ContainerRuntime> {
    runtime: Arc<R>,
    launcher: ContainerLauncher<R>,
    stop_timeout: Duration,
    config: ScenarioConfig,
    renderer: ConfigTemplateRenderer,
    output: OutputSink,
    session_id: String,
}

impl<R: ContainerRuntime> ScenarioOrchestrator<R> {
    /// 내장 템플릿으로 오케스트레이터를 생성합니다.
    pub fn new(
        runtime: Arc<R>,
        runtime_config: RuntimeConfig,
        config: ScenarioConfig,
    ) -> Result<Self, TestkitError> {
        config.validate()?;
        Ok(Self {
            launcher: ContainerLauncher::new(Arc::clone(&runtime), runtime_config.clone()),
            stop_timeout: runtime_config.stop_timeout(),
            runtime,
            config,
            renderer: ConfigTemplateRenderer::new()?,
            output: OutputSink::Discard,
            session_id: uuid::Uuid::new_v4().simple().to_string(),
        })
    }

    /// 렌더러를 교체합니다 (사용자 템플릿).
    pub fn with_renderer(mut self, renderer: ConfigTemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// 모든 컨테이너 출력을 보낼 곳을 지정합니다.
    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    /// 세션 ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 시나리오 설정
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// 시나리오를 끝까지 실행합니다.
    ///
    /// # Errors
    /// 실패 시 마지막으로 도달한 상태와 원인을 담은 [`TestkitError::Scenario`]를 반환합니다.
    /// 반환 시점에는 이미 획득한 리소스가 모두 해제되어 있습니다.
    pub async fn run(&self) -> Result<ScenarioReport, TestkitError> {
        let mut progress = Progress::start();
        info!(
            session = %self.session_id,
            trust_domain = %self.config.trust_domain,
            "scenario started"
        );

        match self.run_scoped(&mut progress).await {
            Ok(report) => {
                metrics::counter!(m::SCENARIOS_TOTAL, m::LABEL_RESULT => "success").increment(1);
                info!(
                    session = %self.session_id,
                    elapsed_ms = millis(report.elapsed()),
                    "scenario complete"
                );
                Ok(report)
            }
            Err(err) => {
                let state = progress.state;
                progress.advance(ScenarioState::Failed);
                metrics::counter!(m::SCENARIOS_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                match err.root() {
                    TestkitError::Timeout(timeout) => error!(
                        session = %self.session_id,
                        state = %state,
                        error = %err,
                        diagnostics = %timeout.diagnostics(),
                        "scenario failed"
                    ),
                    _ => error!(session = %self.session_id, state = %state, error = %err, "scenario failed"),
                }
                Err(TestkitError::Scenario {
                    state: state.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn run_scoped(&self, progress: &mut Progress) -> Result<ScenarioReport, TestkitError> {
        self.preflight().await?;

        let workdir = tempfile::Builder::new()
            .prefix("spire-testkit-")
            .tempdir()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(workdir.path(), std::fs::Permissions::from_mode(0o755))
                .await?;
        }

        let mut scope = ResourceScope::new(
            Arc::clone(&self.runtime),
            &self.session_id,
            self.stop_timeout,
        );
        let outcome = self.execute(&mut scope, progress, workdir.path()).await;
        let released = scope.release().await;

        let outcome = outcome?;
        let released = released?;
        progress.advance(ScenarioState::Complete);

        Ok(ScenarioReport {
            session_id: self.session_id.clone(),
            trust_domain: self.config.trust_domain.clone(),
            entry_id: outcome.entry_id,
            transitions: progress.transitions.clone(),
            svid_line: outcome.svid_line,
            released,
        })
    }

    /// 인증서 파일과 런타임 연결을 확인합니다.
    async fn preflight(&self) -> Result<(), TestkitError> {
        for file in defaults::REQUIRED_CERT_FILES {
            let path = self.config.certs_dir.join(file);
            if !tokio::fs::try_exists(&path).await? {
                return Err(ConfigError::InvalidValue {
                    field: "spire.certs_dir".to_owned(),
                    reason: format!("missing {}", path.display()),
                }
                .into());
            }
        }
        self.runtime.ping().await?;
        Ok(())
    }

    async fn execute(
        &self,
        scope: &mut ResourceScope<R>,
        progress: &mut Progress,
        workdir: &Path,
    ) -> Result<Outcome, TestkitError> {
        let trust_domain = &self.config.trust_domain;
        let workload_id = self.config.workload_id()?;

        // 1. 네트워크 + 볼륨
        let network = scope.create_network(trust_domain.as_str()).await?;
        let volume = scope.create_volume(trust_domain.as_str()).await?;
        progress.advance(ScenarioState::NetworkReady);

        // 2. 서버
        let server_dir = workdir.join("server");
        let server_model = self.config.federation.iter().cloned().fold(
            ConfigModel::new(trust_domain.clone(), self.config.log_level),
            ConfigModel::with_federation,
        );
        self.renderer
            .render_to_file(&server_model, &server_dir.join("server.conf"))
            .await?;
        let spec = server::server_spec(
            &self.config,
            &self.container_name("spire-server"),
            network.name(),
            &server_dir,
            scope.labels(),
            self.output.clone(),
        );
        let server = scope.launch(&self.launcher, spec).await?;
        progress.advance(ScenarioState::ServerRunning);

        // 3. 에이전트
        let agent_dir = workdir.join("agent");
        let agent_model = AgentConfigModel::new(trust_domain.clone(), self.config.log_level);
        self.renderer
            .render_to_file(&agent_model, &agent_dir.join("agent.conf"))
            .await?;
        let spec = agent::agent_spec(
            &self.config,
            &self.container_name("spire-agent"),
            network.name(),
            volume.name(),
            &agent_dir,
            scope.labels(),
            self.output.clone(),
        );
        let agent = scope.launch(&self.launcher, spec).await?;
        progress.advance(ScenarioState::AgentRunning);

        // 4. 엔트리 등록
        let entry = server::EntryCreate::new(
            self.config.agent_id()?,
            workload_id.clone(),
            self.config.workload_selector.clone(),
        );
        let argv = entry.argv();
        let created = server
            .exec(&argv)
            .await?
            .ensure_success(server.name(), &argv)?;
        let entry_id = server::parse_entry_id(&created.stdout);
        if entry_id.is_none() {
            warn!(stdout = %created.stdout, "entry id not found in registration output");
        }
        debug!(entry_id = ?entry_id, spiffe_id = %workload_id, "entry registered");
        progress.advance(ScenarioState::EntryRegistered);

        // 5. 에이전트 캐시 반영
        agent
            .wait_for(&LogAssertion::new(
                agent::svid_updated_pattern(&workload_id.to_string()),
                self.config.observe_timeout,
            ))
            .await?;
        progress.advance(ScenarioState::AgentObservedEntry);

        // 6. 워크로드
        let spec = workload::workload_spec(
            &self.config,
            &self.container_name("workload"),
            network.name(),
            volume.name(),
            scope.labels(),
            self.output.clone(),
        )?;
        let workload = scope.launch(&self.launcher, spec).await?;
        progress.advance(ScenarioState::WorkloadRunning);

        // 7. SVID 수신
        let fetched = workload
            .wait_for(&LogAssertion::new(
                workload::SVID_RECEIVED_PATTERN,
                self.config.fetch_timeout,
            ))
            .await?;
        progress.advance(ScenarioState::IdentityFetched);

        Ok(Outcome {
            entry_id,
            svid_line: fetched.line,
        })
    }

    fn container_name(&self, role: &str) -> String {
        format!("{role}-{}", self.session_id)
    }
}

/// 시나리오가 획득한 리소스
#[derive(Debug, Clone, PartialEq, Eq)]
enum Acquired {
    Network(String),
    Volume(String),
    Container { id: String, name: String },
}

/// 시나리오 범위 리소스 기록
///
/// [`release`](Self::release)는 획득 역순으로 모두 해제를 시도하고 첫 에러를 반환합니다.
/// 해제 없이 드롭되면 (예: 시나리오 future 취소) 현재 Tokio 런타임에서
/// 백그라운드 해제를 시작하고 경고를 남깁니다.
pub struct ResourceScope<R: ContainerRuntime> {
    runtime: Arc<R>,
    provisioner: ResourceProvisioner<R>,
    stop_timeout: Duration,
    acquired: Vec<Acquired>,
}

impl<R: ContainerRuntime> ResourceScope<R> {
    /// 세션 레이블을 붙이는 스코프를 생성합니다.
    pub fn new(runtime: Arc<R>, session_id: &str, stop_timeout: Duration) -> Self {
        Self {
            provisioner: ResourceProvisioner::new(Arc::clone(&runtime)).with_session(session_id),
            runtime,
            stop_timeout,
            acquired: Vec::new(),
        }
    }

    /// 생성되는 리소스와 컨테이너에 붙는 레이블
    pub fn labels(&self) -> &std::collections::BTreeMap<String, String> {
        self.provisioner.labels()
    }

    /// 기록된 리소스 수
    pub fn len(&self) -> usize {
        self.acquired.len()
    }

    /// 기록된 리소스가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    /// 네트워크를 생성하고 기록합니다.
    pub async fn create_network(&mut self, prefix: &str) -> Result<NetworkResource, TestkitError> {
        let network = self.provisioner.create_network(prefix).await?;
        self.acquired.push(Acquired::Network(network.name().to_owned()));
        Ok(network)
    }

    /// 볼륨을 생성하고 기록합니다.
    pub async fn create_volume(&mut self, prefix: &str) -> Result<VolumeResource, TestkitError> {
        let volume = self.provisioner.create_volume(prefix).await?;
        self.acquired.push(Acquired::Volume(volume.name().to_owned()));
        Ok(volume)
    }

    /// 컨테이너를 생성해 기록한 뒤 시작합니다.
    ///
    /// 시작에 실패해도 컨테이너는 이미 기록되어 있으므로 해제 대상에 포함됩니다.
    pub async fn launch(
        &mut self,
        launcher: &ContainerLauncher<R>,
        spec: ContainerSpec,
    ) -> Result<RunningContainer<R>, TestkitError> {
        let mut container = launcher.build(spec).await?;
        self.track(&container);
        launcher.start(&mut container).await?;
        Ok(container)
    }

    /// 이미 생성된 컨테이너를 해제 대상에 추가합니다.
    pub fn track(&mut self, container: &RunningContainer<R>) {
        self.acquired.push(Acquired::Container {
            id: container.id().to_owned(),
            name: container.name().to_owned(),
        });
    }

    /// 기록된 리소스를 역순으로 해제하고 해제된 개수를 반환합니다.
    pub async fn release(mut self) -> Result<usize, TestkitError> {
        let acquired = std::mem::take(&mut self.acquired);
        release_all(Arc::clone(&self.runtime), acquired, self.stop_timeout).await
    }
}

impl<R: ContainerRuntime> Drop for ResourceScope<R> {
    fn drop(&mut self) {
        if self.acquired.is_empty() {
            return;
        }
        let acquired = std::mem::take(&mut self.acquired);
        let count = acquired.len();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(count, "resource scope dropped before release, releasing in background");
                let runtime = Arc::clone(&self.runtime);
                let stop_timeout = self.stop_timeout;
                handle.spawn(async move {
                    if let Err(err) = release_all(runtime, acquired, stop_timeout).await {
                        warn!(error = %err, "background release failed");
                    }
                });
            }
            Err(_) => {
                warn!(count, "resource scope dropped outside a tokio runtime, resources leaked");
            }
        }
    }
}

async fn release_all<R: ContainerRuntime>(
    runtime: Arc<R>,
    acquired: Vec<Acquired>,
    stop_timeout: Duration,
) -> Result<usize, TestkitError> {
    let provisioner = ResourceProvisioner::new(Arc::clone(&runtime));
    let mut released = 0;
    let mut first_error = None;

    for resource in acquired.into_iter().rev() {
        let result = match &resource {
            Acquired::Container { id, name } => {
                release_container(runtime.as_ref(), id, name, stop_timeout).await
            }
            Acquired::Network(name) => {
                provisioner
                    .release_by_name(ResourceKind::Network, name)
                    .await
            }
            Acquired::Volume(name) => provisioner.release_by_name(ResourceKind::Volume, name).await,
        };
        match result {
            Ok(()) => released += 1,
            Err(err) => {
                warn!(resource = ?resource, error = %err, "resource release failed");
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            debug!(released, "scenario resources released");
            Ok(released)
        }
    }
}

async fn release_container<R: ContainerRuntime>(
    runtime: &R,
    id: &str,
    name: &str,
    stop_timeout: Duration,
) -> Result<(), TestkitError> {
    let container_error = |e: RuntimeError| ResourceError::Container {
        name: name.to_owned(),
        reason: e.to_string(),
    };
    match runtime.stop_container(id, stop_timeout).await {
        Ok(()) | Err(RuntimeError::NotFound(_)) => {}
        Err(e) => return Err(container_error(e).into()),
    }
    match runtime.remove_container(id).await {
        Ok(()) | Err(RuntimeError::NotFound(_)) => {}
        Err(e) => return Err(container_error(e).into()),
    }
    metrics::counter!(m::RESOURCES_RELEASED_TOTAL, m::LABEL_KIND => "container").increment(1);
    debug!(container = name, "container released");
    Ok(())
}
