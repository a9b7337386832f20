//! 테스트용 Mock 런타임
//!
//! Docker 없이 프로비저너/런처/로그 감시기/시나리오를 검증할 수 있도록
//! 스크립트 가능한 응답과 실패 주입, 사후 상태 조회를 제공합니다.
//!
//! 다른 크레이트의 테스트에서는 `test-util` 피처로 사용합니다.
//!
//! ```ignore
//! let runtime = MockRuntime::new()
//!     .on_start_emit("spire-server", "msg=\"Starting Server APIs\"")
//!     .on_exec(&["/opt/spire/bin/spire-server", "entry", "create"], ExecResult::default());
//! ```

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::docker::{ContainerRuntime, ExecResult, LogChunk};
use crate::error::RuntimeError;
use crate::spec::ContainerSpec;

struct ExecRule {
    prefix: Vec<String>,
    output: ExecResult,
    emit: Option<(String, String)>,
}

struct MockContainer {
    id: String,
    spec: ContainerSpec,
    running: bool,
    removed: bool,
    logs: Vec<LogChunk>,
}

#[derive(Default)]
struct MockState {
    networks: BTreeMap<String, BTreeMap<String, String>>,
    volumes: BTreeMap<String, BTreeMap<String, String>>,
    containers: Vec<MockContainer>,
    exec_rules: Vec<ExecRule>,
    start_emits: Vec<(String, String)>,
    fail_starts: Vec<String>,
    missing_images: HashSet<String>,
    absent_images: HashSet<String>,
    pulled: Vec<String>,
    fail_network_create: bool,
    exec_history: Vec<Vec<String>>,
    next_id: u64,
}

impl MockState {
    fn container(&self, id: &str) -> Result<&MockContainer, RuntimeError> {
        self.containers
            .iter()
            .find(|c| c.id == id && !c.removed)
            .ok_or_else(|| RuntimeError::NotFound(id.to_owned()))
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut MockContainer, RuntimeError> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id && !c.removed)
            .ok_or_else(|| RuntimeError::NotFound(id.to_owned()))
    }

    fn emit_to(&mut self, name_contains: &str, line: &str) {
        for container in self
            .containers
            .iter_mut()
            .filter(|c| !c.removed && c.spec.name.contains(name_contains))
        {
            container
                .logs
                .push(LogChunk::stdout(format!("{line}\n").into_bytes()));
        }
    }
}

/// 스크립트 가능한 in-memory 컨테이너 런타임
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    /// 빈 런타임을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// argv가 `prefix`로 시작하는 exec에 `output`을 반환합니다.
    ///
    /// 먼저 등록된 규칙이 우선합니다. 규칙이 없으면 종료 코드 0, 빈 출력입니다.
    pub fn on_exec(mut self, prefix: &[&str], output: ExecResult) -> Self {
        self.state.get_mut().exec_rules.push(ExecRule {
            prefix: prefix.iter().map(|s| (*s).to_owned()).collect(),
            output,
            emit: None,
        });
        self
    }

    /// [`on_exec`](Self::on_exec)과 같고, 추가로 이름에 `target`이 포함된
    /// 컨테이너의 stdout에 `line`을 기록합니다.
    pub fn on_exec_emit(
        mut self,
        prefix: &[&str],
        output: ExecResult,
        target: &str,
        line: &str,
    ) -> Self {
        self.state.get_mut().exec_rules.push(ExecRule {
            prefix: prefix.iter().map(|s| (*s).to_owned()).collect(),
            output,
            emit: Some((target.to_owned(), line.to_owned())),
        });
        self
    }

    /// 이름에 `name_contains`가 포함된 컨테이너가 시작되면 stdout에 `line`을 기록합니다.
    pub fn on_start_emit(mut self, name_contains: &str, line: &str) -> Self {
        self.state
            .get_mut()
            .start_emits
            .push((name_contains.to_owned(), line.to_owned()));
        self
    }

    /// 이름에 `name_contains`가 포함된 컨테이너의 시작을 거부합니다.
    pub fn fail_start(mut self, name_contains: &str) -> Self {
        self.state
            .get_mut()
            .fail_starts
            .push(name_contains.to_owned());
        self
    }

    /// 로컬에 없고 pull도 실패하는 이미지를 등록합니다.
    pub fn missing_image(mut self, image: &str) -> Self {
        self.state.get_mut().missing_images.insert(image.to_owned());
        self
    }

    /// 로컬에 없지만 pull은 성공하는 이미지를 등록합니다.
    pub fn absent_image(mut self, image: &str) -> Self {
        self.state.get_mut().absent_images.insert(image.to_owned());
        self
    }

    /// 네트워크 생성이 실패하도록 설정합니다.
    pub fn fail_network_create(mut self) -> Self {
        self.state.get_mut().fail_network_create = true;
        self
    }

    // --- 사후 조회 ---

    /// 존재하는 네트워크 이름
    pub async fn networks(&self) -> Vec<String> {
        self.state.lock().await.networks.keys().cloned().collect()
    }

    /// 네트워크 레이블
    pub async fn network_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().await.networks.get(name).cloned()
    }

    /// 존재하는 볼륨 이름
    pub async fn volumes(&self) -> Vec<String> {
        self.state.lock().await.volumes.keys().cloned().collect()
    }

    /// 삭제되지 않은 컨테이너 이름 (생성 순)
    pub async fn live_containers(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .containers
            .iter()
            .filter(|c| !c.removed)
            .map(|c| c.spec.name.clone())
            .collect()
    }

    /// 이름에 `name_contains`가 포함된 첫 컨테이너의 생성 명세
    pub async fn container_spec(&self, name_contains: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .await
            .containers
            .iter()
            .find(|c| c.spec.name.contains(name_contains))
            .map(|c| c.spec.clone())
    }

    /// 지금까지 실행된 exec argv 목록
    pub async fn exec_history(&self) -> Vec<Vec<String>> {
        self.state.lock().await.exec_history.clone()
    }

    /// pull 된 이미지 목록
    pub async fn pulled_images(&self) -> Vec<String> {
        self.state.lock().await.pulled.clone()
    }

    // --- 실행 중 조작 ---

    /// 이름에 `name_contains`가 포함된 컨테이너 stdout에 원시 텍스트를 추가합니다.
    pub async fn push_log(&self, name_contains: &str, text: &str) {
        let mut state = self.state.lock().await;
        for container in state
            .containers
            .iter_mut()
            .filter(|c| !c.removed && c.spec.name.contains(name_contains))
        {
            container.logs.push(LogChunk::stdout(text.as_bytes()));
        }
    }

    /// 이름에 `name_contains`가 포함된 컨테이너 stderr에 원시 텍스트를 추가합니다.
    pub async fn push_stderr(&self, name_contains: &str, text: &str) {
        let mut state = self.state.lock().await;
        for container in state
            .containers
            .iter_mut()
            .filter(|c| !c.removed && c.spec.name.contains(name_contains))
        {
            container.logs.push(LogChunk::stderr(text.as_bytes()));
        }
    }

    /// 이름에 `name_contains`가 포함된 컨테이너 프로세스가 종료된 것으로 표시합니다.
    pub async fn exit(&self, name_contains: &str) {
        let mut state = self.state.lock().await;
        for container in state
            .containers
            .iter_mut()
            .filter(|c| c.spec.name.contains(name_contains))
        {
            container.running = false;
        }
    }
}

impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if state.fail_network_create {
            return Err(RuntimeError::Api(format!(
                "create network '{name}' failed: mock failure"
            )));
        }
        if state.networks.contains_key(name) {
            return Err(RuntimeError::Api(format!("network '{name}' already exists")));
        }
        state.networks.insert(name.to_owned(), labels.clone());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.state.lock().await.networks.remove(name);
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().await.networks.contains_key(name))
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if state.volumes.contains_key(name) {
            return Err(RuntimeError::Api(format!("volume '{name}' already exists")));
        }
        state.volumes.insert(name.to_owned(), labels.clone());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.state.lock().await.volumes.remove(name);
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().await.volumes.contains_key(name))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let state = self.state.lock().await;
        let local = !state.missing_images.contains(image) && !state.absent_images.contains(image);
        Ok(local || state.pulled.iter().any(|p| p == image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if state.missing_images.contains(image) {
            return Err(RuntimeError::Api(format!(
                "pull image '{image}' failed: manifest unknown"
            )));
        }
        state.pulled.push(image.to_owned());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().await;
        if state
            .containers
            .iter()
            .any(|c| !c.removed && c.spec.name == spec.name)
        {
            return Err(RuntimeError::Api(format!(
                "container name '{}' already in use",
                spec.name
            )));
        }
        if let Some(network) = &spec.network {
            if !state.networks.contains_key(network) {
                return Err(RuntimeError::NotFound(format!("network {network}")));
            }
        }
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.push(MockContainer {
            id: id.clone(),
            spec: spec.clone(),
            running: false,
            removed: false,
            logs: Vec::new(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let name = state.container(id)?.spec.name.clone();
        if state.fail_starts.iter().any(|f| name.contains(f.as_str())) {
            return Err(RuntimeError::Api(format!(
                "start container '{name}' failed: OCI runtime create failed"
            )));
        }
        state.container_mut(id)?.running = true;

        let emits: Vec<String> = state
            .start_emits
            .iter()
            .filter(|(pattern, _)| name.contains(pattern.as_str()))
            .map(|(_, line)| line.clone())
            .collect();
        for line in emits {
            state.emit_to(&name, &line);
        }
        Ok(())
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecResult, RuntimeError> {
        let mut state = self.state.lock().await;
        if !state.container(id)?.running {
            return Err(RuntimeError::Api(format!("container {id} is not running")));
        }
        state.exec_history.push(argv.to_vec());

        let rule = state
            .exec_rules
            .iter()
            .find(|rule| argv.starts_with(&rule.prefix))
            .map(|rule| (rule.output.clone(), rule.emit.clone()));

        match rule {
            Some((output, emit)) => {
                if let Some((target, line)) = emit {
                    state.emit_to(&target, &line);
                }
                Ok(output)
            }
            None => Ok(ExecResult::default()),
        }
    }

    async fn logs(&self, id: &str) -> Result<Vec<LogChunk>, RuntimeError> {
        Ok(self.state.lock().await.container(id)?.logs.clone())
    }

    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        let state = self.state.lock().await;
        Ok(state.container(id).map(|c| c.running).unwrap_or(false))
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if let Ok(container) = state.container_mut(id) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if let Ok(container) = state.container_mut(id) {
            container.running = false;
            container.removed = true;
        }
        Ok(())
    }
}
