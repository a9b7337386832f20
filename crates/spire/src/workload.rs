//! 워크로드 컨테이너
//!
//! 에이전트 이미지로 `spire-agent api fetch`를 실행하여
//! 공유 소켓을 통해 SVID를 받아오는 컨테이너입니다.

use std::collections::BTreeMap;

use spire_testkit_core::error::ConfigError;
use spire_testkit_runtime::{ContainerSpec, Mount, NamespaceMode, OutputSink};

use crate::config::ScenarioConfig;
use crate::defaults;

/// 워크로드가 SVID를 받았음을 나타내는 로그 패턴
pub const SVID_RECEIVED_PATTERN: &str = r"Received [1-9]\d* svid after";

/// 워크로드 컨테이너 명세를 생성합니다.
///
/// 셀렉터의 Docker 라벨이 컨테이너에 붙어야 에이전트가 엔트리와 매칭합니다.
pub fn workload_spec(
    config: &ScenarioConfig,
    name: &str,
    network: &str,
    volume: &str,
    labels: &BTreeMap<String, String>,
    output: OutputSink,
) -> Result<ContainerSpec, ConfigError> {
    let (label, value) = config.workload_selector.as_docker_label().ok_or_else(|| {
        ConfigError::InvalidValue {
            field: "spire.workload_selector".to_owned(),
            reason: format!("'{}' is not a docker label selector", config.workload_selector),
        }
    })?;

    let mut spec = ContainerSpec::new(name, &config.agent_image);
    spec.network = Some(network.to_owned());
    spec.mounts = vec![Mount::volume(volume, defaults::AGENT_SOCKET_DIR)];
    spec.labels = labels.clone();
    spec.labels.insert(label.to_owned(), value.to_owned());
    spec.privileged = true;
    spec.pid_mode = NamespaceMode::Host;
    spec.cgroupns_mode = NamespaceMode::Host;
    spec.entrypoint = Some(vec![
        defaults::AGENT_BIN.to_owned(),
        "api".to_owned(),
        "fetch".to_owned(),
    ]);
    spec.command = Some(vec![
        "-socketPath".to_owned(),
        defaults::AGENT_SOCKET_PATH.to_owned(),
    ]);
    spec.output = output;
    Ok(spec)
}
