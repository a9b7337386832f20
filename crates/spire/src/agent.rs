//! SPIRE 에이전트 컨테이너

use std::collections::BTreeMap;
use std::path::Path;

use spire_testkit_runtime::{ContainerSpec, LogAssertion, Mount, NamespaceMode, OutputSink};

use crate::config::ScenarioConfig;
use crate::defaults;

/// 에이전트 컨테이너 명세를 생성합니다.
///
/// docker 워크로드 어테스터가 워크로드 컨테이너를 식별하려면
/// 호스트 PID 네임스페이스와 Docker 소켓이 필요합니다.
/// Workload API 소켓은 `volume`을 통해 워크로드 컨테이너와 공유됩니다.
pub fn agent_spec(
    config: &ScenarioConfig,
    name: &str,
    network: &str,
    volume: &str,
    config_dir: &Path,
    labels: &BTreeMap<String, String>,
    output: OutputSink,
) -> ContainerSpec {
    let mut spec = ContainerSpec::new(name, &config.agent_image);
    spec.network = Some(network.to_owned());
    spec.mounts = vec![
        Mount::bind(config_dir, defaults::AGENT_CONFIG_DIR).read_only(),
        Mount::bind(&config.certs_dir, defaults::CERTS_DIR).read_only(),
        Mount::volume(volume, defaults::AGENT_SOCKET_DIR),
        Mount::bind(defaults::DOCKER_SOCKET_PATH, defaults::DOCKER_SOCKET_PATH),
    ];
    spec.labels = labels.clone();
    spec.privileged = true;
    spec.pid_mode = NamespaceMode::Host;
    spec.cgroupns_mode = NamespaceMode::Host;
    spec.command = Some(vec![
        "-config".to_owned(),
        defaults::AGENT_CONFIG_PATH.to_owned(),
    ]);
    spec.output = output;
    spec.ready_when = Some(LogAssertion::new(
        regex::escape(defaults::AGENT_READY_LOG),
        config.readiness_timeout,
    ));
    spec
}

/// 에이전트가 워크로드 엔트리를 캐시에 반영했음을 나타내는 로그 패턴
pub fn svid_updated_pattern(spiffe_id: &str) -> String {
    format!(
        r#"msg="SVID updated" entry=[\w-]+ spiffe_id="{}" subsystem_name=cache_manager$"#,
        regex::escape(spiffe_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfigBuilder;
    use spire_testkit_runtime::MountSource;

    #[test]
    fn agent_spec_shares_socket_volume() {
        let config = ScenarioConfigBuilder::new("/srv/certs").build().unwrap();
        let spec = agent_spec(
            &config,
            "spire-agent-1",
            "example.com-net",
            "example.com-vol",
            Path::new("/tmp/render/agent"),
            &BTreeMap::new(),
            OutputSink::Discard,
        );
        assert!(spec.privileged);
        assert_eq!(spec.pid_mode, NamespaceMode::Host);

        let socket = spec
            .mounts
            .iter()
            .find(|m| m.target == defaults::AGENT_SOCKET_DIR)
            .unwrap();
        assert_eq!(socket.source, MountSource::Volume("example.com-vol".to_owned()));
        assert!(!socket.read_only);
        assert!(
            spec.mounts
                .iter()
                .any(|m| m.target == defaults::DOCKER_SOCKET_PATH)
        );
        spec.validate().unwrap();
    }

    #[test]
    fn svid_updated_pattern_matches_agent_log() {
        let pattern = regex::Regex::new(&svid_updated_pattern("spiffe://example.com/workload"))
            .unwrap();
        let line = r#"time="2024-05-01T10:00:00Z" level=debug msg="SVID updated" entry=0f2f5c5e-9d3b-4a7c spiffe_id="spiffe://example.com/workload" subsystem_name=cache_manager"#;
        assert!(pattern.is_match(line));
        assert!(!pattern.is_match(&line.replace("example.com", "exampleXcom")));
        assert!(!pattern.is_match(&format!("{line} extra")));
    }
}
