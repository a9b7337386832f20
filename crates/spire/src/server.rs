//! SPIRE 서버 컨테이너
//!
//! 서버 컨테이너 명세와 `spire-server entry create` 명령 구성을 담당합니다.

use std::collections::BTreeMap;
use std::path::Path;

use spire_testkit_core::types::{Selector, SpiffeId, TrustDomain};
use spire_testkit_runtime::{ContainerSpec, LogAssertion, Mount, OutputSink};

use crate::config::ScenarioConfig;
use crate::defaults;

/// 서버 컨테이너 명세를 생성합니다.
///
/// `config_dir`에는 렌더링된 `server.conf`가 있어야 합니다.
pub fn server_spec(
    config: &ScenarioConfig,
    name: &str,
    network: &str,
    config_dir: &Path,
    labels: &BTreeMap<String, String>,
    output: OutputSink,
) -> ContainerSpec {
    let mut spec = ContainerSpec::new(name, &config.server_image);
    spec.network = Some(network.to_owned());
    spec.network_aliases = vec![defaults::SERVER_ALIAS.to_owned()];
    spec.mounts = vec![
        Mount::bind(config_dir, defaults::SERVER_CONFIG_DIR).read_only(),
        Mount::bind(&config.certs_dir, defaults::CERTS_DIR).read_only(),
    ];
    spec.labels = labels.clone();
    spec.command = Some(vec![
        "-config".to_owned(),
        defaults::SERVER_CONFIG_PATH.to_owned(),
    ]);
    spec.output = output;
    spec.ready_when = Some(LogAssertion::new(
        regex::escape(defaults::SERVER_READY_LOG),
        config.readiness_timeout,
    ));
    spec
}

/// `spire-server entry create` 명령
#[derive(Debug, Clone)]
pub struct EntryCreate {
    parent_id: SpiffeId,
    spiffe_id: SpiffeId,
    selectors: Vec<Selector>,
    federates_with: Vec<TrustDomain>,
}

impl EntryCreate {
    /// 단일 셀렉터로 엔트리를 생성합니다.
    pub fn new(parent_id: SpiffeId, spiffe_id: SpiffeId, selector: Selector) -> Self {
        Self {
            parent_id,
            spiffe_id,
            selectors: vec![selector],
            federates_with: Vec::new(),
        }
    }

    /// 셀렉터를 추가합니다.
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// 페더레이션 대상 트러스트 도메인을 추가합니다.
    pub fn federates_with(mut self, trust_domain: TrustDomain) -> Self {
        self.federates_with.push(trust_domain);
        self
    }

    /// 등록할 SPIFFE ID
    pub fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// 서버 컨테이너 안에서 실행할 argv
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            defaults::SERVER_BIN.to_owned(),
            "entry".to_owned(),
            "create".to_owned(),
            "-parentID".to_owned(),
            self.parent_id.to_string(),
            "-spiffeID".to_owned(),
            self.spiffe_id.to_string(),
        ];
        for selector in &self.selectors {
            argv.push("-selector".to_owned());
            argv.push(selector.to_string());
        }
        for trust_domain in &self.federates_with {
            argv.push("-federatesWith".to_owned());
            argv.push(format!("spiffe://{trust_domain}"));
        }
        argv
    }
}

/// `entry create` 출력에서 엔트리 ID를 찾습니다.
///
/// 출력 형식: `Entry ID         : 5b4c...`
pub fn parse_entry_id(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (key.trim() == "Entry ID" && !value.is_empty()).then(|| value.to_owned())
    })
}
