//! SPIRE 시나리오 설정
//!
//! [`ScenarioConfig`]는 core의 [`SpireSection`]을 검증된 도메인 타입으로 옮긴 것입니다.
//!
//! # 사용 예시
//! ```ignore
//! use spire_testkit_core::config::TestkitConfig;
//! use spire_testkit_spire::config::ScenarioConfig;
//!
//! let core_config = TestkitConfig::load("spire-testkit.toml").await?;
//! let config = ScenarioConfig::from_core(&core_config.spire)?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use spire_testkit_core::config::{FederationSection, SpireSection};
use spire_testkit_core::error::ConfigError;
use spire_testkit_core::types::{LogLevel, Selector, SpiffeId, TrustDomain};

use crate::template::FederationEntry;

/// x509pop 에이전트 SPIFFE ID 경로 접두어
const X509POP_AGENT_PREFIX: &str = "/spire/agent/x509pop/cn";

/// 엔드투엔드 시나리오 설정
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// 트러스트 도메인
    pub trust_domain: TrustDomain,
    /// SPIRE 로그 레벨
    pub log_level: LogLevel,
    /// 서버 이미지
    pub server_image: String,
    /// 에이전트/워크로드 이미지
    pub agent_image: String,
    /// x509pop 인증서/키가 있는 호스트 디렉토리
    pub certs_dir: PathBuf,
    /// 에이전트 인증서 CN
    pub agent_common_name: String,
    /// 워크로드 SPIFFE ID 경로
    pub workload_path: String,
    /// 워크로드 셀렉터 (`docker:label:<key>:<value>`)
    pub workload_selector: Selector,
    /// 페더레이션 목록
    pub federation: Vec<FederationEntry>,
    /// 에이전트가 엔트리를 관찰할 때까지 대기 시간
    pub observe_timeout: Duration,
    /// 워크로드가 SVID를 받을 때까지 대기 시간
    pub fetch_timeout: Duration,
    /// 서버/에이전트 준비 대기 시간
    pub readiness_timeout: Duration,
}

impl ScenarioConfig {
    /// core의 `SpireSection`에서 시나리오 설정을 생성합니다.
    pub fn from_core(section: &SpireSection) -> Result<Self, ConfigError> {
        let federation = section
            .federation
            .iter()
            .map(FederationEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self {
            trust_domain: TrustDomain::new(section.trust_domain.as_str())?,
            log_level: section.log_level.parse()?,
            server_image: section.server_image.clone(),
            agent_image: section.agent_image.clone(),
            certs_dir: PathBuf::from(&section.certs_dir),
            agent_common_name: section.agent_common_name.clone(),
            workload_path: section.workload_path.clone(),
            workload_selector: Selector::parse(&section.workload_selector)?,
            federation,
            observe_timeout: Duration::from_secs(section.observe_timeout_secs),
            fetch_timeout: Duration::from_secs(section.fetch_timeout_secs),
            readiness_timeout: Duration::from_secs(section.readiness_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// 에이전트의 SPIFFE ID (엔트리의 parent ID)
    pub fn agent_id(&self) -> Result<SpiffeId, ConfigError> {
        self.trust_domain.spiffe_id(&format!(
            "{X509POP_AGENT_PREFIX}/{}",
            self.agent_common_name
        ))
    }

    /// 워크로드 SPIFFE ID
    pub fn workload_id(&self) -> Result<SpiffeId, ConfigError> {
        self.trust_domain.spiffe_id(&self.workload_path)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_image.is_empty() {
            return Err(invalid("spire.server_image", "must not be empty"));
        }
        if self.agent_image.is_empty() {
            return Err(invalid("spire.agent_image", "must not be empty"));
        }
        if self.certs_dir.as_os_str().is_empty() {
            return Err(invalid(
                "spire.certs_dir",
                "must point at a directory holding the x509pop certificates",
            ));
        }
        if self.agent_common_name.is_empty() || self.agent_common_name.contains('/') {
            return Err(invalid(
                "spire.agent_common_name",
                "must be non-empty and contain no '/'",
            ));
        }
        if self.workload_selector.as_docker_label().is_none() {
            return Err(invalid(
                "spire.workload_selector",
                "must be a docker:label:<key>:<value> selector",
            ));
        }
        self.agent_id()?;
        self.workload_id()?;

        for (field, value) in [
            ("spire.observe_timeout_secs", self.observe_timeout),
            ("spire.fetch_timeout_secs", self.fetch_timeout),
            ("spire.readiness_timeout_secs", self.readiness_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than 0"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// 시나리오 설정 빌더
///
/// `SpireSection` 기본값에서 시작하며 `build()`에서 한 번에 검증합니다.
pub struct ScenarioConfigBuilder {
    section: SpireSection,
    observe_timeout: Option<Duration>,
    fetch_timeout: Option<Duration>,
    readiness_timeout: Option<Duration>,
}

impl ScenarioConfigBuilder {
    /// 인증서 디렉토리를 필수로 받아 빌더를 생성합니다.
    pub fn new(certs_dir: impl Into<PathBuf>) -> Self {
        Self {
            section: SpireSection {
                certs_dir: certs_dir.into().to_string_lossy().into_owned(),
                ..SpireSection::default()
            },
            observe_timeout: None,
            fetch_timeout: None,
            readiness_timeout: None,
        }
    }

    /// 트러스트 도메인을 설정합니다.
    pub fn trust_domain(mut self, trust_domain: TrustDomain) -> Self {
        self.section.trust_domain = trust_domain.to_string();
        self
    }

    /// 로그 레벨을 설정합니다.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.section.log_level = level.as_str().to_owned();
        self
    }

    /// 서버/에이전트 이미지를 설정합니다.
    pub fn images(mut self, server: impl Into<String>, agent: impl Into<String>) -> Self {
        self.section.server_image = server.into();
        self.section.agent_image = agent.into();
        self
    }

    /// 워크로드 셀렉터를 설정합니다.
    pub fn workload_selector(mut self, selector: Selector) -> Self {
        self.section.workload_selector = selector.to_string();
        self
    }

    /// 페더레이션 항목을 추가합니다.
    pub fn federate_with(mut self, entry: FederationEntry) -> Self {
        self.section.federation.push(FederationSection {
            trust_domain: entry.trust_domain.to_string(),
            host: entry.host,
        });
        self
    }

    /// 관찰/fetch 대기 시간을 설정합니다.
    pub fn timeouts(mut self, observe: Duration, fetch: Duration) -> Self {
        self.observe_timeout = Some(observe);
        self.fetch_timeout = Some(fetch);
        self
    }

    /// 서버/에이전트 준비 대기 시간을 설정합니다.
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = Some(timeout);
        self
    }

    /// 설정을 검증하고 빌드합니다.
    pub fn build(self) -> Result<ScenarioConfig, ConfigError> {
        let mut config = ScenarioConfig::from_core(&self.section)?;
        if let Some(timeout) = self.observe_timeout {
            config.observe_timeout = timeout;
        }
        if let Some(timeout) = self.fetch_timeout {
            config.fetch_timeout = timeout;
        }
        if let Some(timeout) = self.readiness_timeout {
            config.readiness_timeout = timeout;
        }
        config.validate()?;
        Ok(config)
    }
}
