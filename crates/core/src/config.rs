//! 설정 관리 -- spire-testkit.toml 파싱 및 런타임 설정
//!
//! [`TestkitConfig`]는 모든 크레이트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SPIRE_TESTKIT_SPIRE_TRUST_DOMAIN=example.org` 형식)
//! 3. 설정 파일 (`spire-testkit.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), spire_testkit_core::error::TestkitError> {
//! use spire_testkit_core::config::TestkitConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TestkitConfig::load("spire-testkit.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TestkitConfig::parse("[spire]\ntrust_domain = \"example.org\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TestkitError};
use crate::types::{LogLevel, Selector, TrustDomain};

/// 기본 SPIRE 이미지 버전
pub const DEFAULT_SPIRE_VERSION: &str = "1.9.6";

/// 설정 상한값 상수
const MAX_POLL_INTERVAL_MS: u64 = 10_000;
const MAX_STOP_TIMEOUT_SECS: u64 = 300;
const MAX_WAIT_TIMEOUT_SECS: u64 = 3600;
const MAX_TAIL_LINES: usize = 10_000;

/// spire-testkit 통합 설정
///
/// `spire-testkit.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 크레이트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestkitConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 컨테이너 런타임 설정
    #[serde(default)]
    pub runtime: RuntimeSection,
    /// SPIRE 시나리오 설정
    #[serde(default)]
    pub spire: SpireSection,
}

impl TestkitConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TestkitError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TestkitError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TestkitError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TestkitError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TestkitError> {
        toml::from_str(toml_str).map_err(|e| {
            TestkitError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SPIRE_TESTKIT_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SPIRE_TESTKIT_GENERAL_LOG_LEVEL");
        override_string(
            &mut self.general.log_format,
            "SPIRE_TESTKIT_GENERAL_LOG_FORMAT",
        );

        // Runtime
        override_string(
            &mut self.runtime.docker_socket,
            "SPIRE_TESTKIT_RUNTIME_DOCKER_SOCKET",
        );
        override_u64(
            &mut self.runtime.poll_interval_ms,
            "SPIRE_TESTKIT_RUNTIME_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.runtime.stop_timeout_secs,
            "SPIRE_TESTKIT_RUNTIME_STOP_TIMEOUT_SECS",
        );
        override_string(
            &mut self.runtime.pull_policy,
            "SPIRE_TESTKIT_RUNTIME_PULL_POLICY",
        );
        override_usize(
            &mut self.runtime.max_log_tail_lines,
            "SPIRE_TESTKIT_RUNTIME_MAX_LOG_TAIL_LINES",
        );

        // SPIRE
        override_string(
            &mut self.spire.server_image,
            "SPIRE_TESTKIT_SPIRE_SERVER_IMAGE",
        );
        override_string(&mut self.spire.agent_image, "SPIRE_TESTKIT_SPIRE_AGENT_IMAGE");
        override_string(
            &mut self.spire.trust_domain,
            "SPIRE_TESTKIT_SPIRE_TRUST_DOMAIN",
        );
        override_string(&mut self.spire.log_level, "SPIRE_TESTKIT_SPIRE_LOG_LEVEL");
        override_string(&mut self.spire.certs_dir, "SPIRE_TESTKIT_SPIRE_CERTS_DIR");
        override_string(
            &mut self.spire.agent_common_name,
            "SPIRE_TESTKIT_SPIRE_AGENT_COMMON_NAME",
        );
        override_string(
            &mut self.spire.workload_path,
            "SPIRE_TESTKIT_SPIRE_WORKLOAD_PATH",
        );
        override_string(
            &mut self.spire.workload_selector,
            "SPIRE_TESTKIT_SPIRE_WORKLOAD_SELECTOR",
        );
        override_u64(
            &mut self.spire.observe_timeout_secs,
            "SPIRE_TESTKIT_SPIRE_OBSERVE_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.spire.fetch_timeout_secs,
            "SPIRE_TESTKIT_SPIRE_FETCH_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.spire.readiness_timeout_secs,
            "SPIRE_TESTKIT_SPIRE_READINESS_TIMEOUT_SECS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TestkitError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.runtime.poll_interval_ms == 0 || self.runtime.poll_interval_ms > MAX_POLL_INTERVAL_MS
        {
            return Err(invalid(
                "runtime.poll_interval_ms",
                format!("must be 1-{MAX_POLL_INTERVAL_MS}"),
            ));
        }

        if self.runtime.stop_timeout_secs > MAX_STOP_TIMEOUT_SECS {
            return Err(invalid(
                "runtime.stop_timeout_secs",
                format!("must be 0-{MAX_STOP_TIMEOUT_SECS}"),
            ));
        }

        let valid_policies = ["missing", "always", "never"];
        if !valid_policies.contains(&self.runtime.pull_policy.as_str()) {
            return Err(invalid(
                "runtime.pull_policy",
                format!("must be one of: {}", valid_policies.join(", ")),
            ));
        }

        if self.runtime.max_log_tail_lines == 0 || self.runtime.max_log_tail_lines > MAX_TAIL_LINES
        {
            return Err(invalid(
                "runtime.max_log_tail_lines",
                format!("must be 1-{MAX_TAIL_LINES}"),
            ));
        }

        if self.spire.server_image.is_empty() {
            return Err(invalid("spire.server_image", "must not be empty".to_owned()));
        }
        if self.spire.agent_image.is_empty() {
            return Err(invalid("spire.agent_image", "must not be empty".to_owned()));
        }

        TrustDomain::new(self.spire.trust_domain.as_str()).map_err(TestkitError::Config)?;
        self.spire
            .log_level
            .parse::<LogLevel>()
            .map_err(TestkitError::Config)?;
        Selector::parse(&self.spire.workload_selector).map_err(TestkitError::Config)?;

        if !self.spire.workload_path.starts_with('/') {
            return Err(invalid(
                "spire.workload_path",
                "must start with '/'".to_owned(),
            ));
        }

        for (field, value) in [
            ("spire.observe_timeout_secs", self.spire.observe_timeout_secs),
            ("spire.fetch_timeout_secs", self.spire.fetch_timeout_secs),
            (
                "spire.readiness_timeout_secs",
                self.spire.readiness_timeout_secs,
            ),
        ] {
            if value == 0 || value > MAX_WAIT_TIMEOUT_SECS {
                return Err(invalid(field, format!("must be 1-{MAX_WAIT_TIMEOUT_SECS}")));
            }
        }

        for (idx, entry) in self.spire.federation.iter().enumerate() {
            TrustDomain::new(entry.trust_domain.as_str()).map_err(|e| {
                invalid(&format!("spire.federation[{idx}].trust_domain"), e.to_string())
            })?;
            if entry.host.is_empty() {
                return Err(invalid(
                    &format!("spire.federation[{idx}].host"),
                    "must not be empty".to_owned(),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> TestkitError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 컨테이너 런타임 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Docker 소켓 경로 (비어 있으면 플랫폼 기본값)
    pub docker_socket: String,
    /// 로그 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 컨테이너 정지 유예 시간 (초)
    pub stop_timeout_secs: u64,
    /// 이미지 pull 정책 (missing, always, never)
    pub pull_policy: String,
    /// 타임아웃 진단에 포함할 최대 로그 라인 수
    pub max_log_tail_lines: usize,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            docker_socket: String::new(),
            poll_interval_ms: 200,
            stop_timeout_secs: 10,
            pull_policy: "missing".to_owned(),
            max_log_tail_lines: 20,
        }
    }
}

/// 페더레이션 대상 트러스트 도메인
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationSection {
    /// 상대 트러스트 도메인
    pub trust_domain: String,
    /// 상대 번들 엔드포인트 호스트
    pub host: String,
}

/// SPIRE 시나리오 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpireSection {
    /// SPIRE 서버 이미지
    pub server_image: String,
    /// SPIRE 에이전트 이미지 (워크로드 컨테이너도 이 이미지를 사용)
    pub agent_image: String,
    /// 트러스트 도메인
    pub trust_domain: String,
    /// SPIRE 로그 레벨 (DEBUG, INFO, WARN, ERROR)
    pub log_level: String,
    /// x509pop 인증서/키가 들어 있는 호스트 디렉토리
    pub certs_dir: String,
    /// 에이전트 인증서의 CN
    pub agent_common_name: String,
    /// 워크로드 SPIFFE ID 경로
    pub workload_path: String,
    /// 워크로드 엔트리 셀렉터
    pub workload_selector: String,
    /// 에이전트가 엔트리를 관찰할 때까지 대기 시간 (초)
    pub observe_timeout_secs: u64,
    /// 워크로드가 SVID를 받을 때까지 대기 시간 (초)
    pub fetch_timeout_secs: u64,
    /// 서버/에이전트 준비 대기 시간 (초)
    pub readiness_timeout_secs: u64,
    /// 페더레이션 목록
    pub federation: Vec<FederationSection>,
}

impl Default for SpireSection {
    fn default() -> Self {
        Self {
            server_image: format!("ghcr.io/spiffe/spire-server:{DEFAULT_SPIRE_VERSION}"),
            agent_image: format!("ghcr.io/spiffe/spire-agent:{DEFAULT_SPIRE_VERSION}"),
            trust_domain: "example.com".to_owned(),
            log_level: "DEBUG".to_owned(),
            certs_dir: String::new(),
            agent_common_name: "agent.example.com".to_owned(),
            workload_path: "/workload".to_owned(),
            workload_selector: "docker:label:com.example:workload".to_owned(),
            observe_timeout_secs: 10,
            fetch_timeout_secs: 10,
            readiness_timeout_secs: 30,
            federation: Vec::new(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = TestkitConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.runtime.poll_interval_ms, 200);
        assert_eq!(config.runtime.pull_policy, "missing");
        assert_eq!(config.spire.trust_domain, "example.com");
        assert_eq!(config.spire.observe_timeout_secs, 10);
        assert!(config.spire.federation.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        TestkitConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = TestkitConfig::parse("").unwrap();
        assert_eq!(config.spire.workload_path, "/workload");
        assert_eq!(config.runtime.stop_timeout_secs, 10);
    }

    #[test]
    fn parses_federation_entries_in_order() {
        let toml = r#"
[[spire.federation]]
trust_domain = "example1.org"
host = "spire-server1"

[[spire.federation]]
trust_domain = "example2.org"
host = "spire-server2"
"#;
        let config = TestkitConfig::parse(toml).unwrap();
        assert_eq!(config.spire.federation.len(), 2);
        assert_eq!(config.spire.federation[0].host, "spire-server1");
        assert_eq!(config.spire.federation[1].trust_domain, "example2.org");
        config.validate().unwrap();
    }

    #[test]
    fn invalid_toml_returns_parse_error() {
        let err = TestkitConfig::parse("[spire\ntrust_domain = 1").unwrap_err();
        assert!(matches!(
            err,
            TestkitError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let mut config = TestkitConfig::default();
        config.runtime.poll_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("runtime.poll_interval_ms"));
    }

    #[test]
    fn validate_rejects_unknown_pull_policy() {
        let mut config = TestkitConfig::default();
        config.runtime.pull_policy = "sometimes".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_trust_domain() {
        let mut config = TestkitConfig::default();
        config.spire.trust_domain = "Not A Domain".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_selector() {
        let mut config = TestkitConfig::default();
        config.spire.workload_selector = "docker".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_observe_timeout() {
        let mut config = TestkitConfig::default();
        config.spire.observe_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("spire.observe_timeout_secs"));
    }

    #[test]
    fn validate_rejects_federation_without_host() {
        let mut config = TestkitConfig::default();
        config.spire.federation.push(FederationSection {
            trust_domain: "example1.org".to_owned(),
            host: String::new(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("spire.federation[0].host"));
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut config = TestkitConfig::default();
        config.general.log_format = "xml".to_owned();
        assert!(config.validate().is_err());
    }
}
