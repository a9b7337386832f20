//! 컨테이너 런타임 설정
//!
//! [`RuntimeConfig`]는 core의 [`RuntimeSection`](spire_testkit_core::config::RuntimeSection)을
//! 기반으로 런처와 로그 감시기가 사용하는 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use spire_testkit_core::config::TestkitConfig;
//! use spire_testkit_runtime::config::RuntimeConfig;
//!
//! let core_config = TestkitConfig::default();
//! let config = RuntimeConfig::from_core(&core_config.runtime)?;
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// 설정 상한값 상수
const MAX_POLL_INTERVAL_MS: u64 = 10_000;
const MAX_STOP_TIMEOUT_SECS: u64 = 300;
const MAX_TAIL_LINES: usize = 10_000;

/// 이미지 pull 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// 로컬에 없을 때만 pull
    #[default]
    Missing,
    /// 항상 pull
    Always,
    /// pull 하지 않음 (없으면 시작 실패)
    Never,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl FromStr for PullPolicy {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "missing" => Ok(Self::Missing),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            _ => Err(RuntimeError::Config {
                field: "pull_policy".to_owned(),
                reason: format!("'{s}' must be one of: missing, always, never"),
            }),
        }
    }
}

/// 컨테이너 런타임 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Docker 소켓 경로 (비어 있으면 플랫폼 기본값)
    pub docker_socket: String,
    /// 로그 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 컨테이너 정지 유예 시간 (초)
    pub stop_timeout_secs: u64,
    /// 이미지 pull 정책
    pub pull_policy: PullPolicy,
    /// 타임아웃 진단에 포함할 최대 로그 라인 수
    pub max_log_tail_lines: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket: String::new(),
            poll_interval_ms: 200,
            stop_timeout_secs: 10,
            pull_policy: PullPolicy::Missing,
            max_log_tail_lines: 20,
        }
    }
}

impl RuntimeConfig {
    /// core의 `RuntimeSection`에서 런타임 설정을 생성합니다.
    pub fn from_core(
        core: &spire_testkit_core::config::RuntimeSection,
    ) -> Result<Self, RuntimeError> {
        let config = Self {
            docker_socket: core.docker_socket.clone(),
            poll_interval_ms: core.poll_interval_ms,
            stop_timeout_secs: core.stop_timeout_secs,
            pull_policy: core.pull_policy.parse()?,
            max_log_tail_lines: core.max_log_tail_lines,
        };
        config.validate()?;
        Ok(config)
    }

    /// 폴링 주기를 `Duration`으로 반환합니다.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 정지 유예 시간을 `Duration`으로 반환합니다.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(RuntimeError::Config {
                field: "poll_interval_ms".to_owned(),
                reason: format!("must be 1-{MAX_POLL_INTERVAL_MS}"),
            });
        }

        if self.stop_timeout_secs > MAX_STOP_TIMEOUT_SECS {
            return Err(RuntimeError::Config {
                field: "stop_timeout_secs".to_owned(),
                reason: format!("must be 0-{MAX_STOP_TIMEOUT_SECS}"),
            });
        }

        if self.max_log_tail_lines == 0 || self.max_log_tail_lines > MAX_TAIL_LINES {
            return Err(RuntimeError::Config {
                field: "max_log_tail_lines".to_owned(),
                reason: format!("must be 1-{MAX_TAIL_LINES}"),
            });
        }

        Ok(())
    }
}

/// 런타임 설정 빌더
#[derive(Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// Docker 소켓 경로를 설정합니다.
    pub fn docker_socket(mut self, socket: impl Into<String>) -> Self {
        self.config.docker_socket = socket.into();
        self
    }

    /// 폴링 주기(밀리초)를 설정합니다.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// 정지 유예 시간(초)을 설정합니다.
    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stop_timeout_secs = secs;
        self
    }

    /// 이미지 pull 정책을 설정합니다.
    pub fn pull_policy(mut self, policy: PullPolicy) -> Self {
        self.config.pull_policy = policy;
        self
    }

    /// 진단 tail 라인 수를 설정합니다.
    pub fn max_log_tail_lines(mut self, lines: usize) -> Self {
        self.config.max_log_tail_lines = lines;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    pub fn build(self) -> Result<RuntimeConfig, RuntimeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RuntimeConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_copies_fields() {
        let core = spire_testkit_core::config::RuntimeSection {
            pull_policy: "never".to_owned(),
            poll_interval_ms: 50,
            ..Default::default()
        };
        let config = RuntimeConfig::from_core(&core).unwrap();
        assert_eq!(config.pull_policy, PullPolicy::Never);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn from_core_rejects_unknown_pull_policy() {
        let core = spire_testkit_core::config::RuntimeSection {
            pull_policy: "weekly".to_owned(),
            ..Default::default()
        };
        assert!(RuntimeConfig::from_core(&core).is_err());
    }

    #[test]
    fn builder_sets_all_fields() {
        let config = RuntimeConfigBuilder::new()
            .docker_socket("/run/docker.sock")
            .poll_interval_ms(25)
            .stop_timeout_secs(3)
            .pull_policy(PullPolicy::Always)
            .max_log_tail_lines(5)
            .build()
            .unwrap();
        assert_eq!(config.docker_socket, "/run/docker.sock");
        assert_eq!(config.stop_timeout(), Duration::from_secs(3));
        assert_eq!(config.pull_policy, PullPolicy::Always);
        assert_eq!(config.max_log_tail_lines, 5);
    }

    #[test]
    fn builder_rejects_zero_poll_interval() {
        let err = RuntimeConfigBuilder::new()
            .poll_interval_ms(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn pull_policy_roundtrips_display() {
        for policy in [PullPolicy::Missing, PullPolicy::Always, PullPolicy::Never] {
            assert_eq!(policy.to_string().parse::<PullPolicy>().unwrap(), policy);
        }
    }
}
