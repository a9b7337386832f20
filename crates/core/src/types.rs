//! 도메인 타입 -- SPIFFE 식별자, 트러스트 도메인, 셀렉터, 로그 레벨
//!
//! 시나리오와 템플릿 모델이 공유하는 값 타입을 정의합니다.
//! 모든 타입은 생성 시점에 검증되며 이후 불변입니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// SPIFFE URI 스킴 접두어
pub const SPIFFE_SCHEME: &str = "spiffe://";

/// 트러스트 도메인 최대 길이 (바이트)
const MAX_TRUST_DOMAIN_LEN: usize = 255;

/// SPIFFE 트러스트 도메인
///
/// 소문자, 숫자, `.`, `-`, `_`만 허용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrustDomain(String);

impl TrustDomain {
    /// 트러스트 도메인을 검증하여 생성합니다.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_TRUST_DOMAIN_LEN {
            return Err(ConfigError::InvalidValue {
                field: "trust_domain".to_owned(),
                reason: format!("length must be 1-{MAX_TRUST_DOMAIN_LEN}, got {}", name.len()),
            });
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')))
        {
            return Err(ConfigError::InvalidValue {
                field: "trust_domain".to_owned(),
                reason: format!("invalid character '{c}' in '{name}'"),
            });
        }
        Ok(Self(name))
    }

    /// 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 이 트러스트 도메인 아래의 SPIFFE ID를 생성합니다.
    pub fn spiffe_id(&self, path: &str) -> Result<SpiffeId, ConfigError> {
        SpiffeId::new(self.clone(), path)
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TrustDomain {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TrustDomain> for String {
    fn from(td: TrustDomain) -> Self {
        td.0
    }
}

/// SPIFFE ID (`spiffe://<trust-domain>/<path>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

impl SpiffeId {
    /// 트러스트 도메인과 경로로 SPIFFE ID를 생성합니다.
    ///
    /// 경로는 비어 있거나 `/`로 시작해야 하며, 빈 세그먼트나 `.`/`..` 세그먼트를 허용하지 않습니다.
    pub fn new(trust_domain: TrustDomain, path: &str) -> Result<Self, ConfigError> {
        if !path.is_empty() {
            let Some(rest) = path.strip_prefix('/') else {
                return Err(invalid_path(path, "must start with '/'"));
            };
            for segment in rest.split('/') {
                match segment {
                    "" => return Err(invalid_path(path, "empty segment")),
                    "." | ".." => return Err(invalid_path(path, "dot segment")),
                    _ => {}
                }
            }
        }
        Ok(Self {
            trust_domain,
            path: path.to_owned(),
        })
    }

    /// `spiffe://td/path` 형식의 문자열을 파싱합니다.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let rest = uri.strip_prefix(SPIFFE_SCHEME).ok_or_else(|| ConfigError::InvalidValue {
            field: "spiffe_id".to_owned(),
            reason: format!("'{uri}' does not start with {SPIFFE_SCHEME}"),
        })?;
        let (td, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        Self::new(TrustDomain::new(td)?, path)
    }

    /// 트러스트 도메인을 반환합니다.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// 경로 부분을 반환합니다.
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn invalid_path(path: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: "spiffe_id.path".to_owned(),
        reason: format!("'{path}': {reason}"),
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SPIFFE_SCHEME}{}{}", self.trust_domain, self.path)
    }
}

impl FromStr for SpiffeId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 워크로드 셀렉터 (`<type>:<key>:<value>`)
///
/// 값 부분에는 `:`가 포함될 수 있습니다 (예: `docker:label:com.example:workload`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    kind: String,
    key: String,
    value: String,
}

impl Selector {
    /// `<type>:<key>:<value>` 문자열을 파싱합니다.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(key), Some(value))
                if !kind.is_empty() && !key.is_empty() && !value.is_empty() =>
            {
                Ok(Self {
                    kind: kind.to_owned(),
                    key: key.to_owned(),
                    value: value.to_owned(),
                })
            }
            _ => Err(ConfigError::InvalidValue {
                field: "selector".to_owned(),
                reason: format!("'{s}' is not of the form <type>:<key>:<value>"),
            }),
        }
    }

    /// Docker 라벨 셀렉터를 생성합니다.
    pub fn docker_label(label: &str, value: &str) -> Self {
        Self {
            kind: "docker".to_owned(),
            key: "label".to_owned(),
            value: format!("{label}:{value}"),
        }
    }

    /// 셀렉터 타입 (`docker`, `unix`, ...)
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// 셀렉터 키
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 셀렉터 값
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Docker 라벨 셀렉터라면 `(label, value)`를 반환합니다.
    pub fn as_docker_label(&self) -> Option<(&str, &str)> {
        if self.kind == "docker" && self.key == "label" {
            self.value.split_once(':')
        } else {
            None
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.key, self.value)
    }
}

impl TryFrom<String> for Selector {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(s: Selector) -> Self {
        s.to_string()
    }
}

/// SPIRE 로그 레벨
///
/// SPIRE 설정 파일에 쓰이는 대문자 표기로 직렬화됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// 디버그
    #[default]
    Debug,
    /// 정보
    Info,
    /// 경고
    Warn,
    /// 에러
    Error,
}

impl LogLevel {
    /// SPIRE 설정 표기를 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            _ => Err(ConfigError::InvalidValue {
                field: "log_level".to_owned(),
                reason: format!("'{s}' must be one of: DEBUG, INFO, WARN, ERROR"),
            }),
        }
    }
}
