//! 컨테이너 런타임 에러 타입
//!
//! [`RuntimeError`]는 런타임 API 호출 한 번의 실패를 표현합니다.
//! 상위 계층(프로비저너, 런처)은 이를 맥락이 담긴 core 에러로 변환하고,
//! 그 외의 경로에서는 `From<RuntimeError> for TestkitError`로 `?` 전파합니다.

use spire_testkit_core::error::{ConfigError, ResourceError, TestkitError};

/// 컨테이너 런타임 도메인 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// 런타임 API 호출 실패
    #[error("runtime api error: {0}")]
    Api(String),

    /// 런타임(Docker 데몬) 연결 실패
    #[error("runtime connection error: {0}")]
    Connection(String),

    /// 대상 리소스가 존재하지 않음
    #[error("not found: {0}")]
    NotFound(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl From<RuntimeError> for TestkitError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Api(msg) => TestkitError::Resource(ResourceError::Api(msg)),
            RuntimeError::Connection(msg) => {
                TestkitError::Resource(ResourceError::Connection(msg))
            }
            RuntimeError::NotFound(what) => {
                TestkitError::Resource(ResourceError::Api(format!("not found: {what}")))
            }
            RuntimeError::Config { field, reason } => {
                TestkitError::Config(ConfigError::InvalidValue { field, reason })
            }
        }
    }
}
