//! 에러 타입 -- 도메인별 에러 정의
//!
//! 시나리오의 어느 단계에서 실패하든 호출자는 하나의 [`TestkitError`]를 받습니다.
//! 자동 재시도는 없으며, 모든 에러는 시나리오를 중단시키는 치명적 에러로 취급합니다.

use std::time::Duration;

/// spire-testkit 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TestkitError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 템플릿 렌더링 에러
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// 컨테이너 시작 실패
    #[error("start error: {0}")]
    Start(#[from] StartError),

    /// 컨테이너 내부 명령 실행 실패
    #[error("exec error: {0}")]
    Exec(#[from] ExecError),

    /// 로그 패턴 대기 시간 초과
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// 네트워크/볼륨/런타임 연결 에러
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// 잘못된 로그 패턴 (정규식 컴파일 실패)
    #[error("invalid log pattern '{pattern}': {reason}")]
    Pattern {
        /// 원본 패턴
        pattern: String,
        /// 컴파일 실패 사유
        reason: String,
    },

    /// 시나리오 종료 에러 -- 실패 지점의 상태와 원인 에러를 함께 전달
    #[error("scenario failed in state '{state}': {source}")]
    Scenario {
        /// 실패 직전 도달한 상태
        state: String,
        /// 원인 에러
        #[source]
        source: Box<TestkitError>,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TestkitError {
    /// 시나리오 래핑을 벗겨 원인 에러를 반환합니다.
    pub fn root(&self) -> &TestkitError {
        match self {
            Self::Scenario { source, .. } => source.root(),
            other => other,
        }
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 템플릿 에러
///
/// 템플릿 문법 오류와 모델에 없는 필드 참조 모두 치명적 에러입니다.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// 템플릿 문법 오류
    #[error("syntax error in template '{template}': {reason}")]
    Syntax { template: String, reason: String },

    /// 렌더링 실패 (정의되지 않은 필드 참조 등)
    #[error("failed to render template '{template}': {reason}")]
    Render { template: String, reason: String },
}

/// 컨테이너 시작 에러
///
/// 설정 오류를 의미하므로 재시도하지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// 이미지 pull 실패
    #[error("failed to pull image '{image}': {reason}")]
    ImagePull { image: String, reason: String },

    /// pull 정책이 never인데 이미지가 없음
    #[error("image '{image}' is not present locally and pull policy is 'never'")]
    ImageMissing { image: String },

    /// 컨테이너 생성 실패
    #[error("failed to create container '{name}': {reason}")]
    Create { name: String, reason: String },

    /// 런타임이 시작을 거부함
    #[error("failed to start container '{name}': {reason}")]
    Rejected { name: String, reason: String },

    /// 현재 상태에서 시작할 수 없음
    #[error("container '{name}' cannot be started from state '{state}'")]
    InvalidState { name: String, state: String },
}

/// 명령 실행 에러
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// 컨테이너가 실행 중이 아님
    #[error("container '{name}' is not running (state: {state})")]
    NotRunning { name: String, state: String },

    /// 0이 아닌 종료 코드
    #[error("command {argv:?} in '{name}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        name: String,
        argv: Vec<String>,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    /// 런타임 호출 실패
    #[error("exec in '{name}' failed: {reason}")]
    Runtime { name: String, reason: String },
}

/// 로그 패턴 대기 시간 초과 에러
///
/// 진단을 위해 마지막으로 관찰한 로그 라인(tail)을 함께 전달합니다.
#[derive(Debug, thiserror::Error)]
#[error(
    "pattern /{pattern}/ not observed in '{container}' within {timeout:?} ({} tail line(s))",
    .tail.len()
)]
pub struct TimeoutError {
    /// 대상 컨테이너 이름
    pub container: String,
    /// 기다린 패턴
    pub pattern: String,
    /// 설정된 타임아웃
    pub timeout: Duration,
    /// 마지막으로 관찰한 로그 라인
    pub tail: Vec<String>,
}

impl TimeoutError {
    /// 사람이 읽을 수 있는 진단 텍스트를 반환합니다. 빈 문자열을 반환하지 않습니다.
    pub fn diagnostics(&self) -> String {
        let mut out = format!(
            "pattern /{}/ not observed in '{}' within {:?}",
            self.pattern, self.container, self.timeout
        );
        if self.tail.is_empty() {
            out.push_str("\n  <no output>");
        } else {
            out.push_str(&format!("\n  last {} line(s):", self.tail.len()));
            for line in &self.tail {
                out.push_str("\n  | ");
                out.push_str(line);
            }
        }
        out
    }
}

/// 네트워크, 볼륨, 런타임 연결 에러
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// 컨테이너 런타임에 연결할 수 없음
    #[error("runtime connection failed: {0}")]
    Connection(String),

    /// 네트워크 작업 실패
    #[error("network '{name}': {reason}")]
    Network { name: String, reason: String },

    /// 볼륨 작업 실패
    #[error("volume '{name}': {reason}")]
    Volume { name: String, reason: String },

    /// 컨테이너 정리 실패
    #[error("container '{name}': {reason}")]
    Container { name: String, reason: String },

    /// 기타 런타임 API 에러
    #[error("runtime api error: {0}")]
    Api(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_timeout(tail: Vec<String>) -> TimeoutError {
        TimeoutError {
            container: "spire-agent-1".to_owned(),
            pattern: "SVID updated".to_owned(),
            timeout: Duration::from_secs(10),
            tail,
        }
    }

    #[test]
    fn template_error_display() {
        let err = TemplateError::Render {
            template: "server.conf".to_owned(),
            reason: "Variable `missing` not found".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("server.conf"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn exec_error_non_zero_display() {
        let err = ExecError::NonZeroExit {
            name: "spire-server".to_owned(),
            argv: vec!["spire-server".to_owned(), "entry".to_owned()],
            exit_code: 1,
            stdout: String::new(),
            stderr: "unknown flag".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exited with code 1"));
        assert!(msg.contains("unknown flag"));
    }

    #[test]
    fn timeout_diagnostics_lists_tail() {
        let err = sample_timeout(vec!["line one".to_owned(), "line two".to_owned()]);
        let diag = err.diagnostics();
        assert!(diag.contains("last 2 line(s)"));
        assert!(diag.contains("| line two"));
    }

    #[test]
    fn timeout_diagnostics_never_empty() {
        let err = sample_timeout(Vec::new());
        let diag = err.diagnostics();
        assert!(!diag.is_empty());
        assert!(diag.contains("<no output>"));
    }

    #[test]
    fn timeout_converts_to_testkit_error() {
        let err: TestkitError = sample_timeout(Vec::new()).into();
        assert!(matches!(err, TestkitError::Timeout(_)));
    }

    #[test]
    fn scenario_root_unwraps_nested_source() {
        let inner: TestkitError = StartError::ImageMissing {
            image: "ghcr.io/spiffe/spire-agent:1.9.6".to_owned(),
        }
        .into();
        let err = TestkitError::Scenario {
            state: "ServerRunning".to_owned(),
            source: Box::new(inner),
        };
        assert!(err.to_string().contains("ServerRunning"));
        assert!(matches!(
            err.root(),
            TestkitError::Start(StartError::ImageMissing { .. })
        ));
    }

    #[test]
    fn resource_error_display() {
        let err = ResourceError::Network {
            name: "example.com-1234".to_owned(),
            reason: "already exists".to_owned(),
        };
        assert!(err.to_string().contains("example.com-1234"));
    }
}
