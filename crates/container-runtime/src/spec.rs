//! 컨테이너 명세
//!
//! [`ContainerSpec`]은 컨테이너 하나를 만들기 위한 불변 설명입니다.
//! 빌더 대신 `ContainerSpec::new` + 구조체 업데이트 문법으로 구성합니다.
//!
//! ```ignore
//! let spec = ContainerSpec {
//!     network: Some(network.name().to_owned()),
//!     privileged: true,
//!     ..ContainerSpec::new("spire-agent-1", "ghcr.io/spiffe/spire-agent:1.9.6")
//! };
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use tokio::sync::mpsc;

use spire_testkit_core::error::StartError;

use crate::log_watcher::LogAssertion;

/// 시나리오 세션 레이블 키. 생성되는 모든 리소스에 붙습니다.
pub const SESSION_LABEL: &str = "org.spire-testkit.session";

/// 접두어 + 랜덤 접미어로 고유한 리소스 이름을 만듭니다.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// 컨테이너 출력 스트림
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    /// 표준 출력
    Stdout,
    /// 표준 에러
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// 컨테이너가 출력한 완성된 한 줄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// 컨테이너 이름
    pub container: String,
    /// 출력 스트림
    pub stream: LogStream,
    /// 개행 문자를 제외한 라인 내용
    pub line: String,
}

/// 컨테이너 출력의 전달 대상
#[derive(Debug, Clone, Default)]
pub enum OutputSink {
    /// 전달하지 않음
    #[default]
    Discard,
    /// `spire_testkit::container` 타깃으로 tracing 이벤트를 발생
    Tracing,
    /// 채널로 전달 (수신측이 닫히면 전달 중단)
    Channel(mpsc::Sender<LogLine>),
}

/// 마운트 원본
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// 이름 있는 볼륨
    Volume(String),
    /// 호스트 경로 바인드
    Bind(PathBuf),
}

/// 컨테이너 마운트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// 원본
    pub source: MountSource,
    /// 컨테이너 내부 경로
    pub target: String,
    /// 읽기 전용 여부
    pub read_only: bool,
}

impl Mount {
    /// 볼륨 마운트를 생성합니다.
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Volume(name.into()),
            target: target.into(),
            read_only: false,
        }
    }

    /// 호스트 경로 바인드 마운트를 생성합니다.
    pub fn bind(path: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Bind(path.into()),
            target: target.into(),
            read_only: false,
        }
    }

    /// 읽기 전용으로 표시합니다.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// PID/cgroup 네임스페이스 공유 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespaceMode {
    /// 컨테이너 전용 네임스페이스
    #[default]
    Private,
    /// 호스트 네임스페이스 공유
    Host,
}

/// 컨테이너 명세
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// 컨테이너 이름 (런타임 전체에서 고유해야 함)
    pub name: String,
    /// 이미지 참조
    pub image: String,
    /// 연결할 네트워크 이름
    pub network: Option<String>,
    /// 네트워크 상의 별칭
    pub network_aliases: Vec<String>,
    /// 마운트 목록
    pub mounts: Vec<Mount>,
    /// 환경변수
    pub env: BTreeMap<String, String>,
    /// 레이블
    pub labels: BTreeMap<String, String>,
    /// privileged 모드
    pub privileged: bool,
    /// PID 네임스페이스 모드
    pub pid_mode: NamespaceMode,
    /// cgroup 네임스페이스 모드
    pub cgroupns_mode: NamespaceMode,
    /// 엔트리포인트 오버라이드
    pub entrypoint: Option<Vec<String>>,
    /// 커맨드 오버라이드
    pub command: Option<Vec<String>>,
    /// 출력 전달 대상
    pub output: OutputSink,
    /// 시작 후 준비 완료로 간주할 로그 조건
    pub ready_when: Option<LogAssertion>,
}

impl ContainerSpec {
    /// 이름과 이미지만 지정된 기본 명세를 생성합니다.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            network: None,
            network_aliases: Vec::new(),
            mounts: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            privileged: false,
            pid_mode: NamespaceMode::Private,
            cgroupns_mode: NamespaceMode::Private,
            entrypoint: None,
            command: None,
            output: OutputSink::Discard,
            ready_when: None,
        }
    }

    /// 런타임에 넘기기 전에 명세를 검증합니다.
    pub fn validate(&self) -> Result<(), StartError> {
        let reject = |reason: String| StartError::Create {
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(reject("container name must not be empty".to_owned()));
        }
        if self.image.is_empty() {
            return Err(reject("image must not be empty".to_owned()));
        }
        if !self.network_aliases.is_empty() && self.network.is_none() {
            return Err(reject("network aliases require a network".to_owned()));
        }
        for mount in &self.mounts {
            if !mount.target.starts_with('/') {
                return Err(reject(format!(
                    "mount target '{}' must be an absolute path",
                    mount.target
                )));
            }
            if matches!(&mount.source, MountSource::Volume(name) if name.is_empty()) {
                return Err(reject("volume name must not be empty".to_owned()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_do_not_collide() {
        let names: std::collections::HashSet<_> =
            (0..1000).map(|_| unique_name("example.com")).collect();
        assert_eq!(names.len(), 1000);
        assert!(names.iter().all(|n| n.starts_with("example.com-")));
    }

    #[test]
    fn new_spec_has_private_namespaces() {
        let spec = ContainerSpec::new("server", "spire-server:1.9.6");
        assert_eq!(spec.pid_mode, NamespaceMode::Private);
        assert_eq!(spec.cgroupns_mode, NamespaceMode::Private);
        assert!(!spec.privileged);
        assert!(matches!(spec.output, OutputSink::Discard));
        spec.validate().unwrap();
    }

    #[test]
    fn validate_rejects_relative_mount_target() {
        let spec = ContainerSpec {
            mounts: vec![Mount::volume("vol", "tmp/spire")],
            ..ContainerSpec::new("agent", "spire-agent:1.9.6")
        };
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn validate_rejects_aliases_without_network() {
        let spec = ContainerSpec {
            network_aliases: vec!["spire-server".to_owned()],
            ..ContainerSpec::new("server", "spire-server:1.9.6")
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_image() {
        assert!(ContainerSpec::new("server", "").validate().is_err());
    }

    #[test]
    fn mount_helpers() {
        let mount = Mount::bind("/etc/certs", "/etc/spire/certs").read_only();
        assert!(mount.read_only);
        assert_eq!(mount.source, MountSource::Bind(PathBuf::from("/etc/certs")));
        assert!(!Mount::volume("v", "/data").read_only);
    }

    #[test]
    fn log_stream_display() {
        assert_eq!(LogStream::Stdout.to_string(), "stdout");
        assert_eq!(LogStream::Stderr.to_string(), "stderr");
    }
}
