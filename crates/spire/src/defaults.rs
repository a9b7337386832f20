//! SPIRE 컨테이너 기본값
//!
//! 컨테이너 내부 경로, 바이너리 위치, 포트, 준비 완료 로그 마커를 정의합니다.
//! 호스트 쪽 값(이미지, 인증서 디렉토리 등)은 `SpireSection` 설정에서 옵니다.

/// 컨테이너 내부 인증서 디렉토리
pub const CERTS_DIR: &str = "/etc/spire/certs";

/// 에이전트 인증서를 검증할 CA 번들 (서버 x509pop)
pub const SERVER_AGENT_CA_PATH: &str = "/etc/spire/certs/agent-cacert.pem";

/// 서버 업스트림 CA 키
pub const SERVER_KEY_PATH: &str = "/etc/spire/certs/server.key.pem";

/// 서버 업스트림 CA 인증서
pub const SERVER_CERT_PATH: &str = "/etc/spire/certs/server.crt.pem";

/// 에이전트 x509pop 키
pub const AGENT_KEY_PATH: &str = "/etc/spire/certs/agent.key.pem";

/// 에이전트 x509pop 인증서
pub const AGENT_CERT_PATH: &str = "/etc/spire/certs/agent.crt.pem";

/// 호스트 인증서 디렉토리에 있어야 하는 파일
pub const REQUIRED_CERT_FILES: [&str; 5] = [
    "agent-cacert.pem",
    "server.key.pem",
    "server.crt.pem",
    "agent.key.pem",
    "agent.crt.pem",
];

/// 서버 설정 디렉토리
pub const SERVER_CONFIG_DIR: &str = "/etc/spire/server";

/// 서버 설정 파일
pub const SERVER_CONFIG_PATH: &str = "/etc/spire/server/server.conf";

/// 에이전트 설정 디렉토리
pub const AGENT_CONFIG_DIR: &str = "/etc/spire/agent";

/// 에이전트 설정 파일
pub const AGENT_CONFIG_PATH: &str = "/etc/spire/agent/agent.conf";

/// 에이전트 공개 API 소켓 디렉토리 (볼륨 마운트 지점)
pub const AGENT_SOCKET_DIR: &str = "/tmp/spire/agent/public";

/// 에이전트 Workload API 소켓
pub const AGENT_SOCKET_PATH: &str = "/tmp/spire/agent/public/api.sock";

/// Docker 소켓 (에이전트의 docker 워크로드 어테스터)
pub const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";

/// 서버 바이너리
pub const SERVER_BIN: &str = "/opt/spire/bin/spire-server";

/// 에이전트 바이너리
pub const AGENT_BIN: &str = "/opt/spire/bin/spire-agent";

/// 네트워크 상의 서버 별칭
pub const SERVER_ALIAS: &str = "spire-server";

/// 서버 API 포트
pub const SERVER_PORT: u16 = 8081;

/// 페더레이션 번들 엔드포인트 포트
pub const BUNDLE_ENDPOINT_PORT: u16 = 8443;

/// 서버 준비 완료 로그
pub const SERVER_READY_LOG: &str = "Starting Server APIs";

/// 에이전트 준비 완료 로그
pub const AGENT_READY_LOG: &str = "Starting Workload and SDS APIs";
