//! SPIRE 설정 템플릿 렌더러
//!
//! Tera(Jinja2 계열) 문법의 템플릿을 타입이 고정된 모델로 렌더링합니다.
//! 렌더러는 [`ConfigModel`](서버)과 [`AgentConfigModel`](에이전트) 두 모델에 대해서만 제네릭입니다.
//!
//! - 문법 오류: [`TemplateError::Syntax`]
//! - 모델에 없는 필드 참조 등 렌더링 오류: [`TemplateError::Render`]
//!
//! ```ignore
//! let renderer = ConfigTemplateRenderer::new()?;
//! let model = ConfigModel::new(TrustDomain::new("example.com")?, LogLevel::Debug)
//!     .with_federation(FederationEntry::new(TrustDomain::new("example1.org")?, "spire-server1"));
//! let server_conf = renderer.render(&model)?;
//! ```

use std::error::Error as _;
use std::path::Path;

use serde::Serialize;
use tera::{Context, Tera};
use tracing::debug;

use spire_testkit_core::config::FederationSection;
use spire_testkit_core::error::{ConfigError, TemplateError, TestkitError};
use spire_testkit_core::types::{LogLevel, TrustDomain};

use crate::defaults;

/// 내장 서버 템플릿 이름
pub const SERVER_TEMPLATE: &str = "server.conf";

/// 내장 에이전트 템플릿 이름
pub const AGENT_TEMPLATE: &str = "agent.conf";

const SERVER_TEMPLATE_SRC: &str = include_str!("templates/server.conf.tera");
const AGENT_TEMPLATE_SRC: &str = include_str!("templates/agent.conf.tera");

/// 인라인 템플릿 등록 이름
const INLINE_TEMPLATE: &str = "inline";

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ConfigModel {}
    impl Sealed for super::AgentConfigModel {}
}

/// 렌더러가 받는 모델 형태
pub trait TemplateModel: Serialize + sealed::Sealed {
    /// 이 모델의 기본 템플릿 이름
    const TEMPLATE: &'static str;
}

/// 페더레이션 대상
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FederationEntry {
    /// 상대 트러스트 도메인
    pub trust_domain: TrustDomain,
    /// 상대 번들 엔드포인트 호스트
    pub host: String,
}

impl FederationEntry {
    /// 새 페더레이션 항목을 생성합니다.
    pub fn new(trust_domain: TrustDomain, host: impl Into<String>) -> Self {
        Self {
            trust_domain,
            host: host.into(),
        }
    }
}

impl TryFrom<&FederationSection> for FederationEntry {
    type Error = ConfigError;

    fn try_from(section: &FederationSection) -> Result<Self, Self::Error> {
        Ok(Self::new(
            TrustDomain::new(section.trust_domain.as_str())?,
            section.host.as_str(),
        ))
    }
}

/// SPIRE 서버 설정 모델
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigModel {
    /// 트러스트 도메인
    pub trust_domain: TrustDomain,
    /// 로그 레벨
    pub log_level: LogLevel,
    /// x509pop 에이전트 CA 번들 경로
    pub ca_bundle_path: String,
    /// 업스트림 CA 키 경로
    pub key_file_path: String,
    /// 업스트림 CA 인증서 경로
    pub cert_file_path: String,
    /// 서버 API 포트
    pub bind_port: u16,
    /// 번들 엔드포인트 포트 (페더레이션 상대도 같은 포트를 씁니다)
    pub bundle_endpoint_port: u16,
    /// 페더레이션 목록 (순서 유지)
    pub federation: Vec<FederationEntry>,
}

impl ConfigModel {
    /// 컨테이너 기본 인증서 경로로 모델을 생성합니다.
    pub fn new(trust_domain: TrustDomain, log_level: LogLevel) -> Self {
        Self {
            trust_domain,
            log_level,
            ca_bundle_path: defaults::SERVER_AGENT_CA_PATH.to_owned(),
            key_file_path: defaults::SERVER_KEY_PATH.to_owned(),
            cert_file_path: defaults::SERVER_CERT_PATH.to_owned(),
            bind_port: defaults::SERVER_PORT,
            bundle_endpoint_port: defaults::BUNDLE_ENDPOINT_PORT,
            federation: Vec::new(),
        }
    }

    /// 페더레이션 항목을 뒤에 추가합니다.
    pub fn with_federation(mut self, entry: FederationEntry) -> Self {
        self.federation.push(entry);
        self
    }
}

impl TemplateModel for ConfigModel {
    const TEMPLATE: &'static str = SERVER_TEMPLATE;
}

/// SPIRE 에이전트 설정 모델
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentConfigModel {
    /// 트러스트 도메인
    pub trust_domain: TrustDomain,
    /// 로그 레벨
    pub log_level: LogLevel,
    /// 서버 주소
    pub server_address: String,
    /// 서버 포트
    pub server_port: u16,
    /// Workload API 소켓 경로
    pub socket_path: String,
    /// x509pop 키 경로
    pub key_file_path: String,
    /// x509pop 인증서 경로
    pub cert_file_path: String,
}

impl AgentConfigModel {
    /// 컨테이너 기본 경로와 서버 별칭으로 모델을 생성합니다.
    pub fn new(trust_domain: TrustDomain, log_level: LogLevel) -> Self {
        Self {
            trust_domain,
            log_level,
            server_address: defaults::SERVER_ALIAS.to_owned(),
            server_port: defaults::SERVER_PORT,
            socket_path: defaults::AGENT_SOCKET_PATH.to_owned(),
            key_file_path: defaults::AGENT_KEY_PATH.to_owned(),
            cert_file_path: defaults::AGENT_CERT_PATH.to_owned(),
        }
    }
}

impl TemplateModel for AgentConfigModel {
    const TEMPLATE: &'static str = AGENT_TEMPLATE;
}

/// 설정 템플릿 렌더러
pub struct ConfigTemplateRenderer {
    tera: Tera,
}

impl ConfigTemplateRenderer {
    /// 내장 서버/에이전트 템플릿으로 렌더러를 생성합니다.
    pub fn new() -> Result<Self, TemplateError> {
        let mut renderer = Self {
            tera: Tera::default(),
        };
        renderer.add_template(SERVER_TEMPLATE, SERVER_TEMPLATE_SRC)?;
        renderer.add_template(AGENT_TEMPLATE, AGENT_TEMPLATE_SRC)?;
        Ok(renderer)
    }

    /// 템플릿을 등록하거나 같은 이름의 템플릿을 교체합니다.
    pub fn add_template(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.tera
            .add_raw_template(name, source)
            .map_err(|e| TemplateError::Syntax {
                template: name.to_owned(),
                reason: error_chain(&e),
            })?;
        debug!(template = name, "template registered");
        Ok(())
    }

    /// 모델의 기본 템플릿으로 렌더링합니다.
    pub fn render<M: TemplateModel>(&self, model: &M) -> Result<String, TemplateError> {
        self.render_named(M::TEMPLATE, model)
    }

    /// 등록된 템플릿 이름으로 렌더링합니다.
    pub fn render_named<M: TemplateModel>(
        &self,
        name: &str,
        model: &M,
    ) -> Result<String, TemplateError> {
        render_with(&self.tera, name, model)
    }

    /// 렌더링 결과를 파일로 씁니다. 상위 디렉토리가 없으면 생성합니다.
    pub async fn render_to_file<M: TemplateModel>(
        &self,
        model: &M,
        output_path: &Path,
    ) -> Result<(), TestkitError> {
        let rendered = self.render(model)?;
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, rendered).await?;
        debug!(
            template = M::TEMPLATE,
            path = %output_path.display(),
            "template rendered to file"
        );
        Ok(())
    }

    /// 등록된 템플릿 이름 목록
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tera.get_template_names().map(String::from).collect();
        names.sort();
        names
    }
}

/// 템플릿 텍스트를 한 번만 컴파일해 렌더링합니다.
pub fn render_str<M: TemplateModel>(template: &str, model: &M) -> Result<String, TemplateError> {
    let mut tera = Tera::default();
    tera.add_raw_template(INLINE_TEMPLATE, template)
        .map_err(|e| TemplateError::Syntax {
            template: INLINE_TEMPLATE.to_owned(),
            reason: error_chain(&e),
        })?;
    render_with(&tera, INLINE_TEMPLATE, model)
}

fn render_with<M: TemplateModel>(
    tera: &Tera,
    name: &str,
    model: &M,
) -> Result<String, TemplateError> {
    let render_error = |e: tera::Error| TemplateError::Render {
        template: name.to_owned(),
        reason: error_chain(&e),
    };
    let context = Context::from_serialize(model).map_err(render_error)?;
    tera.render(name, &context).map_err(render_error)
}

/// Tera 에러는 원인이 `source()` 체인에 있으므로 전부 이어 붙입니다.
fn error_chain(err: &tera::Error) -> String {
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    reason
}
