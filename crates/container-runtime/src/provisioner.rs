//! 리소스 프로비저너 -- 시나리오 범위의 네트워크/볼륨 생성과 해제
//!
//! 이름은 항상 `prefix-<random>` 형식이라 병렬 실행 간 충돌하지 않습니다.
//! [`ResourceProvisioner::release`]는 멱등입니다.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use spire_testkit_core::error::{ResourceError, TestkitError};
use spire_testkit_core::metrics as m;

use crate::docker::ContainerRuntime;
use crate::spec::{SESSION_LABEL, unique_name};

/// 프로비저닝 리소스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// 가상 네트워크
    Network,
    /// 볼륨
    Volume,
}

impl ResourceKind {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Volume => "volume",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 프로비저너가 만든 리소스 공통 인터페이스
pub trait Provisioned {
    /// 리소스 종류
    fn kind(&self) -> ResourceKind;
    /// 런타임상의 이름
    fn name(&self) -> &str;
}

/// 시나리오 범위 네트워크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResource {
    name: String,
}

impl NetworkResource {
    /// 런타임상의 네트워크 이름
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Provisioned for NetworkResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Network
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 시나리오 범위 볼륨
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeResource {
    name: String,
}

impl VolumeResource {
    /// 런타임상의 볼륨 이름
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Provisioned for VolumeResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 네트워크/볼륨 프로비저너
pub struct ResourceProvisioner<R: ContainerRuntime> {
    runtime: Arc<R>,
    labels: BTreeMap<String, String>,
}

impl<R: ContainerRuntime> ResourceProvisioner<R> {
    /// 레이블 없이 프로비저너를 생성합니다.
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            labels: BTreeMap::new(),
        }
    }

    /// 생성하는 모든 리소스에 세션 레이블을 붙입니다.
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.labels
            .insert(SESSION_LABEL.to_owned(), session_id.to_owned());
        self
    }

    /// 생성 시 붙는 레이블
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// 고유한 이름의 네트워크를 생성합니다.
    pub async fn create_network(&self, prefix: &str) -> Result<NetworkResource, TestkitError> {
        let name = unique_name(prefix);
        self.runtime
            .create_network(&name, &self.labels)
            .await
            .map_err(|e| ResourceError::Network {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        record_provisioned(ResourceKind::Network);
        info!(network = %name, "network provisioned");
        Ok(NetworkResource { name })
    }

    /// 고유한 이름의 볼륨을 생성합니다.
    pub async fn create_volume(&self, prefix: &str) -> Result<VolumeResource, TestkitError> {
        let name = unique_name(prefix);
        self.runtime
            .create_volume(&name, &self.labels)
            .await
            .map_err(|e| ResourceError::Volume {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        record_provisioned(ResourceKind::Volume);
        info!(volume = %name, "volume provisioned");
        Ok(VolumeResource { name })
    }

    /// 리소스를 해제합니다. 이미 해제되었거나 존재하지 않으면 no-op 입니다.
    pub async fn release(&self, resource: &impl Provisioned) -> Result<(), TestkitError> {
        self.release_by_name(resource.kind(), resource.name()).await
    }

    /// 이름으로 리소스를 해제합니다.
    pub async fn release_by_name(&self, kind: ResourceKind, name: &str) -> Result<(), TestkitError> {
        let result = match kind {
            ResourceKind::Network => self.runtime.remove_network(name).await.map_err(|e| {
                ResourceError::Network {
                    name: name.to_owned(),
                    reason: e.to_string(),
                }
            }),
            ResourceKind::Volume => self.runtime.remove_volume(name).await.map_err(|e| {
                ResourceError::Volume {
                    name: name.to_owned(),
                    reason: e.to_string(),
                }
            }),
        };
        result?;
        metrics::counter!(m::RESOURCES_RELEASED_TOTAL, m::LABEL_KIND => kind.as_str())
            .increment(1);
        debug!(kind = %kind, name, "resource released");
        Ok(())
    }

    /// 리소스가 런타임에 아직 존재하는지 확인합니다.
    pub async fn exists(&self, resource: &impl Provisioned) -> Result<bool, TestkitError> {
        let exists = match resource.kind() {
            ResourceKind::Network => self.runtime.network_exists(resource.name()).await?,
            ResourceKind::Volume => self.runtime.volume_exists(resource.name()).await?,
        };
        Ok(exists)
    }
}

fn record_provisioned(kind: ResourceKind) {
    metrics::counter!(m::RESOURCES_PROVISIONED_TOTAL, m::LABEL_KIND => kind.as_str())
        .increment(1);
}
