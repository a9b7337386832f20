//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::histogram!()` 매크로를 호출합니다. 익스포터 설치는 호출자의 몫입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `spire_testkit_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(spire_testkit_core::metrics::CONTAINERS_STARTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 리소스 종류 레이블 키 (network, volume, container)
pub const LABEL_KIND: &str = "kind";

/// 결과 레이블 키 (success, failure, matched, timeout)
pub const LABEL_RESULT: &str = "result";

/// 시나리오 단계 레이블 키
pub const LABEL_STEP: &str = "step";

// ─── 리소스 메트릭 ──────────────────────────────────────────────────

/// 생성된 네트워크/볼륨 수 (counter, label: kind)
pub const RESOURCES_PROVISIONED_TOTAL: &str = "spire_testkit_resources_provisioned_total";

/// 해제된 리소스 수 (counter, label: kind)
pub const RESOURCES_RELEASED_TOTAL: &str = "spire_testkit_resources_released_total";

// ─── 컨테이너 메트릭 ────────────────────────────────────────────────

/// 시작된 컨테이너 수 (counter)
pub const CONTAINERS_STARTED_TOTAL: &str = "spire_testkit_containers_started_total";

/// 시작 실패 수 (counter)
pub const CONTAINER_START_FAILURES_TOTAL: &str = "spire_testkit_container_start_failures_total";

/// exec 호출 수 (counter, label: result)
pub const EXECS_TOTAL: &str = "spire_testkit_execs_total";

// ─── 로그 대기 메트릭 ───────────────────────────────────────────────

/// 로그 패턴 대기 수 (counter, label: result)
pub const LOG_WAITS_TOTAL: &str = "spire_testkit_log_waits_total";

/// 로그 패턴 대기 시간 (histogram, 초)
pub const LOG_WAIT_DURATION_SECONDS: &str = "spire_testkit_log_wait_duration_seconds";

// ─── 시나리오 메트릭 ────────────────────────────────────────────────

/// 완료된 시나리오 단계 수 (counter, label: step)
pub const SCENARIO_STEPS_TOTAL: &str = "spire_testkit_scenario_steps_total";

/// 시나리오 실행 수 (counter, label: result)
pub const SCENARIOS_TOTAL: &str = "spire_testkit_scenarios_total";

/// 전체 메트릭 이름 목록
pub const ALL_METRIC_NAMES: [&str; 9] = [
    RESOURCES_PROVISIONED_TOTAL,
    RESOURCES_RELEASED_TOTAL,
    CONTAINERS_STARTED_TOTAL,
    CONTAINER_START_FAILURES_TOTAL,
    EXECS_TOTAL,
    LOG_WAITS_TOTAL,
    LOG_WAIT_DURATION_SECONDS,
    SCENARIO_STEPS_TOTAL,
    SCENARIOS_TOTAL,
];

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 레코더가 설치되지 않았다면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        RESOURCES_PROVISIONED_TOTAL,
        "Networks and volumes created for scenarios"
    );
    describe_counter!(
        RESOURCES_RELEASED_TOTAL,
        "Networks, volumes and containers released after scenarios"
    );
    describe_counter!(CONTAINERS_STARTED_TOTAL, "Containers successfully started");
    describe_counter!(
        CONTAINER_START_FAILURES_TOTAL,
        "Containers that failed to pull, create, start or become ready"
    );
    describe_counter!(EXECS_TOTAL, "Commands executed inside containers");
    describe_counter!(LOG_WAITS_TOTAL, "Log pattern waits by outcome");
    describe_histogram!(
        LOG_WAIT_DURATION_SECONDS,
        "Time spent waiting for a log pattern in seconds"
    );
    describe_counter!(SCENARIO_STEPS_TOTAL, "Scenario state transitions reached");
    describe_counter!(SCENARIOS_TOTAL, "Scenario runs by outcome");
}
