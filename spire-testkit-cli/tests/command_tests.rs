//! Integration tests for the `config`, `render` and `run` command handlers.
//!
//! Uses real TOML files in temp directories and a scripted `MockRuntime`
//! in place of the Docker daemon.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use spire_testkit_cli::cli::{OutputFormat, RenderArgs};
use spire_testkit_cli::commands::{config, load_effective, render, run};
use spire_testkit_cli::output::OutputWriter;
use spire_testkit_core::config::TestkitConfig;
use spire_testkit_runtime::{ExecResult, MockRuntime, OutputSink, RuntimeConfigBuilder};
use spire_testkit_spire::ScenarioConfigBuilder;
use spire_testkit_spire::defaults::{REQUIRED_CERT_FILES, SERVER_BIN};

const SERVER_READY: &str = r#"level=info msg="Starting Server APIs" address="[::]:8081" subsystem_name=endpoints"#;
const AGENT_READY: &str = r#"level=info msg="Starting Workload and SDS APIs" subsystem_name=endpoints"#;
const SVID_UPDATED: &str = r#"level=debug msg="SVID updated" entry=5a1c2f3e-0000-4000-8000-000000000001 spiffe_id="spiffe://example.com/workload" subsystem_name=cache_manager"#;

fn render_args() -> RenderArgs {
    RenderArgs {
        trust_domain: None,
        spire_log_level: None,
        federate: Vec::new(),
        template: None,
        agent: false,
        out: None,
    }
}

// =============================================================================
// config
// =============================================================================

#[tokio::test]
async fn test_config_validate_valid_toml() {
    // Given: A valid config file
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("spire-testkit.toml");
    fs::write(
        &config_path,
        r#"
[general]
log_level = "debug"
log_format = "json"

[runtime]
pull_policy = "never"

[spire]
trust_domain = "example.org"

[[spire.federation]]
trust_domain = "example1.org"
host = "spire-server1"
"#,
    )
    .expect("should write config");

    // When: Validating
    let report = config::validate(&config_path).await;

    // Then: Report is valid with no errors
    assert!(report.valid, "errors: {:?}", report.errors);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_config_validate_reports_field_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "[spire]\nworkload_path = \"workload\"\n").expect("write");

    let report = config::validate(&config_path).await;

    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("spire.workload_path"));
}

#[tokio::test]
async fn test_config_validate_missing_file() {
    let report = config::validate(std::path::Path::new("/nonexistent/spire-testkit.toml")).await;
    assert!(!report.valid, "missing file is invalid for `config validate`");
}

#[tokio::test]
async fn test_config_show_json_omits_toml_body() {
    let report = config::show(
        &TestkitConfig::default(),
        std::path::Path::new("spire-testkit.toml"),
        Some("runtime".to_owned()),
    )
    .expect("runtime section");

    let mut buffer = Vec::new();
    OutputWriter::new(OutputFormat::Json)
        .render_to(&report, &mut buffer)
        .expect("json");
    let parsed: serde_json::Value = serde_json::from_slice(&buffer).expect("parse");
    assert_eq!(parsed["section"].as_str(), Some("runtime"));
    assert!(parsed.get("config_toml").is_none());
}

#[tokio::test]
#[serial_test::serial]
async fn test_load_effective_applies_env_without_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let original = std::env::var("SPIRE_TESTKIT_SPIRE_TRUST_DOMAIN").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("SPIRE_TESTKIT_SPIRE_TRUST_DOMAIN", "env.example.org");
    }

    let result = load_effective(&temp_dir.path().join("absent.toml")).await;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("SPIRE_TESTKIT_SPIRE_TRUST_DOMAIN", val),
            None => std::env::remove_var("SPIRE_TESTKIT_SPIRE_TRUST_DOMAIN"),
        }
    }

    let config = result.expect("defaults plus env should validate");
    assert_eq!(config.spire.trust_domain, "env.example.org");
}

// =============================================================================
// render
// =============================================================================

#[tokio::test]
async fn test_render_to_file_creates_parent_dirs() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let out = temp_dir.path().join("server").join("server.conf");

    let mut args = render_args();
    args.trust_domain = Some("example.org".to_owned());
    args.out = Some(out.clone());

    let report = render::render(&args, &TestkitConfig::default())
        .await
        .expect("render");

    let written = fs::read_to_string(&out).expect("file written");
    assert_eq!(written, report.rendered);
    assert!(written.contains("trust_domain = \"example.org\""));
    assert_eq!(report.output_path, Some(out.display().to_string()));
}

#[tokio::test]
async fn test_render_config_federation_precedes_flags() {
    let mut config = TestkitConfig::default();
    config.spire.federation.push(spire_testkit_core::config::FederationSection {
        trust_domain: "example1.org".to_owned(),
        host: "spire-server1".to_owned(),
    });

    let mut args = render_args();
    args.federate = vec!["example2.org=spire-server2".to_owned()];

    let report = render::render(&args, &config).await.expect("render");
    let first = report
        .rendered
        .find("federates_with \"example1.org\"")
        .expect("config entry rendered");
    let second = report
        .rendered
        .find("federates_with \"example2.org\"")
        .expect("flag entry rendered");
    assert!(first < second, "config entries keep their position");
}

#[tokio::test]
async fn test_render_custom_template() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let template = temp_dir.path().join("tiny.conf.tera");
    fs::write(&template, "td={{ trust_domain }} level={{ log_level }}\n").expect("write");

    let mut args = render_args();
    args.template = Some(template);
    args.spire_log_level = Some("warn".to_owned());

    let report = render::render(&args, &TestkitConfig::default())
        .await
        .expect("render");
    assert_eq!(report.rendered, "td=example.com level=WARN\n");
}

#[tokio::test]
async fn test_render_template_with_unknown_field_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let template = temp_dir.path().join("broken.conf.tera");
    fs::write(&template, "{{ no_such_field }}\n").expect("write");

    let mut args = render_args();
    args.template = Some(template);

    let err = render::render(&args, &TestkitConfig::default())
        .await
        .expect_err("unknown field");
    assert_eq!(err.exit_code(), 1);
}

// =============================================================================
// run
// =============================================================================

fn certs_dir() -> TempDir {
    let dir = TempDir::new().expect("should create temp dir");
    for file in REQUIRED_CERT_FILES {
        fs::write(dir.path().join(file), "-----BEGIN CERTIFICATE-----\n").expect("write cert");
    }
    dir
}

#[tokio::test(start_paused = true)]
async fn test_run_with_mock_runtime_reports_every_step() {
    let certs = certs_dir();
    let runtime = Arc::new(
        MockRuntime::new()
            .on_start_emit("spire-server", SERVER_READY)
            .on_start_emit("spire-agent", AGENT_READY)
            .on_exec_emit(
                &[SERVER_BIN, "entry", "create"],
                ExecResult {
                    exit_code: 0,
                    stdout: "Entry ID : 5a1c2f3e-0000-4000-8000-000000000001\n".to_owned(),
                    stderr: String::new(),
                },
                "spire-agent",
                SVID_UPDATED,
            )
            .on_start_emit("workload", "Received 1 svid after 3.1ms"),
    );
    let runtime_config = RuntimeConfigBuilder::new()
        .poll_interval_ms(100)
        .build()
        .expect("runtime config");
    let scenario_config = ScenarioConfigBuilder::new(certs.path())
        .timeouts(Duration::from_secs(10), Duration::from_secs(10))
        .build()
        .expect("scenario config");

    let report = run::run_with(
        Arc::clone(&runtime),
        runtime_config,
        scenario_config,
        OutputSink::Discard,
    )
    .await
    .expect("scenario passes");

    let states: Vec<&str> = report.steps.iter().map(|s| s.state.as_str()).collect();
    assert_eq!(states.first(), Some(&"NetworkReady"));
    assert_eq!(states.last(), Some(&"Complete"));
    assert_eq!(
        report.entry_id.as_deref(),
        Some("5a1c2f3e-0000-4000-8000-000000000001")
    );
    assert_eq!(report.svid_line, "Received 1 svid after 3.1ms");
    assert_eq!(report.released, 5);
    assert!(runtime.live_containers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_with_missing_certificates_exits_with_config_code() {
    let certs = TempDir::new().expect("should create temp dir");
    let runtime = Arc::new(MockRuntime::new());
    let runtime_config = RuntimeConfigBuilder::new().build().expect("runtime config");
    let scenario_config = ScenarioConfigBuilder::new(certs.path())
        .build()
        .expect("scenario config");

    let err = run::run_with(runtime, runtime_config, scenario_config, OutputSink::Discard)
        .await
        .expect_err("no certificates");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_with_server_start_failure_exits_with_scenario_code() {
    let certs = certs_dir();
    let runtime = Arc::new(MockRuntime::new().fail_start("spire-server"));
    let runtime_config = RuntimeConfigBuilder::new().build().expect("runtime config");
    let scenario_config = ScenarioConfigBuilder::new(certs.path())
        .build()
        .expect("scenario config");

    let err = run::run_with(
        Arc::clone(&runtime),
        runtime_config,
        scenario_config,
        OutputSink::Discard,
    )
    .await
    .expect_err("server fails to start");
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("NetworkReady"));
    assert!(runtime.networks().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_with_observe_timeout_shows_agent_log_tail() {
    let certs = certs_dir();
    let runtime = Arc::new(
        MockRuntime::new()
            .on_start_emit("spire-server", SERVER_READY)
            .on_start_emit("spire-agent", AGENT_READY)
            .on_exec_emit(
                &[SERVER_BIN, "entry", "create"],
                ExecResult {
                    exit_code: 0,
                    stdout: "Entry ID : 5a1c2f3e-0000-4000-8000-000000000001\n".to_owned(),
                    stderr: String::new(),
                },
                "spire-agent",
                r#"level=error msg="Failed to sync entries" error="permission denied""#,
            )
            .on_start_emit("workload", "Received 1 svid after 3.1ms"),
    );
    let runtime_config = RuntimeConfigBuilder::new()
        .poll_interval_ms(100)
        .build()
        .expect("runtime config");
    let scenario_config = ScenarioConfigBuilder::new(certs.path())
        .timeouts(Duration::from_secs(2), Duration::from_secs(2))
        .build()
        .expect("scenario config");

    let err = run::run_with(
        Arc::clone(&runtime),
        runtime_config,
        scenario_config,
        OutputSink::Discard,
    )
    .await
    .expect_err("agent never reports the entry");

    assert_eq!(err.exit_code(), 4);
    let shown = err.to_string();
    assert!(shown.contains("EntryRegistered"), "{shown}");
    assert!(
        shown.contains(r#"msg="Failed to sync entries" error="permission denied""#),
        "log tail missing from: {shown}"
    );
    assert!(runtime.live_containers().await.is_empty());
}
