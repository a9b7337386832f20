//! `spire-testkit run` command handler

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use spire_testkit_core::config::TestkitConfig;
use spire_testkit_runtime::{BollardRuntime, ContainerRuntime, OutputSink, RuntimeConfig};
use spire_testkit_spire::{ScenarioConfig, ScenarioOrchestrator, ScenarioReport};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `run` command against the Docker daemon.
pub async fn execute(
    args: RunArgs,
    config: &TestkitConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = apply_overrides(&args, config)?;
    let runtime_config = RuntimeConfig::from_core(&config.runtime)?;
    let scenario_config = ScenarioConfig::from_core(&config.spire)?;
    let runtime = BollardRuntime::from_config(&runtime_config)?;

    let output = if args.follow {
        OutputSink::Tracing
    } else {
        OutputSink::Discard
    };

    let report = run_with(Arc::new(runtime), runtime_config, scenario_config, output).await?;
    writer.render(&report)
}

/// Fold `--trust-domain` and `--certs-dir` into a copy of the configuration.
pub fn apply_overrides(args: &RunArgs, config: &TestkitConfig) -> Result<TestkitConfig, CliError> {
    let mut config = config.clone();
    if let Some(ref trust_domain) = args.trust_domain {
        config.spire.trust_domain = trust_domain.clone();
    }
    if let Some(ref certs_dir) = args.certs_dir {
        config.spire.certs_dir = certs_dir.display().to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Run the scenario on any runtime and summarise it.
pub async fn run_with<R: ContainerRuntime>(
    runtime: Arc<R>,
    runtime_config: RuntimeConfig,
    scenario_config: ScenarioConfig,
    output: OutputSink,
) -> Result<RunReport, CliError> {
    let orchestrator =
        ScenarioOrchestrator::new(runtime, runtime_config, scenario_config)?.with_output(output);
    info!(session = orchestrator.session_id(), "running scenario");

    let report = orchestrator.run().await?;
    Ok(RunReport::from(&report))
}

/// One state transition.
#[derive(Debug, Serialize)]
pub struct StepEntry {
    pub state: String,
    pub elapsed_ms: u64,
}

/// Result of a successful scenario run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub session_id: String,
    pub trust_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    pub steps: Vec<StepEntry>,
    pub svid_line: String,
    pub released: usize,
    pub elapsed_ms: u64,
}

impl From<&ScenarioReport> for RunReport {
    fn from(report: &ScenarioReport) -> Self {
        Self {
            session_id: report.session_id.clone(),
            trust_domain: report.trust_domain.to_string(),
            entry_id: report.entry_id.clone(),
            steps: report
                .transitions
                .iter()
                .map(|step| StepEntry {
                    state: step.state.to_string(),
                    elapsed_ms: millis(step.elapsed),
                })
                .collect(),
            svid_line: report.svid_line.clone(),
            released: report.released,
            elapsed_ms: millis(report.elapsed()),
        }
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Render for RunReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Scenario {} ({})",
            "PASSED".green().bold(),
            self.trust_domain.bold()
        )?;
        writeln!(w, "  Session:  {}", self.session_id)?;
        writeln!(
            w,
            "  Entry ID: {}",
            self.entry_id.as_deref().unwrap_or("(not reported)")
        )?;
        writeln!(w)?;

        for step in &self.steps {
            writeln!(w, "  {:>8}ms  {}", step.elapsed_ms, step.state)?;
        }

        writeln!(w)?;
        writeln!(w, "  SVID:     {}", self.svid_line.dimmed())?;
        writeln!(w, "  Released: {} resources", self.released)?;
        writeln!(w, "  Elapsed:  {}ms", self.elapsed_ms)?;

        Ok(())
    }
}
