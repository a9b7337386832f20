//! spire-testkit -- SPIRE integration test harness CLI

use clap::Parser;

use spire_testkit_cli::cli::Cli;
use spire_testkit_cli::commands;
use spire_testkit_cli::logging::init_tracing;
use spire_testkit_cli::output::OutputWriter;
use spire_testkit_core::config::{GeneralConfig, TestkitConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 설정 파일이 없거나 깨져 있어도 로깅은 기본값으로 시작합니다.
    // 실제 설정 오류는 각 명령에서 보고합니다.
    let mut general = TestkitConfig::from_file(&cli.config)
        .await
        .map(|config| config.general)
        .unwrap_or_else(|_| GeneralConfig::default());
    if let Some(ref level) = cli.log_level {
        general.log_level = level.clone();
    }
    init_tracing(&general)?;
    spire_testkit_core::metrics::describe_all();

    let writer = OutputWriter::new(cli.output);
    if let Err(err) = commands::dispatch(cli, &writer).await {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }

    Ok(())
}
