//! `spire-testkit render` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use spire_testkit_core::config::TestkitConfig;
use spire_testkit_core::error::ConfigError;
use spire_testkit_core::types::{LogLevel, TrustDomain};
use spire_testkit_spire::{
    AGENT_TEMPLATE, AgentConfigModel, ConfigModel, ConfigTemplateRenderer, FederationEntry,
    SERVER_TEMPLATE, TemplateModel, render_str,
};

use crate::cli::RenderArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `render` command.
pub async fn execute(
    args: RenderArgs,
    config: &TestkitConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let report = render(&args, config).await?;
    writer.render(&report)
}

/// Render the server (or agent) configuration described by `args`.
///
/// Command-line values override the `[spire]` section; `--federate` entries
/// are appended after the configured federation list.
pub async fn render(args: &RenderArgs, config: &TestkitConfig) -> Result<RenderReport, CliError> {
    let trust_domain =
        TrustDomain::new(args.trust_domain.as_deref().unwrap_or(&config.spire.trust_domain))?;
    let log_level: LogLevel = args
        .spire_log_level
        .as_deref()
        .unwrap_or(&config.spire.log_level)
        .parse()?;

    let template_source = match args.template {
        Some(ref path) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
            CliError::Command(format!("failed to read template {}: {}", path.display(), e))
        })?),
        None => None,
    };

    let rendered = if args.agent {
        let model = AgentConfigModel::new(trust_domain.clone(), log_level);
        render_model(&model, template_source.as_deref())?
    } else {
        let mut model = ConfigModel::new(trust_domain.clone(), log_level);
        for section in &config.spire.federation {
            model = model.with_federation(FederationEntry::try_from(section)?);
        }
        for pair in &args.federate {
            model = model.with_federation(parse_federate(pair)?);
        }
        render_model(&model, template_source.as_deref())?
    };

    let template = match args.template {
        Some(ref path) => path.display().to_string(),
        None if args.agent => AGENT_TEMPLATE.to_owned(),
        None => SERVER_TEMPLATE.to_owned(),
    };

    if let Some(ref out) = args.out {
        write_output(out, &rendered).await?;
        info!(template = %template, path = %out.display(), "configuration rendered");
    }

    Ok(RenderReport {
        template,
        trust_domain: trust_domain.to_string(),
        output_path: args.out.as_ref().map(|p| p.display().to_string()),
        rendered,
    })
}

fn render_model<M: TemplateModel>(model: &M, template: Option<&str>) -> Result<String, CliError> {
    let rendered = match template {
        Some(source) => render_str(source, model),
        None => ConfigTemplateRenderer::new().and_then(|renderer| renderer.render(model)),
    };
    rendered.map_err(|e| CliError::Command(e.to_string()))
}

/// Parse a `TRUST_DOMAIN=HOST` pair.
pub fn parse_federate(pair: &str) -> Result<FederationEntry, CliError> {
    let Some((trust_domain, host)) = pair.split_once('=') else {
        return Err(ConfigError::InvalidValue {
            field: "--federate".to_owned(),
            reason: format!("'{pair}' must be TRUST_DOMAIN=HOST"),
        }
        .into());
    };
    if host.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "--federate".to_owned(),
            reason: format!("'{pair}' has an empty host"),
        }
        .into());
    }
    Ok(FederationEntry::new(
        TrustDomain::new(trust_domain.trim())?,
        host.trim(),
    ))
}

async fn write_output(path: &Path, rendered: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, rendered).await?;
    Ok(())
}

/// Result of a render.
///
/// With `--out` the text form is a one-line summary; without it the text
/// form is the raw configuration so it can be piped.
#[derive(Debug, Serialize)]
pub struct RenderReport {
    /// Built-in template name or template file path
    pub template: String,
    /// Trust domain written into the configuration
    pub trust_domain: String,
    /// File the configuration was written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Rendered configuration text
    pub rendered: String,
}

impl Render for RenderReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        match self.output_path {
            Some(ref path) => writeln!(
                w,
                "Rendered {} ({}) to {}",
                self.template.bold(),
                self.trust_domain,
                path
            ),
            None => write!(w, "{}", self.rendered),
        }
    }
}
