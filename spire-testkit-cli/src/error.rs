//! CLI-specific error types and exit code mapping

use spire_testkit_core::error::{ConfigError, ResourceError, TestkitError};
use spire_testkit_runtime::RuntimeError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Cannot connect to the container runtime.
    #[error("container runtime not reachable: {0}")]
    RuntimeUnavailable(String),

    /// The end-to-end scenario failed.
    #[error("{0}")]
    Scenario(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                         |
    /// |------|---------------------------------|
    /// | 0    | Success                         |
    /// | 1    | General / command error         |
    /// | 2    | Configuration error             |
    /// | 3    | Container runtime unreachable   |
    /// | 4    | Scenario failed                 |
    /// | 10   | IO error                        |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::RuntimeUnavailable(_) => 3,
            Self::Scenario(_) => 4,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) => 1,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<RuntimeError> for CliError {
    fn from(e: RuntimeError) -> Self {
        TestkitError::from(e).into()
    }
}

/// Scenario failures are classified by their root cause, so a missing
/// certificate still exits with 2 and an unreachable daemon with 3.
/// A timeout carries the container's last log lines into the message.
impl From<TestkitError> for CliError {
    fn from(e: TestkitError) -> Self {
        let mut message = e.to_string();
        if let TestkitError::Timeout(timeout) = e.root() {
            message.push('\n');
            message.push_str(&timeout.diagnostics());
        }
        match e.root() {
            TestkitError::Config(_) => Self::Config(message),
            TestkitError::Resource(ResourceError::Connection(_)) => {
                Self::RuntimeUnavailable(message)
            }
            _ if matches!(e, TestkitError::Scenario { .. }) => Self::Scenario(message),
            TestkitError::Io(_) => Self::Io(std::io::Error::other(message)),
            _ => Self::Command(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spire_testkit_core::error::{StartError, TimeoutError};

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_runtime_unavailable() {
        let err = CliError::RuntimeUnavailable("connection refused".to_owned());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_scenario_error() {
        let err = CliError::Scenario("timed out".to_owned());
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");
    }

    #[test]
    fn test_exit_code_command_error() {
        let err = CliError::Command("test error".to_owned());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_from_scenario_with_start_failure() {
        let err: CliError = TestkitError::Scenario {
            state: "NetworkReady".to_owned(),
            source: Box::new(
                StartError::Rejected {
                    name: "spire-server-1".to_owned(),
                    reason: "OCI runtime create failed".to_owned(),
                }
                .into(),
            ),
        }
        .into();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("NetworkReady"));
    }

    #[test]
    fn test_from_scenario_with_config_root_is_config() {
        let err: CliError = TestkitError::Scenario {
            state: "Init".to_owned(),
            source: Box::new(
                ConfigError::InvalidValue {
                    field: "spire.certs_dir".to_owned(),
                    reason: "missing agent.key.pem".to_owned(),
                }
                .into(),
            ),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_from_scenario_timeout_includes_log_tail() {
        let err: CliError = TestkitError::Scenario {
            state: "EntryRegistered".to_owned(),
            source: Box::new(
                TimeoutError {
                    container: "spire-agent-1".to_owned(),
                    pattern: "SVID updated".to_owned(),
                    timeout: std::time::Duration::from_secs(10),
                    tail: vec!["level=warn msg=\"Agent is not attested\"".to_owned()],
                }
                .into(),
            ),
        }
        .into();
        assert_eq!(err.exit_code(), 4);
        let shown = err.to_string();
        assert!(shown.contains("EntryRegistered"));
        assert!(shown.contains("| level=warn msg=\"Agent is not attested\""));
    }

    #[test]
    fn test_from_runtime_connection_error() {
        let err: CliError = RuntimeError::Connection("no such file".to_owned()).into();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_from_template_error_is_command() {
        let err: CliError = TestkitError::Template(
            spire_testkit_core::error::TemplateError::Render {
                template: "server.conf".to_owned(),
                reason: "Variable `nope` not found".to_owned(),
            },
        )
        .into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_error_display_config() {
        let err = CliError::Config("invalid TOML syntax".to_owned());
        let display_str = format!("{}", err);
        assert!(display_str.contains("configuration error"));
        assert!(display_str.contains("invalid TOML syntax"));
    }
}
