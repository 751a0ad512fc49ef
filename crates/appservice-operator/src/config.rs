//! Command-line configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use appservice_common::telemetry::LogFormat;
use appservice_controller::ReconcileConfig;

/// AppService operator - keeps a Deployment and a NodePort Service in line with each AppService
#[derive(Parser, Debug)]
#[command(
    name = "appservice-operator",
    version,
    about,
    long_about = None,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Print the AppService CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Log output format: json or text
    #[arg(long, global = true, env = "APPSERVICE_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub controller: ControllerArgs,
}

impl Cli {
    /// The command to run; `controller` when none is given
    pub fn into_command(self) -> Commands {
        self.command.unwrap_or(Commands::Controller(self.controller))
    }
}

/// Operator subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the AppService controller (default)
    Controller(ControllerArgs),
}

/// Settings for the controller process
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerArgs {
    /// Path to a kubeconfig; in-cluster or default config when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "APPSERVICE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Deadline for one reconciliation in seconds (0 disables it)
    #[arg(long, env = "APPSERVICE_RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    pub reconcile_timeout_secs: u64,

    /// Requeue delay after a transient failure, in seconds
    #[arg(long, env = "APPSERVICE_ERROR_REQUEUE_SECS", default_value_t = 15)]
    pub error_requeue_secs: u64,

    /// Requeue delay after an invalid spec, in seconds
    #[arg(long, env = "APPSERVICE_INVALID_REQUEUE_SECS", default_value_t = 300)]
    pub invalid_requeue_secs: u64,

    /// Server-side apply the AppService CRD at startup
    #[arg(long, env = "APPSERVICE_INSTALL_CRD")]
    pub install_crd: bool,
}

impl ControllerArgs {
    /// Reconciler timing derived from the flags
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            reconcile_timeout: (self.reconcile_timeout_secs > 0)
                .then(|| Duration::from_secs(self.reconcile_timeout_secs)),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            invalid_requeue: Duration::from_secs(self.invalid_requeue_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("appservice-operator").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_runs_controller_with_defaults() {
        let Commands::Controller(args) = parse(&[]).into_command();
        assert_eq!(args.reconcile_config(), ReconcileConfig::default());
        assert!(!args.install_crd);
    }

    #[test]
    fn controller_subcommand_accepts_flags() {
        let cli = parse(&[
            "controller",
            "--log-format",
            "text",
            "--namespace",
            "apps",
            "--error-requeue-secs",
            "5",
            "--install-crd",
        ]);
        assert_eq!(cli.log_format, LogFormat::Text);

        let Commands::Controller(args) = cli.into_command();
        assert_eq!(args.namespace.as_deref(), Some("apps"));
        assert_eq!(args.reconcile_config().error_requeue, Duration::from_secs(5));
        assert!(args.install_crd);
    }

    #[rstest]
    #[case::disabled("0", None)]
    #[case::custom("45", Some(Duration::from_secs(45)))]
    fn reconcile_timeout_flag(#[case] value: &str, #[case] expected: Option<Duration>) {
        let cli = parse(&["--reconcile-timeout-secs", value]);
        let Commands::Controller(args) = cli.into_command();
        assert_eq!(args.reconcile_config().reconcile_timeout, expected);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let result = Cli::try_parse_from(["appservice-operator", "--log-format", "yaml"]);
        assert!(result.is_err());
    }
}
