//! Bootstrap command.

use super::{parse_toggle, print_report, CommandResult, DestinationArgs};
use crate::transport::ReqwestClient;
use clap::{ArgAction, Args};
use tracing::info;
use vendsync_engine::{bootstrap, catalog_schema, BootstrapConfig, EnsureOutcome};

/// Flags for `vendsync bootstrap`.
#[derive(Args, Debug, Clone)]
pub struct BootstrapArgs {
    #[command(flatten)]
    pub destination: DestinationArgs,

    /// NocoDB project id
    #[arg(long, env = "NOCODB_PROJECT_ID", default_value = "")]
    pub nocodb_project_id: String,

    /// Report what would be created without changing the schema
    #[arg(
        long,
        env = "DRY_RUN",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_toggle
    )]
    pub dry_run: bool,
}

impl BootstrapArgs {
    /// Builds the engine configuration.
    pub fn to_config(&self) -> BootstrapConfig {
        let mut config =
            BootstrapConfig::new(self.destination.to_config(&self.nocodb_project_id))
                .with_dry_run(self.dry_run);
        config.timeout = self.destination.timeout();
        config
    }
}

/// Runs the bootstrap command.
pub fn run(args: BootstrapArgs) -> CommandResult {
    let config = args.to_config();
    config.validate()?;

    info!(
        project = %config.destination.project,
        dry_run = config.dry_run,
        "bootstrapping schema"
    );

    let report = bootstrap(&config, ReqwestClient::new()?, &catalog_schema())?;
    let created = report
        .outcomes()
        .filter(|o| *o == EnsureOutcome::Created)
        .count();
    info!(created, "bootstrap complete");
    print_report(&report)
}
