//! Migrate command.

use super::{parse_toggle, print_report, CommandResult, DestinationArgs};
use crate::transport::ReqwestClient;
use clap::{ArgAction, Args};
use tracing::info;
use vendsync_engine::{
    ExistingPolicy, SourceConfig, SyncConfig, SyncOrchestrator, DEFAULT_OPERATOR_CODE,
    DEFAULT_PROJECT, DEFAULT_SOURCE_API_URL,
};

/// Flags for `vendsync migrate`.
#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    /// Airtable base id
    #[arg(long, env = "AIRTABLE_BASE_ID", default_value = "")]
    pub airtable_base_id: String,

    /// Airtable personal access token
    #[arg(long, env = "AIRTABLE_API_KEY", default_value = "", hide_env_values = true)]
    pub airtable_api_key: String,

    /// Airtable REST endpoint root
    #[arg(long, default_value = DEFAULT_SOURCE_API_URL)]
    pub airtable_api_url: String,

    #[command(flatten)]
    pub destination: DestinationArgs,

    /// NocoDB project name
    #[arg(long, env = "NOCODB_PROJECT", default_value = DEFAULT_PROJECT)]
    pub nocodb_project: String,

    /// Operator code tagged onto every row
    #[arg(long, env = "OPERATOR_CODE", default_value = DEFAULT_OPERATOR_CODE)]
    pub operator_code: String,

    /// Read everything but write nothing
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

    /// Also link each row to the operator row
    #[arg(
        long,
        env = "USE_OPERATOR_LINK",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_toggle
    )]
    pub use_operator_link: bool,

    /// Patch existing rows whose fields differ instead of skipping them
    #[arg(long)]
    pub upsert: bool,
}

impl MigrateArgs {
    /// Builds the engine configuration.
    pub fn to_config(&self) -> SyncConfig {
        let policy = if self.upsert {
            ExistingPolicy::UpsertWithDiff
        } else {
            ExistingPolicy::CreateOnly
        };
        SyncConfig::new(
            SourceConfig::new(&self.airtable_base_id, &self.airtable_api_key)
                .with_api_url(&self.airtable_api_url),
            self.destination.to_config(&self.nocodb_project),
        )
        .with_operator_code(&self.operator_code)
        .with_dry_run(self.dry_run)
        .with_operator_link(self.use_operator_link)
        .with_existing_policy(policy)
        .with_timeout(self.destination.timeout())
    }
}

/// Runs the migrate command.
pub fn run(args: MigrateArgs) -> CommandResult {
    let config = args.to_config();
    config.validate()?;

    info!(
        base = %config.source.base_id,
        project = %config.destination.project,
        operator = %config.operator_code,
        dry_run = config.dry_run,
        "starting migration"
    );

    let client = ReqwestClient::new()?;
    let summary = SyncOrchestrator::new(config, client)?.run()?;
    print_report(&summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: MigrateArgs,
    }

    fn parse(extra: &[&str]) -> MigrateArgs {
        let mut argv = vec!["migrate"];
        argv.extend_from_slice(extra);
        Harness::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn defaults() {
        let args = parse(&[
            "--airtable-base-id",
            "appX",
            "--airtable-api-key",
            "pat",
            "--nocodb-base-url",
            "https://noco",
            "--nocodb-api-key",
            "tok",
            "--nocodb-project",
            "zgovend",
            "--operator-code",
            "zgo",
            "--dry-run",
            "false",
            "--use-operator-link",
            "no",
        ]);
        let config = args.to_config();
        assert_eq!(config.source.api_url, DEFAULT_SOURCE_API_URL);
        assert_eq!(config.destination.project, DEFAULT_PROJECT);
        assert_eq!(config.operator_code, DEFAULT_OPERATOR_CODE);
        assert!(!config.dry_run);
        assert!(!config.use_operator_link);
        assert_eq!(config.existing_policy, ExistingPolicy::CreateOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_credentials_are_reported_together() {
        let args = parse(&[
            "--airtable-base-id",
            "",
            "--airtable-api-key",
            "",
            "--nocodb-base-url",
            "",
            "--nocodb-api-key",
            "",
        ]);
        let err = args.to_config().validate().unwrap_err().to_string();
        for name in [
            "AIRTABLE_BASE_ID",
            "AIRTABLE_API_KEY",
            "NOCODB_BASE_URL",
            "NOCODB_API_KEY",
        ] {
            assert!(err.contains(name), "{err}");
        }
    }
}
