//! CLI command implementations.

pub mod bootstrap;
pub mod migrate;

use clap::Args;
use std::time::Duration;
use vendsync_engine::DestinationConfig;

/// Result type shared by the commands.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Destination server connection flags.
#[derive(Args, Debug, Clone)]
pub struct DestinationArgs {
    /// NocoDB server root
    #[arg(long, env = "NOCODB_BASE_URL", default_value = "")]
    pub nocodb_base_url: String,

    /// NocoDB API token
    #[arg(long, env = "NOCODB_API_KEY", default_value = "", hide_env_values = true)]
    pub nocodb_api_key: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl DestinationArgs {
    /// Builds the destination configuration for the given project.
    pub fn to_config(&self, project: &str) -> DestinationConfig {
        DestinationConfig::new(&self.nocodb_base_url, &self.nocodb_api_key, project)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Parses a boolean toggle: `1`, `true` and `yes` (any case) enable it,
/// anything else disables it.
pub fn parse_toggle(value: &str) -> Result<bool, String> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    ))
}

/// Prints a report as pretty JSON on stdout.
pub fn print_report<T: serde::Serialize>(report: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
