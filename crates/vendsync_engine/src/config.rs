//! Configuration for sync and bootstrap runs.
//!
//! Configuration is built once (normally by the CLI from flags and
//! environment variables) and passed by reference into every component.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Default Airtable REST endpoint.
pub const DEFAULT_SOURCE_API_URL: &str = "https://api.airtable.com/v0";

/// Default destination project name.
pub const DEFAULT_PROJECT: &str = "zgovend";

/// Default operator code tagged onto every migrated row.
pub const DEFAULT_OPERATOR_CODE: &str = "zgo";

/// Configuration for retry behavior.
///
/// Backoff is linear: the wait after the failed attempt `i` (0-indexed) is
/// `base_delay * (i + 1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub base_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration with the default base delay.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(1500),
        }
    }

    /// Policy used for reads: four attempts.
    pub fn reads() -> Self {
        Self::new(4)
    }

    /// Policy used for writes: two attempts.
    pub fn writes() -> Self {
        Self::new(2)
    }

    /// Creates a configuration that retries without sleeping.
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Number of attempts actually made; at least one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Calculates the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::reads()
    }
}

/// What to do with a source record whose natural key already exists in the
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingPolicy {
    /// Never touch an existing row.
    #[default]
    CreateOnly,
    /// Patch the fields that differ from the existing row.
    UpsertWithDiff,
}

/// Source (Airtable) connection settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base identifier.
    pub base_id: String,
    /// Personal access token, sent as a bearer token.
    pub api_key: String,
    /// REST endpoint root.
    pub api_url: String,
}

impl SourceConfig {
    /// Creates a new source configuration.
    pub fn new(base_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_id: base_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            api_url: DEFAULT_SOURCE_API_URL.to_string(),
        }
    }

    /// Sets the REST endpoint root.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Destination (NocoDB) connection settings.
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Server root, without a trailing slash.
    pub base_url: String,
    /// API token, sent in the `xc-token` header.
    pub api_key: String,
    /// Project that scopes data and meta endpoints.
    pub project: String,
}

impl DestinationConfig {
    /// Creates a new destination configuration.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
            project: project.into().trim().to_string(),
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.base_url.is_empty() {
            missing.push("NOCODB_BASE_URL");
        }
        if self.api_key.is_empty() {
            missing.push("NOCODB_API_KEY");
        }
        missing
    }
}

/// Configuration for a migration run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Source connection.
    pub source: SourceConfig,
    /// Destination connection.
    pub destination: DestinationConfig,
    /// Operator code tagged onto every migrated row.
    pub operator_code: String,
    /// Suppress destination writes.
    pub dry_run: bool,
    /// Also link each row to the operator row.
    pub use_operator_link: bool,
    /// Handling of records that already exist in the destination.
    pub existing_policy: ExistingPolicy,
    /// Retry policy for reads.
    pub read_retry: RetryConfig,
    /// Retry policy for writes.
    pub write_retry: RetryConfig,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(source: SourceConfig, destination: DestinationConfig) -> Self {
        Self {
            source,
            destination,
            operator_code: DEFAULT_OPERATOR_CODE.to_string(),
            dry_run: false,
            use_operator_link: false,
            existing_policy: ExistingPolicy::CreateOnly,
            read_retry: RetryConfig::reads(),
            write_retry: RetryConfig::writes(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the operator code.
    pub fn with_operator_code(mut self, code: impl Into<String>) -> Self {
        self.operator_code = code.into().trim().to_string();
        self
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enables or disables the operator link column.
    pub fn with_operator_link(mut self, enabled: bool) -> Self {
        self.use_operator_link = enabled;
        self
    }

    /// Sets the existing-record policy.
    pub fn with_existing_policy(mut self, policy: ExistingPolicy) -> Self {
        self.existing_policy = policy;
        self
    }

    /// Sets the read retry policy.
    pub fn with_read_retry(mut self, retry: RetryConfig) -> Self {
        self.read_retry = retry;
        self
    }

    /// Sets the write retry policy.
    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks that every required setting is present.
    pub fn validate(&self) -> SyncResult<()> {
        let mut missing = Vec::new();
        if self.source.base_id.is_empty() {
            missing.push("AIRTABLE_BASE_ID");
        }
        if self.source.api_key.is_empty() {
            missing.push("AIRTABLE_API_KEY");
        }
        missing.extend(self.destination.missing());
        if self.destination.project.is_empty() {
            missing.push("NOCODB_PROJECT");
        }
        if self.operator_code.is_empty() {
            missing.push("OPERATOR_CODE");
        }
        missing_settings(missing)
    }
}

/// Configuration for a schema bootstrap run.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Destination connection; `project` holds the project id.
    pub destination: DestinationConfig,
    /// Suppress schema mutations.
    pub dry_run: bool,
    /// Retry policy for reads.
    pub read_retry: RetryConfig,
    /// Retry policy for writes.
    pub write_retry: RetryConfig,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl BootstrapConfig {
    /// Creates a new bootstrap configuration.
    pub fn new(destination: DestinationConfig) -> Self {
        Self {
            destination,
            dry_run: false,
            read_retry: RetryConfig::reads(),
            write_retry: RetryConfig::writes(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets both retry policies.
    pub fn with_retry(mut self, read: RetryConfig, write: RetryConfig) -> Self {
        self.read_retry = read;
        self.write_retry = write;
        self
    }

    /// Checks that every required setting is present.
    pub fn validate(&self) -> SyncResult<()> {
        let mut missing = self.destination.missing();
        if self.destination.project.is_empty() {
            missing.push("NOCODB_PROJECT_ID");
        }
        missing_settings(missing)
    }
}

fn missing_settings(missing: Vec<&'static str>) -> SyncResult<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Configuration(format!(
            "missing settings: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncConfig {
        SyncConfig::new(
            SourceConfig::new("appXYZ", "pat123"),
            DestinationConfig::new("https://noco.example.com/", "tok", "zgovend"),
        )
    }

    #[test]
    fn sync_config_builder() {
        let config = sample()
            .with_operator_code(" acme ")
            .with_dry_run(true)
            .with_operator_link(true)
            .with_existing_policy(ExistingPolicy::UpsertWithDiff)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.operator_code, "acme");
        assert!(config.dry_run);
        assert!(config.use_operator_link);
        assert_eq!(config.existing_policy, ExistingPolicy::UpsertWithDiff);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.destination.base_url, "https://noco.example.com");
        assert_eq!(config.read_retry.max_attempts, 4);
        assert_eq!(config.write_retry.max_attempts, 2);
        config.validate().unwrap();
    }

    #[test]
    fn validate_reports_every_missing_setting() {
        let config = SyncConfig::new(
            SourceConfig::new("", "  "),
            DestinationConfig::new("", "tok", "zgovend"),
        );
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("AIRTABLE_BASE_ID"));
        assert!(err.contains("AIRTABLE_API_KEY"));
        assert!(err.contains("NOCODB_BASE_URL"));
        assert!(!err.contains("NOCODB_API_KEY"));
    }

    #[test]
    fn bootstrap_requires_project_id() {
        let config = BootstrapConfig::new(DestinationConfig::new("http://x", "tok", ""));
        assert!(matches!(
            config.validate(),
            Err(SyncError::Configuration(msg)) if msg.contains("NOCODB_PROJECT_ID")
        ));
    }

    #[test]
    fn linear_backoff() {
        let retry = RetryConfig::new(4).with_base_delay(Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryConfig::no_delay(0).attempts(), 1);
        assert_eq!(RetryConfig::no_delay(3).attempts(), 3);
    }
}
