//! TOML configuration loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use stratbook::StrategyGroups;
use stratbook_broker::ibkr::{ConfirmPolicy, RequestContext};

use crate::error::{Error, Result};

/// Fraction of net liquidation held back as cash on every rebalance.
pub const CASH_RESERVE: f64 = 0.20;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub account: AccountConfig,
    /// Alias → account id.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    pub strategy: StrategyConfig,
    /// Strategy name → constituent filter names.
    pub strategies: StrategyGroups,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_delay")]
    pub call_delay_ms: u64,
    #[serde(default = "default_max_confirmations")]
    pub max_confirmations: u32,
    #[serde(default = "default_retries")]
    pub position_retries: u32,
    #[serde(default = "default_delay")]
    pub retry_sleep_ms: u64,
    #[serde(default = "default_delay")]
    pub snapshot_settle_ms: u64,
}

fn default_delay() -> u64 {
    500
}
fn default_max_confirmations() -> u32 {
    3
}
fn default_retries() -> u32 {
    3
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            call_delay_ms: default_delay(),
            max_confirmations: default_max_confirmations(),
            position_retries: default_retries(),
            retry_sleep_ms: default_delay(),
            snapshot_settle_ms: default_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "./stratbook.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate config text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.gateway.base_url.trim().is_empty() {
            return Err(Error::Config("gateway base_url must not be empty".into()));
        }
        if self.account.id.trim().is_empty() {
            return Err(Error::Config("account id must not be empty".into()));
        }
        if !(0.0..1.0).contains(&self.strategy.tolerance) {
            return Err(Error::Config("tolerance must be in [0.0, 1.0)".into()));
        }
        if self.execution.max_confirmations == 0 {
            return Err(Error::Config("max_confirmations must be >= 1".into()));
        }
        if self.execution.position_retries == 0 {
            return Err(Error::Config("position_retries must be >= 1".into()));
        }
        self.strategy_filters(&self.strategy.name)?;
        Ok(())
    }

    /// Filters making up a strategy. Unknown or empty strategies are a
    /// configuration failure.
    pub fn strategy_filters(&self, name: &str) -> Result<&[String]> {
        match self.strategies.get(name) {
            Some(filters) if !filters.is_empty() => Ok(filters),
            Some(_) => Err(Error::Config(format!("strategy '{name}' has no filters"))),
            None => Err(Error::Config(format!(
                "strategy '{name}' not defined in [strategies]"
            ))),
        }
    }

    /// Account id for an optional alias; the configured account when absent.
    pub fn resolve_account(&self, alias: Option<&str>) -> Result<String> {
        match alias {
            None => Ok(self.account.id.clone()),
            Some(a) => self
                .aliases
                .get(a)
                .cloned()
                .ok_or_else(|| Error::Config(format!("unknown account alias '{a}'"))),
        }
    }

    /// Gateway request context for the REST client.
    pub fn request_context(&self) -> RequestContext {
        let mut ctx = RequestContext::new(&self.gateway.base_url);
        ctx.accept_invalid_certs = self.gateway.accept_invalid_certs;
        ctx.timeout = Duration::from_secs(self.gateway.timeout_secs);
        ctx
    }

    pub fn confirm_policy(&self) -> ConfirmPolicy {
        ConfirmPolicy {
            max_confirmations: self.execution.max_confirmations,
            call_delay: Duration::from_millis(self.execution.call_delay_ms),
        }
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[gateway]
base_url = "https://localhost:5000/v1/api"
accept_invalid_certs = true
timeout_secs = 20

[account]
id = "U1234567"

[aliases]
growth = "U7654321"

[strategy]
name = "momentum"
tolerance = 0.10

[strategies]
momentum = ["top_rated", "growth_screen"]
value = ["deep_value"]

[execution]
call_delay_ms = 250
max_confirmations = 3
position_retries = 3
retry_sleep_ms = 500
snapshot_settle_ms = 500

[storage]
db_path = "./stratbook.db"

[logging]
dir = "./logs"
audit_file = "audit.jsonl"
"#
    }

    #[test]
    fn parse_example_config() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.account.id, "U1234567");
        assert_eq!(config.gateway.timeout_secs, 20);
        assert_eq!(config.strategy.tolerance, 0.10);
        assert_eq!(config.execution.call_delay_ms, 250);
        assert_eq!(
            config.strategy_filters("momentum").unwrap(),
            ["top_rated", "growth_screen"]
        );
    }

    #[test]
    fn defaults_for_optional_sections() {
        let toml = r#"
[gateway]
base_url = "https://localhost:5000/v1/api"

[account]
id = "U1"

[strategy]
name = "s"

[strategies]
s = ["f"]
"#;
        let config = Config::from_toml(toml).unwrap();
        assert!(config.gateway.accept_invalid_certs);
        assert_eq!(config.strategy.tolerance, 0.10);
        assert_eq!(config.execution.max_confirmations, 3);
        assert_eq!(config.execution.position_retries, 3);
        assert_eq!(config.execution.call_delay_ms, 500);
        assert_eq!(config.storage.db_path, "./stratbook.db");
        assert!(config.aliases.is_empty());
    }

    #[test]
    fn validate_catches_unknown_strategy() {
        let toml = example_toml().replace("name = \"momentum\"", "name = \"missing\"");
        assert!(matches!(Config::from_toml(&toml), Err(Error::Config(_))));
    }

    #[test]
    fn validate_catches_bad_tolerance() {
        let toml = example_toml().replace("tolerance = 0.10", "tolerance = 1.5");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn validate_catches_zero_confirmations() {
        let toml = example_toml().replace("max_confirmations = 3", "max_confirmations = 0");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn validate_catches_empty_account() {
        let toml = example_toml().replace("id = \"U1234567\"", "id = \"\"");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn alias_resolution() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.resolve_account(None).unwrap(), "U1234567");
        assert_eq!(config.resolve_account(Some("growth")).unwrap(), "U7654321");
        assert!(matches!(
            config.resolve_account(Some("nope")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn request_context_from_config() {
        let config = Config::from_toml(example_toml()).unwrap();
        let ctx = config.request_context();
        assert_eq!(ctx.base_url, "https://localhost:5000/v1/api");
        assert_eq!(ctx.timeout, Duration::from_secs(20));
        assert_eq!(config.confirm_policy().call_delay, Duration::from_millis(250));
    }

    #[test]
    fn audit_path() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.audit_path(), PathBuf::from("./logs/audit.jsonl"));
    }
}
