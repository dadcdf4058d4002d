//! Configuration module for the lnpaywall server.
//!
//! Configuration comes from an optional JSON file (`--config` / `$CONFIG`). Every
//! field has a default; several defaults fall back to environment variables first.
//!
//! ```json
//! {
//!   "port": 8000,
//!   "backend": {
//!     "type": "lnd",
//!     "rest_url": "$LND_REST_URL",
//!     "tls_cert": "./lnd_data/tls.cert",
//!     "macaroon": "./lnd_data/data/chain/bitcoin/testnet/admin.macaroon"
//!   },
//!   "paywall": { "path": "/weather", "amount_sat": 1, "separator": "||" },
//!   "listener": { "initial_backoff_ms": 1000, "max_backoff_ms": 60000 },
//!   "pending_ttl_secs": 86400
//! }
//! ```

use clap::Parser;
use lnpaywall_types::config::LiteralOrEnv;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// CLI arguments for the lnpaywall server.
#[derive(Parser, Debug)]
#[command(name = "lnpaywall")]
#[command(about = "Lightning paywall HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG")]
    config: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default)]
    backend: BackendConfig,
    #[serde(default)]
    paywall: PaywallConfig,
    #[serde(default)]
    listener: ListenerConfig,
    /// Pending entries older than this are forgotten. Unset keeps them forever.
    #[serde(default)]
    pending_ttl_secs: Option<u64>,
}

/// Which payment backend mints invoices and reports settlements.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process backend; payments are simulated through `POST /dev/pay`.
    #[default]
    Memory,
    /// An LND node reached through its REST gateway.
    Lnd(LndConfig),
}

/// Connection settings for LND's REST gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct LndConfig {
    #[serde(default = "config_defaults::default_lnd_rest_url")]
    pub rest_url: LiteralOrEnv<Url>,
    /// PEM certificate to trust for the gateway's TLS. `null` uses system roots only.
    #[serde(default = "config_defaults::default_lnd_tls_cert")]
    pub tls_cert: Option<LiteralOrEnv<PathBuf>>,
    /// Macaroon file sent (hex encoded) with every request. `null` sends none.
    #[serde(default = "config_defaults::default_lnd_macaroon")]
    pub macaroon: Option<LiteralOrEnv<PathBuf>>,
    /// Upper bound for one invoice creation call. `null` waits indefinitely.
    #[serde(default = "config_defaults::default_lnd_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for LndConfig {
    fn default() -> Self {
        Self {
            rest_url: config_defaults::default_lnd_rest_url(),
            tls_cert: config_defaults::default_lnd_tls_cert(),
            macaroon: config_defaults::default_lnd_macaroon(),
            request_timeout_ms: config_defaults::default_lnd_request_timeout_ms(),
        }
    }
}

/// The protected resource and the invoices minted for it.
#[derive(Debug, Clone, Deserialize)]
pub struct PaywallConfig {
    #[serde(default = "config_defaults::default_path")]
    pub path: String,
    #[serde(default = "config_defaults::default_header_name")]
    pub header_name: String,
    #[serde(default = "config_defaults::default_separator")]
    pub separator: String,
    #[serde(default = "config_defaults::default_amount_sat")]
    pub amount_sat: u64,
    #[serde(default = "config_defaults::default_description")]
    pub description: String,
    #[serde(default = "config_defaults::default_content")]
    pub content: String,
}

impl Default for PaywallConfig {
    fn default() -> Self {
        Self {
            path: config_defaults::default_path(),
            header_name: config_defaults::default_header_name(),
            separator: config_defaults::default_separator(),
            amount_sat: config_defaults::default_amount_sat(),
            description: config_defaults::default_description(),
            content: config_defaults::default_content(),
        }
    }
}

/// Reconnect policy of the settlement listener.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "config_defaults::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "config_defaults::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: config_defaults::default_initial_backoff_ms(),
            max_backoff_ms: config_defaults::default_max_backoff_ms(),
        }
    }
}

impl ListenerConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            backend: BackendConfig::default(),
            paywall: PaywallConfig::default(),
            listener: ListenerConfig::default(),
            pending_ttl_secs: None,
        }
    }
}

pub mod config_defaults {
    use lnpaywall_types::config::LiteralOrEnv;
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use url::Url;

    pub const DEFAULT_PORT: u16 = 8000;
    pub const DEFAULT_LND_HOST: &str = "localhost";
    pub const DEFAULT_LND_REST_PORT: u16 = 8080;
    pub const DEFAULT_LND_REST_URL: &str = "https://localhost:8080";
    pub const DEFAULT_NETWORK: &str = "testnet";

    /// Returns the default port value with fallback: $PORT env var -> 8000
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// `$LND_REST_URL`, else `https://$LN_RPC_HOST:8080`, else `https://localhost:8080`.
    pub fn default_lnd_rest_url() -> LiteralOrEnv<Url> {
        let from_env = env::var("LND_REST_URL").ok().and_then(|s| s.parse().ok());
        let from_host = || {
            let host = env::var("LN_RPC_HOST").unwrap_or_else(|_| DEFAULT_LND_HOST.to_string());
            Url::parse(&format!("https://{host}:{DEFAULT_LND_REST_PORT}")).ok()
        };
        let url = from_env.or_else(from_host).unwrap_or_else(|| {
            Url::parse(DEFAULT_LND_REST_URL).expect("default LND REST URL is valid")
        });
        LiteralOrEnv::from_literal(url)
    }

    pub fn default_lnd_tls_cert() -> Option<LiteralOrEnv<PathBuf>> {
        Some(LiteralOrEnv::from_literal(PathBuf::from("./lnd_data/tls.cert")))
    }

    /// Admin macaroon of the chain selected by `$NETWORK` (default: testnet).
    pub fn default_lnd_macaroon() -> Option<LiteralOrEnv<PathBuf>> {
        let network = env::var("NETWORK").unwrap_or_else(|_| DEFAULT_NETWORK.to_string());
        let path = PathBuf::from(format!(
            "./lnd_data/data/chain/bitcoin/{network}/admin.macaroon"
        ));
        Some(LiteralOrEnv::from_literal(path))
    }

    pub fn default_lnd_request_timeout_ms() -> Option<u64> {
        Some(30_000)
    }

    pub fn default_path() -> String {
        "/weather".to_string()
    }

    pub fn default_header_name() -> String {
        "X-Correlation-Token".to_string()
    }

    pub fn default_separator() -> String {
        lnpaywall_types::memo::DEFAULT_SEPARATOR.to_string()
    }

    /// 1 satoshi == 1/100 millionth of 1 Bitcoin
    pub fn default_amount_sat() -> u64 {
        1
    }

    pub fn default_description() -> String {
        "Weather report".to_string()
    }

    pub fn default_content() -> String {
        "Weather report: 15 degrees Celsius, cloudy and with a chance of Lightning.".to_string()
    }

    pub fn default_initial_backoff_ms() -> u64 {
        1_000
    }

    pub fn default_max_backoff_ms() -> u64 {
        60_000
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    pub fn paywall(&self) -> &PaywallConfig {
        &self.paywall
    }

    pub fn listener(&self) -> &ListenerConfig {
        &self.listener
    }

    pub fn pending_ttl(&self) -> Option<Duration> {
        self.pending_ttl_secs.map(Duration::from_secs)
    }

    /// Load configuration from CLI arguments and the JSON file they point to.
    ///
    /// Without `--config` (or `$CONFIG`), all values come from defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        match cli_args.config {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(matches!(config.backend(), BackendConfig::Memory));
        assert_eq!(config.paywall().path, "/weather");
        assert_eq!(config.paywall().separator, "||");
        assert_eq!(config.paywall().amount_sat, 1);
        assert_eq!(config.paywall().header_name, "X-Correlation-Token");
        assert_eq!(config.listener().initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.pending_ttl(), None);
    }

    #[test]
    fn lnd_backend_with_explicit_values() {
        let json = r#"{
            "port": 9000,
            "backend": {
                "type": "lnd",
                "rest_url": "https://node.example:8080",
                "tls_cert": null,
                "macaroon": "/secrets/invoice.macaroon",
                "request_timeout_ms": 2500
            },
            "paywall": { "path": "/rain", "separator": "//", "amount_sat": 10 },
            "pending_ttl_secs": 600
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.port(), 9000);
        let BackendConfig::Lnd(lnd) = config.backend() else {
            panic!("expected lnd backend");
        };
        assert_eq!(lnd.rest_url.as_str(), "https://node.example:8080/");
        assert!(lnd.tls_cert.is_none());
        assert_eq!(lnd.request_timeout_ms, Some(2500));
        assert_eq!(
            lnd.macaroon.as_deref().map(|p| p.as_path()),
            Some(std::path::Path::new("/secrets/invoice.macaroon"))
        );
        assert_eq!(config.paywall().path, "/rain");
        assert_eq!(config.paywall().separator, "//");
        assert_eq!(config.paywall().amount_sat, 10);
        assert_eq!(config.pending_ttl(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn lnd_defaults_point_at_lnd_data() {
        let json = r#"{ "backend": { "type": "lnd" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let BackendConfig::Lnd(lnd) = config.backend() else {
            panic!("expected lnd backend");
        };
        assert_eq!(
            lnd.tls_cert.as_deref().map(|p| p.as_path()),
            Some(std::path::Path::new("./lnd_data/tls.cert"))
        );
        let macaroon = lnd.macaroon.as_deref().unwrap();
        assert!(macaroon.ends_with("admin.macaroon"));
        assert_eq!(lnd.rest_url.scheme(), "https");
        assert_eq!(lnd.request_timeout_ms, Some(30_000));
    }

    #[test]
    fn unknown_backend_type_is_rejected() {
        let result = serde_json::from_str::<Config>(r#"{ "backend": { "type": "stripe" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn max_backoff_never_below_initial() {
        let listener = ListenerConfig {
            initial_backoff_ms: 5_000,
            max_backoff_ms: 10,
        };
        assert_eq!(listener.max_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn load_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": 8123 }}"#).unwrap();
        let config = Config::load_from_path(file.path().to_path_buf()).unwrap();
        assert_eq!(config.port(), 8123);
    }

    #[test]
    fn load_from_missing_path_fails() {
        let result = Config::load_from_path(PathBuf::from("/definitely/not/here.json"));
        assert!(matches!(result, Err(ConfigError::FileRead(..))));
    }
}
