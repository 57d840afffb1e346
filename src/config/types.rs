use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Nginx Proxy Manager `proxy-host-*_access.log` line format.
pub const DEFAULT_TEMPLATE: &str = r#"[$time_local] $upstream_cache_status $upstream_status $status - $request_method $scheme $host "$request_uri" [Client $remote_addr] [Length $body_bytes_sent] [Gzip $gzip_ratio] [Sent-to $server] "$http_user_agent" "$http_referer""#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub collection: CollectionConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    pub storage: StorageConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub log_dir: PathBuf,
    #[serde(default = "default_live_pattern")]
    pub live_pattern: String,
    #[serde(default = "default_rotated_pattern")]
    pub rotated_pattern: String,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_live_pattern() -> String {
    "proxy-host-*_access.log".to_string()
}

fn default_rotated_pattern() -> String {
    "proxy-host-*_access.log.*.gz".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_run_on_startup() -> bool {
    true
}

fn default_batch_size() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_template")]
    pub template: String,
    /// strptime format, `iso8601`, `epoch` or `epoch_ms`; overrides the
    /// format implied by the timestamp variable
    #[serde(default)]
    pub time_format: Option<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            time_format: None,
        }
    }
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoConfig {
    /// MaxMind country database (`.mmdb`). Without it every country is "Unknown".
    #[serde(default)]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
    pub api_key: String,
}
