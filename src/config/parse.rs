use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use crate::parser::LineTemplate;
use crate::source::FilePatterns;
use regex::Regex;
use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Keys shorter than this are accepted with a warning.
const MIN_RECOMMENDED_KEY_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let (config, _) = load_config_with_yaml(path)?;
    Ok(config)
}

/// Load config and return both the parsed config and the expanded YAML string
pub fn load_config_with_yaml(path: &Path) -> Result<(Config, String), ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let config = parse_config_str(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    Ok((config, expand_env_vars(&yaml_string)))
}

/// Parse, expand and validate a YAML document.
pub fn parse_config_str(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);

    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with the actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export PROXYLENS_API_KEY=...)\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.collection.log_dir = expand_tilde(&config.collection.log_dir);
    config.storage.path = expand_tilde(&config.storage.path);
    if let Some(database) = &config.geo.database {
        config.geo.database = Some(expand_tilde(database));
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_collection(&config.collection, &mut errors);
    validate_parser(&config.parser, &mut errors);
    validate_web(&config.web, &mut errors);

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_collection(collection: &CollectionConfig, errors: &mut Vec<String>) {
    if collection.log_dir.as_os_str().is_empty() {
        errors.push("collection.log_dir cannot be empty".to_string());
    }

    if let Err(e) = FilePatterns::new(&collection.live_pattern, &collection.rotated_pattern) {
        errors.push(format!("collection: invalid file pattern: {}", e));
    }

    if collection.interval.is_zero() {
        errors.push("collection.interval must be greater than zero".to_string());
    }

    if collection.batch_size == 0 {
        errors.push("collection.batch_size must be at least 1".to_string());
    }
}

fn validate_parser(parser: &ParserConfig, errors: &mut Vec<String>) {
    if let Err(e) = LineTemplate::compile(&parser.template, parser.time_format.as_deref()) {
        errors.push(format!("parser.template: {}", e));
    }
}

fn validate_web(web: &WebConfig, errors: &mut Vec<String>) {
    if web.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen: '{}' is not a socket address (expected e.g. 127.0.0.1:7107)",
            web.listen
        ));
    }

    if web.api_key.trim().is_empty() {
        errors.push("web.api_key cannot be empty".to_string());
    } else if web.api_key.len() < MIN_RECOMMENDED_KEY_LEN {
        tracing::warn!(
            "web.api_key is shorter than {} characters; use a long random key",
            MIN_RECOMMENDED_KEY_LEN
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
collection:
  log_dir: /var/log/proxy
storage:
  path: /var/lib/proxylens/proxylens.duckdb
web:
  listen: 127.0.0.1:7107
  api_key: 0123456789abcdef0123
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config_str(MINIMAL).unwrap();

        assert_eq!(config.collection.live_pattern, "proxy-host-*_access.log");
        assert_eq!(config.collection.rotated_pattern, "proxy-host-*_access.log.*.gz");
        assert_eq!(config.collection.interval, Duration::from_secs(600));
        assert!(config.collection.run_on_startup);
        assert_eq!(config.collection.batch_size, 500);
        assert_eq!(config.parser.template, DEFAULT_TEMPLATE);
        assert!(config.parser.time_format.is_none());
        assert!(config.geo.database.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
collection:
  log_dir: /srv/logs
  live_pattern: "*.log"
  rotated_pattern: "*.log.*"
  interval: 90s
  run_on_startup: false
  batch_size: 50
parser:
  template: '$remote_addr - [$time_iso8601] "$request" $status $body_bytes_sent'
  time_format: iso8601
geo:
  database: /usr/share/GeoIP/GeoLite2-Country.mmdb
storage:
  path: /tmp/proxylens.duckdb
web:
  listen: 0.0.0.0:8080
  api_key: 0123456789abcdef0123
"#;
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.collection.interval, Duration::from_secs(90));
        assert!(!config.collection.run_on_startup);
        assert_eq!(config.collection.batch_size, 50);
        assert_eq!(config.parser.time_format.as_deref(), Some("iso8601"));
        assert_eq!(
            config.geo.database.as_deref(),
            Some(Path::new("/usr/share/GeoIP/GeoLite2-Country.mmdb"))
        );
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let yaml = r#"
collection:
  log_dir: /var/log/proxy
  batch_size: 0
parser:
  template: "$status $request_uri"
storage:
  path: /tmp/proxylens.duckdb
web:
  listen: not-an-address
  api_key: ""
"#;
        let err = parse_config_str(yaml).unwrap_err();
        let ConfigError::ValidationList(errors) = err else {
            panic!("expected validation errors");
        };

        assert_eq!(errors.len(), 4, "{:?}", errors);
        assert!(errors.iter().any(|e| e.contains("batch_size")));
        assert!(errors.iter().any(|e| e.starts_with("parser.template")));
        assert!(errors.iter().any(|e| e.starts_with("web.listen")));
        assert!(errors.iter().any(|e| e.contains("api_key cannot be empty")));
    }

    #[test]
    fn test_template_without_client_address_is_rejected() {
        let yaml = MINIMAL.to_string() + "parser:\n  template: '[$time_local] $status'\n";
        let err = parse_config_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationList(_)));
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("PROXYLENS_TEST_API_KEY", "from-the-environment-123");
        let yaml = MINIMAL.replace("0123456789abcdef0123", "$env{PROXYLENS_TEST_API_KEY}");
        let config = parse_config_str(&yaml).unwrap();
        assert_eq!(config.web.api_key, "from-the-environment-123");
        std::env::remove_var("PROXYLENS_TEST_API_KEY");
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = MINIMAL.replace("0123456789abcdef0123", "$env{PROXYLENS_SURELY_UNSET_VAR}");
        let err = parse_config_str(&yaml).unwrap_err();
        let ConfigError::Validation(msg) = err else {
            panic!("expected validation error");
        };
        assert!(msg.contains("PROXYLENS_SURELY_UNSET_VAR"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", MINIMAL).unwrap();
        file.flush().unwrap();

        let (config, yaml) = load_config_with_yaml(file.path()).unwrap();
        assert_eq!(config.web.listen, "127.0.0.1:7107");
        assert!(yaml.contains("log_dir"));
    }

    #[test]
    fn test_yaml_error_names_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "collection: [not, a, map]\n").unwrap();
        file.flush().unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
