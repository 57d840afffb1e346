pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# PROXYLENS CONFIGURATION
# =============================================================================
# Collects reverse-proxy access logs, enriches them with a country and serves
# them through a small HTTP API.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/proxylens/config.yml
#   3. /etc/proxylens/config.yml
#
# Values may reference environment variables: $env followed by the
# variable name in braces (see web.api_key below).

# =============================================================================
# COLLECTION
# =============================================================================
collection:
  # Directory holding the proxy's access logs (not searched recursively)
  log_dir: /data/logs

  # Glob patterns matched against file names. Files still being written:
  live_pattern: "proxy-host-*_access.log"
  # Closed past generations (may be .gz compressed). A name matching both
  # patterns is treated as rotated.
  rotated_pattern: "proxy-host-*_access.log.*.gz"

  # How often a collection run is started
  interval: 10m

  # Start a run as soon as the service is up
  run_on_startup: true

  # Entries committed per database transaction
  batch_size: 500

# =============================================================================
# PARSER
# =============================================================================
parser:
  # nginx log_format style template. Recognised variables include
  # $time_local, $time_iso8601, $remote_addr, $status, $request,
  # $request_method, $scheme, $host, $request_uri, $body_bytes_sent,
  # $gzip_ratio, $upstream_status, $server, $http_referer and
  # $http_user_agent. Other variables are matched and ignored.
  # A timestamp and a client address variable are required.
  template: '[$time_local] $upstream_cache_status $upstream_status $status - $request_method $scheme $host "$request_uri" [Client $remote_addr] [Length $body_bytes_sent] [Gzip $gzip_ratio] [Sent-to $server] "$http_user_agent" "$http_referer"'

  # Optional timestamp format override: strptime format, 'iso8601', 'epoch'
  # or 'epoch_ms'
  # time_format: '%d/%b/%Y:%H:%M:%S %z'

# =============================================================================
# GEO
# =============================================================================
geo:
  # MaxMind country database, e.g. /usr/share/GeoIP/GeoLite2-Country.mmdb
  # Without it every entry's country is "Unknown".
  database: null

# =============================================================================
# STORAGE
# =============================================================================
storage:
  # DuckDB database file. Entries are never deleted: size grows with traffic,
  # plan disk space accordingly.
  path: ~/.local/share/proxylens/proxylens.duckdb

# =============================================================================
# WEB
# =============================================================================
web:
  listen: 127.0.0.1:7107
  # Clients send this in the X-API-Key header. Use a long random value.
  api_key: $env{PROXYLENS_API_KEY}
"#
    .to_string()
}
