use anyhow::{Context, Result, anyhow, bail};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = ".visitorhub";
const HOME_ENV: &str = "VISITORHUB_HOME";
const CONFIG_FILE: &str = "config.json";
const FALLBACK_FILE: &str = "fallback.json";
pub const DEFAULT_FALLBACK_CAPACITY: usize = 100;
pub const DEFAULT_LIST_LIMIT: u32 = 100;
pub const DEFAULT_POLL_SECONDS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub api_port: u16,
    pub db_path: PathBuf,
    pub ledger_url: String,
    pub ip_lookup_url: String,
    pub location_urls: Vec<String>,
    pub request_timeout_seconds: u64,
    pub fallback_path: PathBuf,
    pub fallback_capacity: usize,
    pub poll_seconds: u64,
    pub list_limit: u32,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let root = default_root_dir();

        Self {
            bind_address: "127.0.0.1".to_string(),
            api_port: 7890,
            db_path: root.join("db").join("visitors.db"),
            ledger_url: "http://127.0.0.1:7890".to_string(),
            ip_lookup_url: "https://api.ip.pe.kr/json".to_string(),
            location_urls: vec![
                "https://ipinfo.io/json".to_string(),
                "https://ipapi.co/json/".to_string(),
            ],
            request_timeout_seconds: 5,
            fallback_path: root.join(FALLBACK_FILE),
            fallback_capacity: DEFAULT_FALLBACK_CAPACITY,
            poll_seconds: DEFAULT_POLL_SECONDS,
            list_limit: DEFAULT_LIST_LIMIT,
            user_agent: format!("visitorhub/{} (Linux)", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    pub fn root_dir() -> PathBuf {
        default_root_dir()
    }

    pub fn config_path() -> PathBuf {
        Self::root_dir().join(CONFIG_FILE)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    /// Missing config is not an error; every command runs on defaults.
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(&config_path)?;

        Ok(())
    }

    pub fn ensure_bootstrap_files(&self) -> Result<()> {
        let root = Self::root_dir();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create root directory: {}", root.display()))?;

        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_config_key(key) {
            "bind_address" => {
                value
                    .trim()
                    .parse::<std::net::IpAddr>()
                    .map_err(|_| anyhow!("bind_address must be an IP address"))?;
                self.bind_address = value.trim().to_string();
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            "db_path" => {
                self.db_path = expand_home(value);
            }
            "ledger_url" => {
                self.ledger_url = parse_http_url(value, "ledger_url")?;
            }
            "ip_lookup_url" => {
                self.ip_lookup_url = parse_http_url(value, "ip_lookup_url")?;
            }
            "location_urls" => {
                let urls = value
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| parse_http_url(part, "location_urls"))
                    .collect::<Result<Vec<_>>>()?;

                if urls.is_empty() {
                    bail!("location_urls requires at least one URL");
                }
                self.location_urls = urls;
            }
            "request_timeout_seconds" => {
                self.request_timeout_seconds = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("request_timeout_seconds must be a number"))?
                    .max(1);
            }
            "fallback_path" => {
                self.fallback_path = expand_home(value);
            }
            "fallback_capacity" => {
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("fallback_capacity must be a number"))?;
                if parsed == 0 {
                    bail!("fallback_capacity must be greater than 0");
                }
                self.fallback_capacity = parsed;
            }
            "poll_seconds" => {
                self.poll_seconds = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("poll_seconds must be a number"))?
                    .max(1);
            }
            "list_limit" => {
                let parsed = value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("list_limit must be a number"))?;
                if parsed == 0 {
                    bail!("list_limit must be greater than 0");
                }
                self.list_limit = parsed;
            }
            "user_agent" => {
                self.user_agent = value.trim().to_string();
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: bind_address|api.bind, api_port|api.port, db_path|db.path, ledger_url|ledger.url, ip_lookup_url|lookup.ip_url, location_urls|lookup.location_urls, request_timeout_seconds|http.timeout_seconds, fallback_path|fallback.path, fallback_capacity|fallback.capacity, poll_seconds|watch.interval_seconds, list_limit|watch.limit, user_agent|report.user_agent"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "bind_address" => Some(self.bind_address.clone()),
            "api_port" => Some(self.api_port.to_string()),
            "db_path" => Some(self.db_path.display().to_string()),
            "ledger_url" => Some(self.ledger_url.clone()),
            "ip_lookup_url" => Some(self.ip_lookup_url.clone()),
            "location_urls" => Some(self.location_urls.join(",")),
            "request_timeout_seconds" => Some(self.request_timeout_seconds.to_string()),
            "fallback_path" => Some(self.fallback_path.display().to_string()),
            "fallback_capacity" => Some(self.fallback_capacity.to_string()),
            "poll_seconds" => Some(self.poll_seconds.to_string()),
            "list_limit" => Some(self.list_limit.to_string()),
            "user_agent" => Some(self.user_agent.clone()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "bind_address" | "api.bind" => "bind_address",
        "api_port" | "api.port" => "api_port",
        "db_path" | "db.path" => "db_path",
        "ledger_url" | "ledger.url" => "ledger_url",
        "ip_lookup_url" | "lookup.ip_url" => "ip_lookup_url",
        "location_urls" | "lookup.location_urls" => "location_urls",
        "request_timeout_seconds" | "http.timeout_seconds" => "request_timeout_seconds",
        "fallback_path" | "fallback.path" => "fallback_path",
        "fallback_capacity" | "fallback.capacity" => "fallback_capacity",
        "poll_seconds" | "watch.interval_seconds" => "poll_seconds",
        "list_limit" | "watch.limit" => "list_limit",
        "user_agent" | "report.user_agent" => "user_agent",
        _ => key,
    }
}

fn parse_http_url(raw: &str, key: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).with_context(|| format!("{key} must be a valid URL"))?;

    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => bail!("{key} must use http or https, got {other}"),
    }
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

fn default_root_dir() -> PathBuf {
    std::env::var_os(HOME_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CONFIG_FILE, Config};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn config_path_sits_under_root_dir() {
        assert_eq!(Config::config_path(), Config::root_dir().join(CONFIG_FILE));
    }

    #[test]
    fn load_from_reads_saved_shape() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(CONFIG_FILE);

        let mut config = Config::default();
        config.api_port = 9123;
        config.poll_seconds = 3;
        fs::write(&path, serde_json::to_string_pretty(&config).expect("serialize"))
            .expect("write config");

        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded.api_port, 9123);
        assert_eq!(loaded.poll_seconds, 3);

        fs::write(&path, "{ not json").expect("write garbage");
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn set_value_accepts_dotted_alias() {
        let mut config = Config::default();
        config.set_value("api.port", "8123").expect("port accepted");

        assert_eq!(config.api_port, 8123);
        assert_eq!(config.get_value("api_port").as_deref(), Some("8123"));
    }

    #[test]
    fn set_value_rejects_non_http_ledger_url() {
        let mut config = Config::default();

        assert!(config.set_value("ledger.url", "ftp://example.com").is_err());
        assert!(config.set_value("ledger.url", "not a url").is_err());
        assert_eq!(config.ledger_url, "http://127.0.0.1:7890");
    }

    #[test]
    fn location_urls_keep_order() {
        let mut config = Config::default();
        config
            .set_value(
                "lookup.location_urls",
                "https://b.example/json, https://a.example/json",
            )
            .expect("urls accepted");

        assert_eq!(
            config.location_urls,
            vec!["https://b.example/json", "https://a.example/json"]
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = Config::default();

        assert!(config.set_value("fallback.capacity", "0").is_err());
        assert_eq!(config.fallback_capacity, 100);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"api_port": 9000}"#).expect("parse");

        assert_eq!(parsed.api_port, 9000);
        assert_eq!(parsed.list_limit, 100);
        assert_eq!(parsed.location_urls.len(), 2);
    }
}
