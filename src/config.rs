use crate::adapters::outbound::DEFAULT_API_URL;
use crate::application::orchestration::DEFAULT_AUTO_STOP_CONCURRENCY;
use crate::domain::services::strip_port;
use std::collections::BTreeMap;

/// Placeholder token shipped in sample configurations.
const EXAMPLE_TOKEN: &str = "example-token";

#[derive(Debug, Clone)]
pub struct Config {
    // Hosting API settings
    pub api_url: String,
    pub api_token: Option<String>,
    pub api_timeout_secs: u64,
    pub cache_ttl_secs: u64,

    // Proxy settings
    /// Backend name -> `host[:port]`
    pub servers: BTreeMap<String, String>,
    pub hosted_domain: String,
    pub watch_servers: bool,

    // Batch jobs
    pub auto_start_enabled: bool,
    pub auto_start_servers: Vec<String>,
    pub auto_stop_enabled: bool,
    pub auto_stop_servers: Vec<String>,
    pub auto_stop_concurrency: usize,

    // Sync engine settings
    pub poll_secs: u64,
    pub queue_capacity: usize,
    pub wait_purge_secs: u64,

    // Admin API settings
    pub admin_enabled: bool,
    pub admin_listen_addr: String,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            api_timeout_secs: 10,
            cache_ttl_secs: 60,
            servers: BTreeMap::new(),
            hosted_domain: "exaroton.me".to_string(),
            watch_servers: false,
            auto_start_enabled: false,
            auto_start_servers: Vec::new(),
            auto_stop_enabled: false,
            auto_stop_servers: Vec::new(),
            auto_stop_concurrency: DEFAULT_AUTO_STOP_CONCURRENCY,
            poll_secs: 5,
            queue_capacity: 1024,
            wait_purge_secs: 30,
            admin_enabled: false,
            admin_listen_addr: "0.0.0.0:8082".to_string(),
            debug: false,
        }
    }
}

impl Config {
    /// Check settings that have no usable default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.api_token.as_deref() {
            None | Some("") => return Err(ConfigError::MissingToken),
            Some(EXAMPLE_TOKEN) => return Err(ConfigError::PlaceholderToken),
            Some(_) => {}
        }
        if self.auto_stop_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    /// Token to authenticate with. Only valid after [`validate`](Self::validate).
    pub fn token(&self) -> &str {
        self.api_token.as_deref().unwrap_or_default()
    }

    /// Backends configured in the proxy itself, as `(name, host, port)`.
    pub fn static_backends(&self, default_port: u16) -> Vec<(String, String, u16)> {
        self.servers
            .iter()
            .map(|(name, target)| {
                let (host, port) = split_host_port(target, default_port);
                (name.clone(), host.to_string(), port)
            })
            .collect()
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("EDGESYNC_API_TOKEN is required")]
    MissingToken,
    #[error("EDGESYNC_API_TOKEN still holds the example token")]
    PlaceholderToken,
    #[error("auto-stop concurrency must be at least 1")]
    ZeroConcurrency,
}

pub fn load_config() -> anyhow::Result<Config> {
    Ok(load_config_from(|key| std::env::var(key).ok()))
}

/// Build a config from a variable lookup. Unset or unparsable values fall
/// back to defaults.
pub fn load_config_from(var: impl Fn(&str) -> Option<String>) -> Config {
    let defaults = Config::default();

    let flag = |key: &str| {
        var(key)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false)
    };
    let list = |key: &str| var(key).map(|v| parse_list(&v)).unwrap_or_default();

    let api_url = var("EDGESYNC_API_URL").unwrap_or(defaults.api_url);
    let api_token = var("EDGESYNC_API_TOKEN").filter(|t| !t.is_empty());

    let api_timeout_secs = var("EDGESYNC_API_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.api_timeout_secs);

    let cache_ttl_secs = var("EDGESYNC_CACHE_TTL_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.cache_ttl_secs);

    let servers = var("EDGESYNC_SERVERS")
        .map(|v| parse_aliases(&v))
        .unwrap_or_default();

    let hosted_domain = var("EDGESYNC_HOSTED_DOMAIN").unwrap_or(defaults.hosted_domain);
    let watch_servers = flag("EDGESYNC_WATCH_SERVERS");

    // Batch jobs
    let auto_start_enabled = flag("EDGESYNC_AUTO_START_ENABLED");
    let auto_start_servers = list("EDGESYNC_AUTO_START_SERVERS");
    let auto_stop_enabled = flag("EDGESYNC_AUTO_STOP_ENABLED");
    let auto_stop_servers = list("EDGESYNC_AUTO_STOP_SERVERS");

    let auto_stop_concurrency = var("EDGESYNC_AUTO_STOP_CONCURRENCY")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.auto_stop_concurrency);

    // Sync engine settings
    let poll_secs = var("EDGESYNC_POLL_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.poll_secs);

    let queue_capacity = var("EDGESYNC_QUEUE_CAPACITY")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.queue_capacity);

    let wait_purge_secs = var("EDGESYNC_WAIT_PURGE_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.wait_purge_secs);

    // Admin API settings
    let admin_enabled = flag("EDGESYNC_ADMIN_ENABLED");
    let admin_listen_addr =
        var("EDGESYNC_ADMIN_LISTEN_ADDR").unwrap_or(defaults.admin_listen_addr);

    let debug = var("DEBUG").is_some();

    Config {
        api_url,
        api_token,
        api_timeout_secs,
        cache_ttl_secs,
        servers,
        hosted_domain,
        watch_servers,
        auto_start_enabled,
        auto_start_servers,
        auto_stop_enabled,
        auto_stop_servers,
        auto_stop_concurrency,
        poll_secs,
        queue_capacity,
        wait_purge_secs,
        admin_enabled,
        admin_listen_addr,
        debug,
    }
}

/// Parse `name=host[:port],...` into an alias table. Malformed entries are
/// skipped.
pub fn parse_aliases(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (name, target) = entry.split_once('=')?;
            let (name, target) = (name.trim(), target.trim());
            if name.is_empty() || target.is_empty() {
                tracing::warn!("ignoring malformed server entry: {}", entry);
                return None;
            }
            Some((name.to_string(), target.to_string()))
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_host_port(target: &str, default_port: u16) -> (&str, u16) {
    let host = strip_port(target);
    let port = target[host.len()..]
        .strip_prefix(':')
        .and_then(|port| port.parse().ok())
        .unwrap_or(default_port);
    (host, port)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_config_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.api_url, "https://api.exaroton.com/v1");
        assert_eq!(cfg.cache_ttl_secs, 60);
        assert_eq!(cfg.auto_stop_concurrency, 4);
        assert!(!cfg.watch_servers);
        assert!(!cfg.admin_enabled);
    }

    #[test]
    fn test_load_config_defaults() {
        let cfg = load(&[]);
        assert_eq!(cfg.api_url, "https://api.exaroton.com/v1");
        assert_eq!(cfg.admin_listen_addr, "0.0.0.0:8082");
        assert_eq!(cfg.queue_capacity, 1024);
        assert_eq!(cfg.api_token, None);
        assert!(!cfg.debug);
    }

    #[test]
    fn test_load_config_with_flags() {
        let cfg = load(&[
            ("EDGESYNC_WATCH_SERVERS", "true"),
            ("EDGESYNC_AUTO_START_ENABLED", "1"),
            ("EDGESYNC_AUTO_STOP_ENABLED", "TRUE"),
            ("EDGESYNC_ADMIN_ENABLED", "no"),
            ("DEBUG", "1"),
        ]);
        assert!(cfg.watch_servers);
        assert!(cfg.auto_start_enabled);
        assert!(cfg.auto_stop_enabled);
        assert!(!cfg.admin_enabled);
        assert!(cfg.debug);
    }

    #[test]
    fn test_load_config_with_server_lists() {
        let cfg = load(&[
            ("EDGESYNC_AUTO_START_SERVERS", "lobby, arena,,"),
            ("EDGESYNC_AUTO_STOP_SERVERS", "lobby"),
        ]);
        assert_eq!(cfg.auto_start_servers, vec!["lobby", "arena"]);
        assert_eq!(cfg.auto_stop_servers, vec!["lobby"]);
    }

    #[test]
    fn test_load_config_parse_error_uses_default() {
        let cfg = load(&[
            ("EDGESYNC_CACHE_TTL_SECS", "soon"),
            ("EDGESYNC_AUTO_STOP_CONCURRENCY", "-1"),
        ]);
        assert_eq!(cfg.cache_ttl_secs, 60);
        assert_eq!(cfg.auto_stop_concurrency, 4);
    }

    #[test]
    fn test_load_config_with_custom_values() {
        let cfg = load(&[
            ("EDGESYNC_API_URL", "http://localhost:9000/v1"),
            ("EDGESYNC_API_TOKEN", "secret"),
            ("EDGESYNC_CACHE_TTL_SECS", "5"),
            ("EDGESYNC_POLL_SECS", "2"),
            ("EDGESYNC_HOSTED_DOMAIN", "example.me"),
            ("EDGESYNC_ADMIN_LISTEN_ADDR", "127.0.0.1:9082"),
        ]);
        assert_eq!(cfg.api_url, "http://localhost:9000/v1");
        assert_eq!(cfg.token(), "secret");
        assert_eq!(cfg.cache_ttl_secs, 5);
        assert_eq!(cfg.poll_secs, 2);
        assert_eq!(cfg.hosted_domain, "example.me");
        assert_eq!(cfg.admin_listen_addr, "127.0.0.1:9082");
    }

    // ===== Alias Tests =====

    #[test]
    fn test_parse_aliases() {
        let aliases = parse_aliases("lobby=lobby.example.me:25565, survival = survival.example.me,broken,=x");
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases["lobby"], "lobby.example.me:25565");
        assert_eq!(aliases["survival"], "survival.example.me");
    }

    #[test]
    fn test_static_backends() {
        let cfg = load(&[("EDGESYNC_SERVERS", "lobby=lobby.example.me:30001,hub=10.0.0.1")]);
        assert_eq!(
            cfg.static_backends(25565),
            vec![
                ("hub".to_string(), "10.0.0.1".to_string(), 25565),
                ("lobby".to_string(), "lobby.example.me".to_string(), 30001),
            ]
        );
    }

    #[test]
    fn test_static_backend_host_matches_alias_lookup() {
        let cfg = load(&[("EDGESYNC_SERVERS", "pvp=pvp.example.me:99999,odd=odd.example.me:")]);
        assert_eq!(
            cfg.static_backends(25565),
            vec![
                ("odd".to_string(), "odd.example.me:".to_string(), 25565),
                ("pvp".to_string(), "pvp.example.me".to_string(), 25565),
            ]
        );
    }

    // ===== Validation Tests =====

    #[test]
    fn test_validate_missing_token() {
        assert_eq!(load(&[]).validate(), Err(ConfigError::MissingToken));
        assert_eq!(
            load(&[("EDGESYNC_API_TOKEN", "")]).validate(),
            Err(ConfigError::MissingToken)
        );
    }

    #[test]
    fn test_validate_placeholder_token() {
        let cfg = load(&[("EDGESYNC_API_TOKEN", "example-token")]);
        assert_eq!(cfg.validate(), Err(ConfigError::PlaceholderToken));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let cfg = load(&[
            ("EDGESYNC_API_TOKEN", "secret"),
            ("EDGESYNC_AUTO_STOP_CONCURRENCY", "0"),
        ]);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroConcurrency));
    }

    #[test]
    fn test_validate_ok() {
        assert!(load(&[("EDGESYNC_API_TOKEN", "secret")]).validate().is_ok());
    }
}
