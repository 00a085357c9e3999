//! Configuration
//!
//! Typed configuration tree consumed by the DNS and REST subsystems,
//! loaded from a TOML file. Every section has defaults, so a missing file
//! yields a runnable (DNS-only, JWT-secured) server.
//!
//! Config path resolution: explicit `--config` flag, then the
//! `HOMEDNS_CONFIG` environment variable, then `homedns.toml` in the
//! working directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "homedns.toml";
pub const CONFIG_PATH_ENV: &str = "HOMEDNS_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub http: Option<HttpConfig>,
    pub https: Option<HttpsConfig>,
    pub jwt_auth: JwtAuthConfig,
    pub basic_auth: Option<BasicAuthConfig>,
    pub no_auth: NoAuthConfig,
    /// Attach internal error detail to REST error bodies (development only)
    pub display_tracebacks: bool,
    pub dns: DnsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: None,
            https: None,
            jwt_auth: JwtAuthConfig::default(),
            basic_auth: None,
            no_auth: NoAuthConfig::default(),
            display_tracebacks: false,
            dns: DnsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    pub listen: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpsConfig {
    pub listen: u16,
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    /// Bootstrap convenience handled by external tooling; when set and the
    /// pair is absent, startup fails with instructions rather than serving
    /// without TLS.
    pub generate_keys: bool,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            listen: 443,
            private_key: PathBuf::from("server.pem"),
            public_key: PathBuf::from("server.crt"),
            generate_keys: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JwtAuthConfig {
    pub enabled: bool,
    pub algorithms: Vec<String>,
    /// Subject registry file; certificates live in the same directory
    pub subjects: PathBuf,
    pub issuer: String,
    pub audience: Vec<String>,
    /// Permitted clock skew in seconds for exp/nbf validation
    pub leeway: u64,
}

impl Default for JwtAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithms: vec!["RS256".to_string()],
            subjects: PathBuf::from("jwt_secrets/jwt_subjects.toml"),
            issuer: "homedns-clients".to_string(),
            audience: vec!["homedns-api".to_string()],
            leeway: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BasicAuthConfig {
    pub enabled: bool,
    pub secrets: PathBuf,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secrets: PathBuf::from("basic_secrets.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoAuthConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnsConfig {
    pub listen_tcp: u16,
    pub listen_udp: u16,
    pub cache: CacheConfig,
    pub forwarding: ForwardingConfig,
    pub database: DatabaseConfig,
    /// Default TTL applied when a stored record has none
    pub ttl: u32,
    /// Owner suffixes this server answers authoritatively for
    pub soa_domains: Vec<String>,
    /// Name servers advertised in SOA/NS answers
    pub name_servers: Vec<String>,
    /// 0=warn, 1=info, 2=debug, 3+=trace
    pub verbosity: u8,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_tcp: 53,
            listen_udp: 53,
            cache: CacheConfig::default(),
            forwarding: ForwardingConfig::default(),
            database: DatabaseConfig::default(),
            ttl: 300,
            soa_domains: Vec::new(),
            name_servers: Vec::new(),
            verbosity: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForwardingConfig {
    pub enabled: bool,
    /// Upstream resolvers, `host` or `host:port`
    pub servers: Vec<String>,
    /// Per-attempt timeout schedule in seconds
    pub timeouts: Vec<u64>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            servers: vec!["208.67.222.222".to_string(), "208.67.220.220".to_string()],
            timeouts: vec![1, 3, 11, 30],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub sqlite: SqliteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("records.sqlite"),
        }
    }
}

impl AppConfig {
    /// Load configuration, falling back to defaults when no file exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Render the effective configuration, for `homedns config`
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.http.is_none());
        assert!(config.https.is_none());
        assert!(config.jwt_auth.enabled);
        assert_eq!(config.jwt_auth.algorithms, vec!["RS256"]);
        assert_eq!(config.jwt_auth.issuer, "homedns-clients");
        assert_eq!(config.jwt_auth.leeway, 30);
        assert!(!config.no_auth.enabled);
        assert_eq!(config.dns.listen_udp, 53);
        assert_eq!(config.dns.listen_tcp, 53);
        assert!(config.dns.cache.enabled);
        assert!(config.dns.forwarding.enabled);
        assert_eq!(config.dns.forwarding.timeouts, vec![1, 3, 11, 30]);
        assert_eq!(config.dns.ttl, 300);
        assert_eq!(config.dns.verbosity, 1);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/homedns.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
display_tracebacks = true

[http]
listen = 8080

[dns]
listen_udp = 10053
listen_tcp = 10053
ttl = 600
soa_domains = ["example.com", "home.arpa"]
name_servers = ["ns1.example.com"]

[dns.forwarding]
enabled = false

[dns.database.sqlite]
path = "/var/lib/homedns/records.sqlite"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert!(config.display_tracebacks);
        assert_eq!(config.http, Some(HttpConfig { listen: 8080 }));
        assert_eq!(config.dns.listen_udp, 10053);
        assert_eq!(config.dns.ttl, 600);
        assert_eq!(config.dns.soa_domains, vec!["example.com", "home.arpa"]);
        assert!(!config.dns.forwarding.enabled);
        // untouched sections keep defaults
        assert!(config.dns.cache.enabled);
        assert!(config.jwt_auth.enabled);
        assert_eq!(
            config.dns.database.sqlite.path,
            PathBuf::from("/var/lib/homedns/records.sqlite")
        );
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not [valid toml").unwrap();
        assert!(AppConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_config_dump_roundtrip() {
        let mut config = AppConfig::default();
        config.dns.soa_domains = vec!["example.com".to_string()];
        config.http = Some(HttpConfig { listen: 8080 });

        let dumped = config.to_toml_string().unwrap();
        let reloaded: AppConfig = toml::from_str(&dumped).unwrap();
        assert_eq!(reloaded, config);
    }
}
