use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default REMS administrator and the paths appended to administrator bases
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    /// Prefetch hydration against the caller's FHIR server
    #[serde(default)]
    pub hydration: HydrationConfig,
    /// Directory API and SPL archive lookups
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if !self.server.discovery_path.starts_with('/')
            || self.server.discovery_path.trim_end_matches('/').is_empty()
        {
            return Err("server.discovery_path must be a non-root path starting with '/'".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Administrator validation
        if self.admin.default_base_url.trim().is_empty() {
            return Err("admin.default_base_url must not be empty".into());
        }
        if !self.admin.hook_path.starts_with('/') || !self.admin.etasu_path.starts_with('/') {
            return Err("admin.hook_path and admin.etasu_path must start with '/'".into());
        }
        // Timeouts
        if self.forwarding.timeout_ms == 0 {
            return Err("forwarding.timeout_ms must be > 0".into());
        }
        if self.hydration.timeout_ms == 0 {
            return Err("hydration.timeout_ms must be > 0".into());
        }
        if self.directory.api_timeout_ms == 0 || self.directory.spl_timeout_ms == 0 {
            return Err("directory timeouts must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forwarding.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Mount point of the CDS Hooks discovery endpoint and services
    #[serde(default = "default_discovery_path")]
    pub discovery_path: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3003
}
fn default_body_limit() -> usize {
    50 * 1024 * 1024
}
fn default_discovery_path() -> String {
    "/cds-services".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            discovery_path: default_discovery_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Base URL of the administrator used when no other is known
    #[serde(default = "default_admin_base_url")]
    pub default_base_url: String,
    /// Appended to an administrator base to form the hook base
    #[serde(default = "default_hook_path")]
    pub hook_path: String,
    /// Appended to an administrator base to form the ETASU endpoint
    #[serde(default = "default_etasu_path")]
    pub etasu_path: String,
}

fn default_admin_base_url() -> String {
    "http://localhost:8090".into()
}
fn default_hook_path() -> String {
    "/cds-services/rems-".into()
}
fn default_etasu_path() -> String {
    "/4_0_0/GuidanceResponse/$rems-etasu".into()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            default_base_url: default_admin_base_url(),
            hook_path: default_hook_path(),
            etasu_path: default_etasu_path(),
        }
    }
}

impl AdminConfig {
    /// Hook base for an administrator base URL.
    pub fn hook_base_for(&self, base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), self.hook_path)
    }

    /// ETASU endpoint for an administrator base URL.
    pub fn etasu_url_for(&self, base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), self.etasu_path)
    }

    pub fn default_hook_base(&self) -> String {
        self.hook_base_for(&self.default_base_url)
    }

    pub fn default_etasu_url(&self) -> String {
        self.etasu_url_for(&self.default_base_url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Bound on every outbound hook and ETASU forward
    #[serde(default = "default_forward_timeout_ms")]
    pub timeout_ms: u64,
}
fn default_forward_timeout_ms() -> u64 {
    10_000
}
impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_forward_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bound on each prefetch fetch
    #[serde(default = "default_hydration_timeout_ms")]
    pub timeout_ms: u64,
}
fn default_true() -> bool {
    true
}
fn default_hydration_timeout_ms() -> u64 {
    5_000
}
impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_hydration_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory API searched by NDC, answering a Bundle of Endpoint resources
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,
    /// Zip archive of dated SPL releases
    #[serde(default)]
    pub spl_archive_url: Option<String>,
    #[serde(default = "default_spl_timeout_ms")]
    pub spl_timeout_ms: u64,
    /// Prefix stripped from SPL REMS references
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_true")]
    pub refresh_on_startup: bool,
    /// Periodic refresh interval; 0 disables it
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

fn default_api_timeout_ms() -> u64 {
    10_000
}
fn default_spl_timeout_ms() -> u64 {
    60_000
}
fn default_discovery_prefix() -> String {
    "cds-hooks-discovery:".into()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_timeout_ms: default_api_timeout_ms(),
            spl_archive_url: None,
            spl_timeout_ms: default_spl_timeout_ms(),
            discovery_prefix: default_discovery_prefix(),
            refresh_on_startup: true,
            refresh_interval_secs: 0,
        }
    }
}

impl DirectoryConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn spl_timeout(&self) -> Duration {
        Duration::from_millis(self.spl_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// JSON file the routing table is loaded from and written through to
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("rems-intermediary.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., REMS__SERVER__PORT=3003
        builder = builder.add_source(
            Environment::with_prefix("REMS")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
