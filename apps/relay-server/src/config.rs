//! Relay configuration.
//!
//! Stored as TOML, by default at `~/.config/nasrelay/relay.toml`. The
//! first command-line argument or `NASRELAY_CONFIG` points elsewhere.

use std::path::{Path, PathBuf};

use nasrelay_storage::Credentials;
use serde::{Deserialize, Serialize};

/// Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener and staging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding files in transit.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Maximum number of files in one upload request.
    #[serde(default = "default_max_upload_files")]
    pub max_upload_files: usize,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Which storage protocol the relay talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sftp,
    #[default]
    Share,
    Memory,
}

/// Remote storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,

    /// SFTP host name or address.
    #[serde(default)]
    pub host: String,

    /// SFTP port.
    #[serde(default = "default_sftp_port")]
    pub port: u16,

    /// Share address in `//host/share` form.
    #[serde(default)]
    pub share: String,

    /// Where the share is mounted locally.
    #[serde(default)]
    pub mount_point: Option<PathBuf>,

    /// Mount table listing the share's mount options.
    #[serde(default)]
    pub mount_table: Option<PathBuf>,

    /// Remote folder every client path is relative to.
    #[serde(default)]
    pub base_path: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_port() -> u16 {
    3000
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("nasrelay-staging")
}

fn default_max_upload_files() -> usize {
    50
}

fn default_max_body_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_sftp_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_domain() -> String {
    "WORKGROUP".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            staging_dir: default_staging_dir(),
            max_upload_files: default_max_upload_files(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            host: String::new(),
            port: default_sftp_port(),
            share: String::new(),
            mount_point: None,
            mount_table: None,
            base_path: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            credentials: CredentialsConfig::default(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            domain: default_domain(),
        }
    }
}

impl From<&CredentialsConfig> for Credentials {
    fn from(config: &CredentialsConfig) -> Self {
        Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
            domain: config.domain.clone(),
        }
    }
}

impl Config {
    /// Loads the configuration from the resolved path.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load() -> anyhow::Result<(Self, PathBuf)> {
        let path = config_path(std::env::args().nth(1), std::env::var("NASRELAY_CONFIG").ok());
        let config = Self::load_from(&path)?;
        Ok((config, path))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid configuration {}: {e}", path.display()))?;
        Ok(config)
    }
}

/// Resolves the configuration path: CLI argument, then environment, then
/// the per-user default.
fn config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    if let Some(path) = arg.or(env).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("nasrelay").join("relay.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("nasrelay")
            .join("relay.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.max_upload_files, 50);
        assert_eq!(config.server.max_body_bytes, 512 * 1024 * 1024);
        assert_eq!(config.storage.kind, StorageKind::Share);
        assert_eq!(config.storage.port, 22);
        assert_eq!(config.storage.connect_timeout_secs, 30);
        assert_eq!(config.storage.credentials.domain, "WORKGROUP");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
            [storage]
            kind = "sftp"
            host = "nas.local"
            base_path = "/Inbox/FeatureFiles"

            [storage.credentials]
            username = "relay"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.kind, StorageKind::Sftp);
        assert_eq!(config.storage.host, "nas.local");
        assert_eq!(config.storage.port, 22);
        assert_eq!(config.storage.credentials.username, "relay");
        assert_eq!(config.storage.credentials.domain, "WORKGROUP");
    }

    #[test]
    fn share_section() {
        let toml_str = r#"
            [server]
            port = 8080

            [storage]
            share = "//192.168.8.4/Ocean"
            mount_point = "/mnt/ocean"
            mount_table = "/etc/mtab"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.kind, StorageKind::Share);
        assert_eq!(config.storage.mount_point, Some(PathBuf::from("/mnt/ocean")));
        assert_eq!(config.storage.mount_table, Some(PathBuf::from("/etc/mtab")));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[storage]\nkind = \"ftp\"");
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn path_precedence() {
        assert_eq!(
            config_path(Some("a.toml".into()), Some("b.toml".into())),
            PathBuf::from("a.toml")
        );
        assert_eq!(
            config_path(None, Some("b.toml".into())),
            PathBuf::from("b.toml")
        );
        assert!(
            config_path(None, None)
                .to_string_lossy()
                .contains("nasrelay")
        );
    }

    #[test]
    fn credentials_conversion() {
        let creds = Credentials::from(&CredentialsConfig {
            username: "u".into(),
            password: "p".into(),
            domain: "D".into(),
        });
        assert_eq!(creds.username, "u");
        assert_eq!(creds.domain, "D");
    }
}
