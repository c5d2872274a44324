use crate::error::DeskError;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub remote: Remote,
    pub secrets: Secrets,
    pub container: ContainerConfig,
    pub compute: ComputeConfig,
    pub deploy: Deploy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Remote {
    pub host: String,
    pub user: Option<String>,
    pub workstation_hostname: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Secrets {
    pub role_dir: String,
    pub users_dir: String,
    pub ssh_key_name: String,
    pub env_file: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub ports: Vec<u16>,
    pub privileged: bool,
    pub sudo: bool,
    pub settle_secs: u64,
    pub log_lines: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeConfig {
    pub cli: String,
    pub zone: String,
    pub platform: String,
    pub preset: String,
    pub image: String,
    pub disk_size_gb: u32,
    pub name_prefix: String,
    pub endpoint: String,
    pub federation_endpoint: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Deploy {
    pub local_path: Option<String>,
    pub remote_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            remote: Remote::default(),
            secrets: Secrets::default(),
            container: ContainerConfig::default(),
            compute: ComputeConfig::default(),
            deploy: Deploy::default(),
        }
    }
}

impl Default for Remote {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            user: None,
            workstation_hostname: "".to_string(),
        }
    }
}

impl Default for Secrets {
    fn default() -> Self {
        Self {
            role_dir: ".secrets/roles/admin".to_string(),
            users_dir: ".secrets/users".to_string(),
            ssh_key_name: "id_ed25519".to_string(),
            env_file: ".secrets/services/nebius/set_env.sh".to_string(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "magentic-desktop".to_string(),
            image: "ghcr.io/laquereric/magentic-desktop:latest".to_string(),
            ports: vec![3389, 8080],
            privileged: true,
            sudo: true,
            settle_secs: 3,
            log_lines: 10,
        }
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            cli: "nebius".to_string(),
            zone: "eu-north1".to_string(),
            platform: "cpu-d3".to_string(),
            preset: "4vcpu-16gb".to_string(),
            image: "ubuntu22.04-driverless".to_string(),
            disk_size_gb: 64,
            name_prefix: "desk".to_string(),
            endpoint: "api.nebius.cloud".to_string(),
            federation_endpoint: "auth.nebius.com".to_string(),
        }
    }
}

impl Default for Deploy {
    fn default() -> Self {
        Self {
            local_path: None,
            remote_path: "~/deskhost".to_string(),
        }
    }
}

impl Config {
    pub fn remote_host(&self) -> Result<&str, DeskError> {
        let host = self.remote.host.trim();
        if host.is_empty() {
            return Err(DeskError::Config(
                "remote.host is not set; add it to the config file".to_string(),
            ));
        }
        Ok(host)
    }
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("DESKCTL_CONFIG") {
        return PathBuf::from(path);
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    base
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var("DESKCTL_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("deskctl");
    base
}

pub fn resolve_project_root(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("DESKCTL_PROJECT_ROOT") {
        return PathBuf::from(path);
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn read_config_from_str(content: &str) -> Result<Config, DeskError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != CONFIG_VERSION {
        return Err(DeskError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    Ok(cfg)
}

/// Reads the config at `path`, falling back to defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<Config, DeskError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content).map_err(|err| {
        DeskError::Config(format!(
            "config is invalid. Please edit {} and try again. ({})",
            path.display(),
            err
        ))
    })
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

/// Resolves a config path relative to the project root unless it is absolute or home-relative.
pub fn project_path(project_root: &Path, input: &str) -> PathBuf {
    let expanded = PathBuf::from(expand_path(input));
    if expanded.is_absolute() {
        expanded
    } else {
        project_root.join(expanded)
    }
}
