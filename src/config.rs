use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::{env, fs, path::Path};
use tracing::info;

pub const DEFAULT_PORT: u16 = 9443;
pub const DOCKER_HUB_AUTH_URL: &str = "https://auth.docker.io";
pub const DOCKER_HUB_API_URL: &str = "https://index.docker.io";
pub const QUAY_API_URL: &str = "https://quay.io";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub webserver: Webserver,
    pub upstream: Upstream,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub registries: Registries,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    #[serde(default = "default_port")]
    pub port: u16,
    pub tls: Option<ServerTls>,
}

impl Default for Webserver {
    fn default() -> Self {
        Webserver {
            port: DEFAULT_PORT,
            tls: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTls {
    pub certificate_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct Upstream {
    pub uri: String,
    pub tls: Option<UpstreamTls>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTls {
    pub client_certificate_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    #[serde(default)]
    pub ca_certificate_paths: Vec<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registries {
    #[serde(default)]
    pub docker_hub: DockerHub,
    #[serde(default)]
    pub quay: Quay,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerHub {
    /// File containing `<username>:<password>`
    pub credential_file: Option<PathBuf>,
    #[serde(default = "default_docker_hub_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_docker_hub_api_url")]
    pub api_url: String,
}

impl Default for DockerHub {
    fn default() -> Self {
        DockerHub {
            credential_file: None,
            auth_url: default_docker_hub_auth_url(),
            api_url: default_docker_hub_api_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quay {
    /// File containing a Quay bearer token
    pub credential_file: Option<PathBuf>,
    #[serde(default = "default_quay_api_url")]
    pub api_url: String,
}

impl Default for Quay {
    fn default() -> Self {
        Quay {
            credential_file: None,
            api_url: default_quay_api_url(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_docker_hub_auth_url() -> String {
    DOCKER_HUB_AUTH_URL.to_string()
}

fn default_docker_hub_api_url() -> String {
    DOCKER_HUB_API_URL.to_string()
}

fn default_quay_api_url() -> String {
    QUAY_API_URL.to_string()
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let missing: Vec<&str> = re
        .captures_iter(input)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| env::var(name).is_err())
        .collect();
    if !missing.is_empty() {
        bail!("Missing environment variable: {}", missing.join(", "));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });

    Ok(result.into_owned())
}
