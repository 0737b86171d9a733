//! Runtime settings for an engine deployment.
//!
//! Values come from an optional file and are overridden by environment
//! variables: `PERMISSIONS__NAMESPACE`, `PERMISSIONS__SPICEDB__ENDPOINT`,
//! `PERMISSIONS__SPICEDB__KEY` and so on.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "PERMISSIONS";

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Prefix applied to every schema type name.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Directory of policy YAML documents. The built-in policy is used when unset.
    #[serde(default)]
    pub policy_dir: Option<PathBuf>,
    #[serde(default)]
    pub spicedb: SpiceDbConfig,
}

#[derive(Debug, Deserialize)]
pub struct SpiceDbConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Preshared key sent as a bearer token.
    pub key: SecretString,
    /// Disable TLS.
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_namespace() -> String {
    "permissions".to_string()
}

fn default_endpoint() -> String {
    "localhost:50051".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for SpiceDbConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            key: SecretString::new(String::new()),
            insecure: false,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
