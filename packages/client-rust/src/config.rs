//! Client configuration: process settings and the per-service YAML file.
//!
//! The services file maps each service code name to its configured versions:
//!
//! ```yaml
//! vpos:
//!   v0.1:
//!     doc_url: http://localhost:9292/vpos/doc/0.1
//!     api_url: http://localhost:9292/vpos/api/0.1/
//!     public_key: 1234567
//!     private_key: CAFEBABE
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default location of the services file, relative to the working directory.
pub const DEFAULT_CONFIGURATION_FILE: &str = "config/services.yml";

// ---------------------------------------------------------------------------
// Signing choices
// ---------------------------------------------------------------------------

/// Which signatures accompany an outgoing request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    /// Static key signature only.
    #[default]
    Static,
    /// Static signature plus a second one made with the negotiated session key.
    Session,
}

/// Format of the `Authorization` header value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthHeaderStyle {
    /// `BAAS v1 apps/<public_key>:<signature>`
    #[default]
    Baas,
    /// `<public_key>:<signature>`
    Legacy,
}

// ---------------------------------------------------------------------------
// RemoteSettings
// ---------------------------------------------------------------------------

/// Process-level client settings.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Request timeout used when a service does not override it.
    pub default_timeout: Duration,
    /// Idle connections kept per host when a service does not override it.
    pub pool_size: usize,
    /// Path of the services YAML file.
    pub configuration_file: PathBuf,
    pub signing_mode: SigningMode,
    pub auth_header_style: AuthHeaderStyle,
    /// Appended to `<code_name>.<version>` to namespace session keys.
    pub session_namespace_suffix: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            pool_size: 10,
            configuration_file: PathBuf::from(DEFAULT_CONFIGURATION_FILE),
            signing_mode: SigningMode::Static,
            auth_header_style: AuthHeaderStyle::Baas,
            session_namespace_suffix: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceSettings
// ---------------------------------------------------------------------------

/// One configured (service, version) record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub doc_url: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default, deserialize_with = "yaml_scalar")]
    pub public_key: Option<String>,
    #[serde(default, deserialize_with = "yaml_scalar")]
    pub private_key: Option<String>,
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub signing_mode: Option<SigningMode>,
    #[serde(default)]
    pub auth_header_style: Option<AuthHeaderStyle>,
    /// Any other keys present in the record.
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

impl ServiceSettings {
    /// Creates a record with documentation and API locations.
    #[must_use]
    pub fn new(doc_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            doc_url: Some(doc_url.into()),
            api_url: Some(api_url.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_keys(mut self, public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self.private_key = Some(private_key.into());
        self
    }

    #[must_use]
    pub fn timeout(&self, defaults: &RemoteSettings) -> Duration {
        self.timeout_secs
            .map_or(defaults.default_timeout, Duration::from_secs)
    }

    #[must_use]
    pub fn pool_size(&self, defaults: &RemoteSettings) -> usize {
        self.pool_size.unwrap_or(defaults.pool_size)
    }
}

/// Keys are often written as bare numbers in YAML; read them as text.
fn yaml_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        Some(serde_yaml::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration lookup and loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("service `{0}` is not configured")]
    ServiceNotFound(String),
    #[error("version `{version}` of service `{code_name}` is not configured")]
    VersionNotFound { code_name: String, version: String },
    #[error("service `{code_name}` has {count} configured versions; a version must be given")]
    AmbiguousVersion { code_name: String, count: usize },
    #[error("`{setting}` is not set for service `{code_name}` version `{version}`")]
    MissingSetting {
        code_name: String,
        version: String,
        setting: &'static str,
    },
}

// ---------------------------------------------------------------------------
// ServicesConfig
// ---------------------------------------------------------------------------

/// Configured services: `code_name -> "v<version>" -> ServiceSettings`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServicesConfig {
    services: IndexMap<String, IndexMap<String, ServiceSettings>>,
}

/// Normalizes a version to its configuration key (`0.1` -> `v0.1`).
#[must_use]
pub fn version_key(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

/// Strips the leading `v` of a configuration key.
#[must_use]
pub fn bare_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

impl ServicesConfig {
    /// Loads the services file. A missing file is an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` when the file exists but cannot be read, and
    /// `ConfigError::Yaml` when it is not valid YAML of the expected shape.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "services file not found, using empty configuration");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_yaml_str(&text)
    }

    /// Parses services YAML. A document that is not a mapping (including an
    /// empty one) is an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Yaml` on malformed input.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let document: serde_yaml::Value = serde_yaml::from_str(text)?;
        if !document.is_mapping() {
            return Ok(Self::default());
        }
        let raw: IndexMap<String, IndexMap<String, ServiceSettings>> =
            serde_yaml::from_value(document)?;
        let services = raw
            .into_iter()
            .map(|(code_name, versions)| {
                let versions = versions
                    .into_iter()
                    .map(|(version, settings)| (version_key(&version), settings))
                    .collect();
                (code_name, versions)
            })
            .collect();
        Ok(Self { services })
    }

    /// Adds or replaces the record for `(code_name, version)`.
    pub fn insert(&mut self, code_name: impl Into<String>, version: &str, settings: ServiceSettings) {
        self.services
            .entry(code_name.into())
            .or_default()
            .insert(version_key(version), settings);
    }

    #[must_use]
    pub fn contains_service(&self, code_name: &str) -> bool {
        self.services.contains_key(code_name)
    }

    /// Configured versions of a service, without the `v` prefix.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ServiceNotFound` for an unknown service.
    pub fn versions(&self, code_name: &str) -> Result<Vec<&str>, ConfigError> {
        self.services
            .get(code_name)
            .map(|versions| versions.keys().map(|key| bare_version(key)).collect())
            .ok_or_else(|| ConfigError::ServiceNotFound(code_name.to_string()))
    }

    /// The single configured version of a service.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ServiceNotFound` for an unknown service and
    /// `ConfigError::AmbiguousVersion` unless exactly one version is configured.
    pub fn service_version(&self, code_name: &str) -> Result<String, ConfigError> {
        match self.versions(code_name)?.as_slice() {
            [only] => Ok((*only).to_string()),
            other => Err(ConfigError::AmbiguousVersion {
                code_name: code_name.to_string(),
                count: other.len(),
            }),
        }
    }

    /// The record for `(code_name, version)`.
    ///
    /// # Errors
    ///
    /// Distinguishes an unknown service from an unconfigured version.
    pub fn settings(&self, code_name: &str, version: &str) -> Result<&ServiceSettings, ConfigError> {
        self.services
            .get(code_name)
            .ok_or_else(|| ConfigError::ServiceNotFound(code_name.to_string()))?
            .get(&version_key(version))
            .ok_or_else(|| ConfigError::VersionNotFound {
                code_name: code_name.to_string(),
                version: bare_version(version).to_string(),
            })
    }
}
