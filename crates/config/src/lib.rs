//! Layered configuration for booktally.
//!
//! Sources are merged in order, later ones winning:
//! 1. built-in defaults (a `local` store under the platform data directory),
//! 2. an optional configuration file, TOML, YAML or JSON by extension,
//! 3. environment variables prefixed with `BOOKTALLY_`, nested with `__`
//!    (`BOOKTALLY_STORE__ROOT=/srv/tally` sets `store.root`).
//!
//! ```toml
//! read_only = false
//!
//! [store]
//! backend = "local"
//! name = "primary"
//! root = "/var/lib/booktally"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment variables read by [`Config::load()`].
pub const ENV_PREFIX: &str = "BOOKTALLY_";
/// Store name used when none is configured.
pub const DEFAULT_STORE_NAME: &str = "primary";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Accept writes but drop them, logging what would have changed.
    pub read_only: bool,
    pub store: StoreConfig,
}

/// Which document store backs the accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// JSON documents on the local filesystem.
    Local {
        #[serde(default = "default_store_name")]
        name: String,
        /// Defaults to the platform data directory when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<PathBuf>,
    },
    /// Process-local store, lost on exit.
    Memory {
        #[serde(default = "default_store_name")]
        name: String,
    },
}
impl Default for StoreConfig {
    fn default() -> Self {
        Self::Local {
            name: default_store_name(),
            root: None,
        }
    }
}
impl StoreConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } | Self::Memory { name } => name,
        }
    }
}

fn default_store_name() -> String {
    DEFAULT_STORE_NAME.to_string()
}

/// The platform data directory for booktally (`~/.local/share/booktally` on
/// Linux).
pub fn default_root() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "booktally")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_raise(|| ErrorKind::NoDefaultDirectory)
}

impl Config {
    /// Load and validate configuration from defaults, an optional file, and
    /// the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(file)?)
    }

    /// The layered sources [`load()`](Self::load) extracts from.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            if !file.is_file() {
                exn::bail!(ErrorKind::Load(format!("no such file: {}", file.display())));
            }
            let extension = file.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
            figment = match extension.to_ascii_lowercase().as_str() {
                "toml" => figment.merge(Toml::file_exact(file)),
                "yaml" | "yml" => figment.merge(Yaml::file_exact(file)),
                "json" => figment.merge(Json::file_exact(file)),
                _ => {
                    exn::bail!(ErrorKind::Invalid(format!("unsupported file format: {}", file.display())));
                },
            };
            tracing::debug!(file = %file.display(), "Reading configuration file");
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate configuration from any figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .or_raise(|| ErrorKind::Load("could not deserialize configuration".to_string()))?;
        config.validated()
    }

    /// Check the configuration, filling in the default store root if unset.
    pub fn validated(mut self) -> Result<Self> {
        match &mut self.store {
            StoreConfig::Local { name, root } => {
                validate_name(name)?;
                let resolved = match root.take() {
                    Some(root) => root,
                    None => default_root()?,
                };
                if !resolved.is_absolute() {
                    exn::bail!(ErrorKind::Invalid(format!(
                        "store root must be an absolute path: {}",
                        resolved.display()
                    )));
                }
                *root = Some(resolved);
            },
            StoreConfig::Memory { name } => validate_name(name)?,
        }
        Ok(self)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        exn::bail!(ErrorKind::Invalid("store name must not be empty".to_string()));
    }
    Ok(())
}
