//! Configuration module for the index engine.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`.tundra/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TUNDRA_` and use double
//! underscores to separate nested levels:
//! - `TUNDRA_INDEX__CONCURRENCY=8` sets `index.concurrency`
//! - `TUNDRA_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Index storage configuration
    #[serde(default)]
    pub index: IndexOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexOptions {
    /// Directory holding `.sidx`/`.fidx` blobs and the `index.json` snapshot
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,

    /// Maximum number of translation units indexed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Path of the compilation database consumed by `index_all`
    #[serde(default = "default_compile_commands")]
    pub compile_commands: PathBuf,

    /// Delete unreferenced `.sidx`/`.fidx` files when the registry loads
    #[serde(default = "default_true")]
    pub gc_orphans: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `scheduler = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_index_dir() -> PathBuf {
    PathBuf::from(".tundra/index")
}
fn default_concurrency() -> usize {
    num_cpus::get()
}
fn default_compile_commands() -> PathBuf {
    PathBuf::from("compile_commands.json")
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index: IndexOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            concurrency: default_concurrency(),
            compile_commands: default_compile_commands(),
            gc_orphans: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_path =
            Self::find_workspace_config().unwrap_or_else(|| PathBuf::from(".tundra/settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("TUNDRA_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
    }

    /// Find the workspace root by looking for a `.tundra` directory,
    /// searching from the current directory up to the filesystem root.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".tundra");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Write a default settings file, returning its path.
    pub fn init(force: bool) -> std::io::Result<PathBuf> {
        let dir = PathBuf::from(".tundra");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("settings.toml");

        if path.exists() && !force {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists (use --force to overwrite)", path.display()),
            ));
        }

        let toml = toml_template(&Settings::default());
        std::fs::write(&path, toml)?;
        Ok(path)
    }
}

fn toml_template(settings: &Settings) -> String {
    format!(
        "# Tundra index engine configuration\n\
         version = {}\n\n\
         [index]\n\
         dir = \"{}\"\n\
         concurrency = {}\n\
         compile_commands = \"{}\"\n\
         gc_orphans = {}\n\n\
         [logging]\n\
         default = \"{}\"\n",
        settings.version,
        settings.index.dir.display(),
        settings.index.concurrency,
        settings.index.compile_commands.display(),
        settings.index.gc_orphans,
        settings.logging.default,
    )
}
