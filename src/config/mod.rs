use config::{Config, ConfigError, Environment};
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::repository::StoreKind;

#[derive(Deserialize, Clone, Debug)]
pub struct DbConfig {
    pub location: String,
}

/// config properties for the folder store backend
#[derive(Deserialize, Clone, Debug)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// threads used when bootstrapping full paths. Defaults to the available parallelism
    pub workers: Option<usize>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LogConfig {
    /// one of `error`, `warn`, `info`, `debug`, `trace` or `off`
    pub level: String,
}

/// config properties for the whole of this application
#[derive(Deserialize, Clone, Debug)]
pub struct FolderStoreConfig {
    pub database: DbConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl FolderStoreConfig {
    /// configured bootstrap worker count, falling back to however many threads the machine can run at once
    pub fn workers(&self) -> usize {
        self.store.workers.filter(|w| *w > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn build_config() -> Result<FolderStoreConfig, ConfigError> {
    Config::builder()
        .set_default("database.location", FS_CONFIG_DEFAULT.database.location.as_str())?
        .set_default("store.kind", "nested_set")?
        .set_default("log.level", FS_CONFIG_DEFAULT.log.level.as_str())?
        .add_source(config::File::with_name("./FolderStore.toml").required(false))
        // FOLDER_STORE__DATABASE__LOCATION and friends
        .add_source(Environment::with_prefix("FOLDER_STORE").separator("__"))
        .build()?
        .try_deserialize()
}

/// Parses the config file located at ./FolderStore.toml, if it exists, with environment variables on top.
/// If the config can't be parsed, the defaults are used instead
pub fn parse_config() -> FolderStoreConfig {
    match build_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to parse config file, falling back to defaults. Exception is {e}");
            FS_CONFIG_DEFAULT.clone()
        }
    }
}

/// global variable for config, that way it doesn't need to be repeatedly parsed
pub static FOLDER_STORE_CONFIG: Lazy<FolderStoreConfig> = Lazy::new(parse_config);
static FS_CONFIG_DEFAULT: Lazy<FolderStoreConfig> = Lazy::new(|| FolderStoreConfig {
    database: DbConfig {
        location: "./db.sqlite".to_string(),
    },
    store: StoreConfig {
        kind: StoreKind::NestedSet,
        workers: None,
    },
    log: LogConfig {
        level: "info".to_string(),
    },
});
