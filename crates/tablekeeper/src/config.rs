use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

pub static CONFIG: LazyLock<DynAppConfig> = LazyLock::new(get_config);

pub const DEFAULT_WAREHOUSE_LOCATION: &str = "file:///tmp/warehouse";

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
pub struct DynAppConfig {
    /// Warehouse root used when a catalog does not configure `warehouse`.
    pub default_warehouse: String,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for DynAppConfig {
    fn default() -> Self {
        Self {
            default_warehouse: DEFAULT_WAREHOUSE_LOCATION.to_string(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub metadata: MetadataCacheConfig,
}

/// Cache of parsed metadata generations, keyed by metadata location.
#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
pub struct MetadataCacheConfig {
    pub enabled: bool,
    pub capacity: u64,
    pub time_to_live_secs: u64,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
            time_to_live_secs: 300,
        }
    }
}

fn get_config() -> DynAppConfig {
    let defaults = figment::providers::Serialized::defaults(DynAppConfig::default());

    #[cfg(not(test))]
    let prefixes = &["TABLEKEEPER__"];
    #[cfg(test)]
    let prefixes = &["TABLEKEEPER_TEST__"];

    let mut config = figment::Figment::from(defaults);
    for prefix in prefixes {
        let env = figment::providers::Env::prefixed(prefix).split("__");
        config = config.merge(env);
    }

    match config.extract::<DynAppConfig>() {
        Ok(c) => c,
        Err(e) => {
            panic!("Failed to extract Tablekeeper config: {e}");
        }
    }
}
