//! `secd.yml` schema (spec.md §6). Optional; absent file means the defaults
//! below apply unchanged.

use serde::Deserialize;

use crate::run::DatabaseType;

fn default_runfor() -> f64 {
    3.0
}

fn default_mount_path() -> String {
    "/cache".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecdMetadata {
    #[serde(default = "default_runfor")]
    pub runfor: f64,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub database_type: Option<DatabaseType>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
}

impl Default for SecdMetadata {
    fn default() -> Self {
        Self {
            runfor: default_runfor(),
            gpu: false,
            database_name: None,
            database_type: None,
            cache_dir: None,
            mount_path: default_mount_path(),
        }
    }
}

/// Parse `secd.yml` content, or fall back to defaults when the file is
/// absent (distinguished by the caller passing `None`).
pub fn parse(yaml: Option<&str>) -> Result<SecdMetadata, serde_yaml::Error> {
    match yaml {
        None => Ok(SecdMetadata::default()),
        Some(text) => serde_yaml::from_str(text),
    }
}
