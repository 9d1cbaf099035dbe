use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::dataset::DEFAULT_PAGE_SIZE;
use crate::error::SpectraError;

pub const DEFAULT_CONFIG_FILE: &str = "spectra-repo.json";
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 104_857_600;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub store_file: Option<String>,
    #[serde(default)]
    pub upload_dir: Option<String>,
    #[serde(default)]
    pub max_upload_size: Option<u64>,
    #[serde(default)]
    pub default_page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub schema_version: u32,
    pub data_root: Utf8PathBuf,
    pub store_file: Utf8PathBuf,
    pub upload_dir: Utf8PathBuf,
    pub max_upload_size: u64,
    pub default_page_size: usize,
}

impl Settings {
    pub fn with_root(data_root: Utf8PathBuf) -> Self {
        Self {
            schema_version: 1,
            store_file: data_root.join("catalog.json"),
            upload_dir: data_root.join("uploads"),
            data_root,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>, global: bool) -> Result<Settings, SpectraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SpectraError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| SpectraError::ConfigParse(err.to_string()))?
        };

        let base = if global {
            global_data_root()?
        } else {
            project_data_root()?
        };
        Self::resolve_config(config, base)
    }

    pub fn resolve_config(
        config: Config,
        default_root: Utf8PathBuf,
    ) -> Result<Settings, SpectraError> {
        let data_root = config
            .data_root
            .map(Utf8PathBuf::from)
            .unwrap_or(default_root);
        let mut settings = Settings::with_root(data_root);
        settings.schema_version = config.schema_version.unwrap_or(1);

        if let Some(store_file) = config.store_file {
            settings.store_file = settings.data_root.join(store_file);
        }
        if let Some(upload_dir) = config.upload_dir {
            settings.upload_dir = settings.data_root.join(upload_dir);
        }
        if let Some(max_upload_size) = config.max_upload_size {
            if max_upload_size == 0 {
                return Err(SpectraError::ConfigParse(
                    "max_upload_size must be positive".to_string(),
                ));
            }
            settings.max_upload_size = max_upload_size;
        }
        if let Some(page_size) = config.default_page_size {
            settings.default_page_size = page_size.clamp(1, crate::dataset::MAX_PAGE_SIZE);
        }
        Ok(settings)
    }
}

fn project_data_root() -> Result<Utf8PathBuf, SpectraError> {
    let cwd = std::env::current_dir().map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd.join(".spectra-repo"))
        .map_err(|_| SpectraError::Filesystem("invalid project path".to_string()))
}

fn global_data_root() -> Result<Utf8PathBuf, SpectraError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_dir().join("spectra-repo")).ok()
        })
        .ok_or_else(|| SpectraError::Filesystem("unable to resolve data directory".to_string()))
}
