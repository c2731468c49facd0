//! Session configuration.
//!
//! Resolved once at startup from `config.toml` in a platform config location and passed
//! into the orchestrator. Nothing re-reads it afterwards.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directory name under the user/site config roots.
pub const APP_DIR: &str = "orthanc_textual";
pub const CONFIG_FILE: &str = "config.toml";

/// On-disk shape of `config.toml`.
#[derive(Debug, Deserialize)]
struct RawConfig {
    orthanc_base_url: Option<String>,
    icf_image: Option<PathBuf>,
    store_base_dir: Option<PathBuf>,
    #[serde(default)]
    export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub orthanc_base_url: String,
    /// ICF utilities executable.
    pub icf_image: PathBuf,
    pub store_base_dir: PathBuf,
    /// Where study archives are downloaded and unpacked.
    pub export_dir: PathBuf,
}

impl SessionConfig {
    /// Load from an explicit file, or search the standard locations.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let candidates = candidate_paths();
                candidates
                    .iter()
                    .find(|p| p.is_file())
                    .cloned()
                    .ok_or(ConfigError::NotFound {
                        searched: candidates,
                    })?
            }
        };
        tracing::info!(path = %path.display(), "loading configuration");
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let base_url = raw
            .orthanc_base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::Invalid("orthanc_base_url is required".into()))?;
        let icf_image = raw
            .icf_image
            .ok_or_else(|| ConfigError::Invalid("icf_image is required".into()))?;
        let store_base_dir = raw
            .store_base_dir
            .ok_or_else(|| ConfigError::Invalid("store_base_dir is required".into()))?;

        Ok(Self {
            orthanc_base_url: base_url,
            icf_image: expand_home(&icf_image),
            store_base_dir: expand_home(&store_base_dir),
            export_dir: raw
                .export_dir
                .map(|p| expand_home(&p))
                .unwrap_or_else(std::env::temp_dir),
        })
    }
}

/// User config first, then the site-wide location.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        out.push(dir.join(APP_DIR).join(CONFIG_FILE));
    }
    out.push(site_config_dir().join(APP_DIR).join(CONFIG_FILE));
    out
}

fn site_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_DIRS")
        .and_then(|dirs| {
            std::env::split_paths(&dirs)
                .find(|p| p.is_absolute())
        })
        .unwrap_or_else(|| PathBuf::from("/etc/xdg"))
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
