//! Persistence of the user-edited lists: favorites and YP sources.
//!
//! The feed core never touches these files itself; the application loads the
//! lists at startup, hands them to the core, and saves after edits.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PathsConfig;
use crate::error::SettingsError;
use crate::favorite::Favorite;
use crate::yp::{default_sources, YpSource};

pub trait SettingsStore: Send + Sync {
    fn load_favorites(&self) -> Vec<Favorite>;
    fn save_favorites(&self, favorites: &[Favorite]) -> Result<(), SettingsError>;
    fn load_yp_sources(&self) -> Vec<YpSource>;
    fn save_yp_sources(&self, sources: &[YpSource]) -> Result<(), SettingsError>;
}

/// Pretty-printed JSON files, one per list.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    favorites_file: PathBuf,
    yp_file: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            favorites_file: paths.favorites_file.clone(),
            yp_file: paths.yp_file.clone(),
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load_favorites(&self) -> Vec<Favorite> {
        load_json(&self.favorites_file).unwrap_or_default()
    }

    fn save_favorites(&self, favorites: &[Favorite]) -> Result<(), SettingsError> {
        save_json(&self.favorites_file, &favorites)
    }

    fn load_yp_sources(&self) -> Vec<YpSource> {
        match load_json::<Vec<YpSource>>(&self.yp_file) {
            Some(sources) if !sources.is_empty() => sources,
            _ => default_sources(),
        }
    }

    fn save_yp_sources(&self, sources: &[YpSource]) -> Result<(), SettingsError> {
        save_json(&self.yp_file, &sources)
    }
}

/// `None` when the file is missing or unreadable; the caller falls back to
/// defaults.
fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("settings: cannot read {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("settings: ignoring malformed {:?}: {}", path, e);
            None
        }
    }
}

fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    info!("settings: saved {:?}", path);
    Ok(())
}
