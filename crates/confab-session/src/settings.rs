//! Persisted user settings
//!
//! The local display name and the room name (service type) survive
//! restarts. A session can only start once both are set and valid.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use confab_core::{PeerIdentity, validate_display_name};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::SettingsError;

/// Maximum service type length in characters
pub const MAX_SERVICE_TYPE_LEN: usize = 15;

/// Display name and room name for the local peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub display_name: String,
    /// Room name peers advertise and browse for
    pub service_type: String,
}

impl Settings {
    /// Create validated settings
    pub fn new(
        display_name: impl Into<String>,
        service_type: impl Into<String>,
    ) -> Result<Self, SettingsError> {
        let settings = Self {
            display_name: display_name.into(),
            service_type: service_type.into(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check both fields
    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_display_name(&self.display_name)
            .map_err(|e| SettingsError::InvalidDisplayName(e.to_string()))?;
        validate_service_type(&self.service_type)
    }

    /// Identity to advertise for these settings
    ///
    /// Each call mints a fresh peer id; the display name is what persists.
    pub fn local_identity(&self) -> Result<PeerIdentity, SettingsError> {
        PeerIdentity::new(self.display_name.clone())
            .map_err(|e| SettingsError::InvalidDisplayName(e.to_string()))
    }
}

/// Check a room name against service-name syntax
///
/// 1 to 15 characters of lowercase ASCII letters, digits and hyphens, with
/// at least one letter, no leading or trailing hyphen and no `--`.
pub fn validate_service_type(service_type: &str) -> Result<(), SettingsError> {
    let invalid = |reason: &str| {
        Err(SettingsError::InvalidServiceType(format!(
            "{:?}: {}",
            service_type, reason
        )))
    };

    if service_type.is_empty() {
        return invalid("must not be empty");
    }
    if service_type.chars().count() > MAX_SERVICE_TYPE_LEN {
        return invalid("longer than 15 characters");
    }
    if !service_type
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("only lowercase letters, digits and hyphens are allowed");
    }
    if !service_type.chars().any(|c| c.is_ascii_lowercase()) {
        return invalid("must contain a letter");
    }
    if service_type.starts_with('-') || service_type.ends_with('-') {
        return invalid("must not begin or end with a hyphen");
    }
    if service_type.contains("--") {
        return invalid("hyphens must not be adjacent");
    }
    Ok(())
}

/// Load and save [`Settings`]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored settings, or `None` if nothing was saved yet
    async fn load(&self) -> Result<Option<Settings>, SettingsError>;

    /// Validate and store settings
    async fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// Settings kept in a JSON file
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the session's configured settings path
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.settings_path)
    }

    /// The backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> Result<Option<Settings>, SettingsError> {
        if !fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "No saved settings");
            return Ok(None);
        }

        let raw = fs::read(&self.path).await?;
        let settings: Settings = serde_json::from_slice(&raw)?;
        settings.validate()?;
        Ok(Some(settings))
    }

    async fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        settings.validate()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(settings)?;
        fs::write(&self.path, json).await?;

        info!(
            path = %self.path.display(),
            display_name = %settings.display_name,
            service_type = %settings.service_type,
            "Settings saved"
        );
        Ok(())
    }
}

/// In-memory settings store
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<Settings>>,
}

impl MemorySettingsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `settings`
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Option<Settings>, SettingsError> {
        Ok(self.settings.lock().clone())
    }

    async fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        *self.settings.lock() = Some(settings.clone());
        Ok(())
    }
}
