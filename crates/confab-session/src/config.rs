//! Configuration for a chat session

use std::path::PathBuf;

/// Configuration for a [`SessionActor`](crate::actor::SessionActor)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base directory for all session data
    pub data_dir: PathBuf,
    /// Where received resources are copied
    pub resource_dir: PathBuf,
    /// Settings file for the JSON settings store
    pub settings_path: PathBuf,
    /// Capacity of the UI command channel
    pub command_channel_capacity: usize,
    /// Transcript update broadcast channel capacity
    pub update_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::with_data_dir("./confab-data")
    }
}

impl SessionConfig {
    /// Create a configuration with a custom data directory
    ///
    /// Resources and settings live under the data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            resource_dir: data_dir.join("resources"),
            settings_path: data_dir.join("settings.json"),
            data_dir,
            command_channel_capacity: 64,
            update_channel_capacity: 1024,
        }
    }

    /// Set the resource directory
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = dir.into();
        self
    }

    /// Set the settings file
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }

    /// Set the command channel capacity
    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Set the update channel capacity
    pub fn with_update_channel_capacity(mut self, capacity: usize) -> Self {
        self.update_channel_capacity = capacity;
        self
    }
}
