//! # Config Reload
//!
//! Background task that watches `config.json` and swaps the shared config
//! when the file changes. Parse failures keep the previous config.

use log::{debug, error, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::interval;

use crate::config::{Config, ConfigHandle};

pub struct ConfigWatcher {
    path: PathBuf,
    handle: ConfigHandle,
    last_seen: Option<Vec<u8>>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, handle: ConfigHandle) -> Self {
        let path = path.into();
        let last_seen = std::fs::read(&path).ok();
        Self {
            path,
            handle,
            last_seen,
        }
    }

    /// Start the polling loop. This should be spawned as a tokio task.
    pub async fn run(mut self, period: Duration) {
        let mut check_interval = interval(period);

        info!("Watching {}", self.path.display());

        loop {
            check_interval.tick().await;
            self.poll();
        }
    }

    /// Re-read the file once. Returns true when a new config was installed.
    pub fn poll(&mut self) -> bool {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Config file watcher error: {}", e);
                return false;
            }
        };

        if self.last_seen.as_deref() == Some(bytes.as_slice()) {
            debug!("Config file unchanged");
            return false;
        }
        self.last_seen = Some(bytes.clone());

        match Config::from_slice(&bytes) {
            Ok(config) => {
                self.handle.replace(config);
                info!("Reloaded configuration from {}", self.path.display());
                true
            }
            Err(e) => {
                error!("Failed to reload configuration, keeping previous: {}", e);
                false
            }
        }
    }
}
