// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use anyhow::Result;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::capabilities::Capability;
use super::client::LanguageClient;
use super::options::{SessionOptions, split_modes};
use crate::config::{Config, ServiceConfig};
use crate::transport::Connector;

/// One registered service. The session starts on first lookup.
struct ServiceEntry {
    name: String,
    modes: Vec<String>,
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    instance: OnceLock<Arc<LanguageClient>>,
}

impl ServiceEntry {
    fn serves(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m == mode)
    }

    fn instance(&self) -> Arc<LanguageClient> {
        Arc::clone(self.instance.get_or_init(|| {
            info!("Starting {} for {:?}", self.name, self.modes);
            Arc::new(LanguageClient::start(
                self.options.clone(),
                Arc::clone(&self.connector),
            ))
        }))
    }
}

/// Maps editor modes to language client sessions.
///
/// A service is named after its first mode; `"html|vue"` registers a
/// service called `html` that serves both modes.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: Mutex<Vec<ServiceEntry>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry").finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service for `modes` (`|`-separated). Existing services are
    /// kept, so a mode may be served by several sessions.
    pub async fn register(
        &self,
        modes: &str,
        mut options: SessionOptions,
        connector: Arc<dyn Connector>,
    ) {
        let modes = split_modes(modes);
        let Some(name) = modes.first().cloned() else {
            warn!("Ignoring service registration without modes");
            return;
        };
        options.modes.clone_from(&modes);
        debug!("Registering {} ({})", name, connector.describe());

        self.entries.lock().await.push(ServiceEntry {
            name,
            modes,
            options,
            connector,
            instance: OnceLock::new(),
        });
    }

    /// Registers a service described by configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the service has neither or both of `command`
    /// and `address`.
    pub async fn register_config(
        &self,
        name: &str,
        service: &ServiceConfig,
        config: &Config,
    ) -> Result<()> {
        let connector = service.connector()?;
        let options = service.session_options(name, config)?;
        self.register(&service.modes(name), options, connector).await;
        Ok(())
    }

    /// Replaces every service with the same name, disposing their sessions.
    pub async fn replace(
        &self,
        modes: &str,
        options: SessionOptions,
        connector: Arc<dyn Connector>,
    ) {
        let name = split_modes(modes).into_iter().next().unwrap_or_default();
        let removed: Vec<ServiceEntry> = {
            let mut entries = self.entries.lock().await;
            let (removed, kept) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|e| e.name == name);
            *entries = kept;
            removed
        };

        for entry in removed {
            if let Some(client) = entry.instance.get() {
                info!("Replacing {}", entry.name);
                client.dispose().await;
            }
        }
        self.register(modes, options, connector).await;
    }

    /// Every session serving `mode`, starting them as needed.
    pub async fn find_by_mode(&self, mode: &str) -> Vec<Arc<LanguageClient>> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.serves(mode))
            .map(ServiceEntry::instance)
            .collect()
    }

    /// Sessions serving `mode` whose server supports `capability`.
    pub async fn find_supporting(
        &self,
        mode: &str,
        capability: Capability,
    ) -> Vec<Arc<LanguageClient>> {
        let mut supporting = Vec::new();
        for client in self.find_by_mode(mode).await {
            if client.supports(capability).await {
                supporting.push(client);
            }
        }
        supporting
    }

    /// Pushes `settings` to every session serving `mode`.
    pub async fn set_global_options(&self, mode: &str, settings: &Value) {
        for client in self.find_by_mode(mode).await {
            if let Err(e) = client.set_global_options(settings.clone()).await {
                warn!("Failed to update settings for {}: {}", client.name(), e);
            }
        }
    }

    /// Names of the registered services, in registration order.
    pub async fn service_names(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Every session started so far.
    pub async fn active_clients(&self) -> Vec<Arc<LanguageClient>> {
        self.entries
            .lock()
            .await
            .iter()
            .filter_map(|e| e.instance.get().cloned())
            .collect()
    }

    /// Disposes every started session and forgets all services.
    pub async fn dispose_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        for entry in entries {
            if let Some(client) = entry.instance.get() {
                client.dispose().await;
            }
        }
    }
}
