//! Selection of a driver for a discovered device.

use crate::error::{Result, ScaleError};
use crate::scales::RemoteScales;
use crate::DiscoveredDevice;

pub type ScalesFilter = Box<dyn Fn(&DiscoveredDevice) -> bool + Send + Sync>;
pub type ScalesInitialiser = Box<dyn Fn(&DiscoveredDevice) -> Box<dyn RemoteScales> + Send + Sync>;

/// A match predicate paired with the factory for the driver it selects.
pub struct ScalesPlugin {
    id: String,
    handles: ScalesFilter,
    initialise: ScalesInitialiser,
}

impl ScalesPlugin {
    pub fn new(
        id: impl Into<String>,
        handles: impl Fn(&DiscoveredDevice) -> bool + Send + Sync + 'static,
        initialise: impl Fn(&DiscoveredDevice) -> Box<dyn RemoteScales> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            handles: Box::new(handles),
            initialise: Box::new(initialise),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handles(&self, device: &DiscoveredDevice) -> bool {
        (self.handles)(device)
    }

    pub fn initialise(&self, device: &DiscoveredDevice) -> Box<dyn RemoteScales> {
        (self.initialise)(device)
    }
}

impl std::fmt::Debug for ScalesPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalesPlugin").field("id", &self.id).finish()
    }
}

/// Append-only catalogue of plugins, tried in registration order.
///
/// The application owns one registry and shares it (usually behind an `Arc`)
/// with whatever needs to pick drivers.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<ScalesPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate ids are allowed. The earliest registered match wins.
    pub fn register(&mut self, plugin: ScalesPlugin) {
        log::debug!("Registered scales plugin {}", plugin.id());
        self.plugins.push(plugin);
    }

    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        self.plugin_for(device).is_some()
    }

    pub fn plugin_for(&self, device: &DiscoveredDevice) -> Option<&ScalesPlugin> {
        self.plugins.iter().find(|plugin| plugin.handles(device))
    }

    pub fn create(&self, device: &DiscoveredDevice) -> Result<Box<dyn RemoteScales>> {
        let plugin = self.plugin_for(device).ok_or_else(|| ScaleError::NoPlugin {
            name: device.name().to_string(),
            address: device.address(),
        })?;

        log::info!(
            "Using plugin {} for {} [{}]",
            plugin.id(),
            device.name(),
            device.address()
        );
        Ok(plugin.initialise(device))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|plugin| plugin.id())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
