use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use btleplug::Error;
use futures::{Stream, StreamExt};
use stream_cancel::{Trigger, Valved};
use tokio::sync::broadcast;
use tokio::sync::broadcast::Sender;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use crate::registry::PluginRegistry;
use crate::{BtleLink, DiscoveredDevice};

type DeviceFilter = Box<dyn Fn(&DiscoveredDevice) -> bool + Send + Sync>;

#[derive(Default)]
pub struct ScanConfig {
    /// Index of the Bluetooth adapter to use. The first found adapter is used by default.
    adapter_index: usize,
    /// Filters the found devices based on device address.
    address_filter: Option<Box<dyn Fn(BDAddr) -> bool + Send + Sync>>,
    /// Filters the found devices based on local name.
    name_filter: Option<Box<dyn Fn(&str) -> bool + Send + Sync>>,
    /// Filters on the whole descriptor, e.g. with a plugin registry.
    device_filter: Option<DeviceFilter>,
    /// Maximum results before the scan is stopped.
    max_results: Option<usize>,
    /// The scan is stopped when timeout duration is reached.
    timeout: Option<Duration>,
}

impl ScanConfig {
    /// Index of bluetooth adapter to use
    pub fn adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Filter scanned devices based on the device address
    pub fn filter_by_address(
        mut self,
        func: impl Fn(BDAddr) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.address_filter = Some(Box::new(func));
        self
    }

    /// Filter scanned devices based on the device name
    pub fn filter_by_name(mut self, func: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.name_filter = Some(Box::new(func));
        self
    }

    /// Filter scanned devices based on the discovered descriptor
    pub fn filter_by_device(
        mut self,
        func: impl Fn(&DiscoveredDevice) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.device_filter = Some(Box::new(func));
        self
    }

    /// Only report devices some registered plugin can drive
    pub fn filter_by_registry(self, registry: Arc<PluginRegistry>) -> Self {
        self.filter_by_device(move |device| registry.matches(device))
    }

    /// Stop the scan after given number of matches
    pub fn stop_after_matches(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Stop the scan after the first match
    pub fn stop_after_first_match(self) -> Self {
        self.stop_after_matches(1)
    }

    /// Stop the scan after given duration
    pub fn stop_after_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Require that the scanned devices have a name
    pub fn require_name(self) -> Self {
        if self.name_filter.is_none() {
            self.filter_by_name(|name| !name.is_empty())
        } else {
            self
        }
    }

    /// Names often arrive in a later advertisement. Devices without one are
    /// not judged by a name filter until it shows up.
    fn waits_for_name(&self, name: Option<&str>) -> bool {
        self.name_filter.is_some() && name.is_none()
    }

    fn passes(&self, device: &DiscoveredDevice) -> bool {
        let mut passed = true;

        if let Some(filter_by_addr) = self.address_filter.as_ref() {
            passed &= filter_by_addr(device.address());
        }

        if let Some(filter_by_name) = self.name_filter.as_ref() {
            passed &= filter_by_name(device.name());
        }

        if let Some(filter_by_device) = self.device_filter.as_ref() {
            passed &= filter_by_device(device);
        }

        passed
    }

    /// Whether a rejected device can be ignored for the rest of the scan.
    /// Unnamed devices may still match a device filter once their name shows up.
    fn rejects_for_good(&self, device: &DiscoveredDevice) -> bool {
        self.device_filter.is_none() || !device.name().is_empty()
    }

    fn max_results_reached(&self, result_count: usize) -> bool {
        self.max_results
            .filter(|max_results| result_count >= *max_results)
            .is_some()
    }
}

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Discovered(DiscoveredDevice),
    Disconnected(DiscoveredDevice),
}

pub(crate) struct Session {
    pub(crate) _manager: Manager,
    pub(crate) adapter: Adapter,
    scanning: ScanActivity,
}

impl Session {
    /// Stops the adapter scan unless someone already did.
    async fn stop_scan(&self) {
        if !self.scanning.finish() {
            return;
        }

        if let Err(e) = self.adapter.stop_scan().await {
            log::warn!("Could not stop the scan: {}", e);
        }
    }
}

/// Whether the adapter is scanning. Whoever finishes it first owns the
/// `stop_scan` call.
#[derive(Debug, Clone, Default)]
struct ScanActivity(Arc<AtomicBool>);

impl ScanActivity {
    fn begin(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `true` for the caller that ended the scan.
    fn finish(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

pub struct Scanner {
    session: Option<Arc<Session>>,
    event_sender: Sender<DeviceEvent>,
    scan_stopper: Option<Trigger>,
    device_stream_stoppers: Arc<RwLock<Vec<Trigger>>>,
    discovered: Arc<RwLock<Vec<DiscoveredDevice>>>,
}

impl Default for Scanner {
    fn default() -> Self {
        Scanner::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(16);

        Self {
            session: None,
            event_sender,
            scan_stopper: None,
            device_stream_stoppers: Arc::new(RwLock::new(Vec::new())),
            discovered: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start scanning for ble devices.
    pub async fn start(&mut self, config: ScanConfig) -> Result<(), Error> {
        if self.is_scanning() {
            log::info!("Scanner is already started.");
            return Ok(());
        }
        // Tear down a scan that ended on its own.
        if self.session.is_some() {
            self.stop().await;
        }

        let manager = Manager::new().await?;
        let mut adapters = manager.adapters().await?;

        if config.adapter_index >= adapters.len() {
            return Err(Error::DeviceNotFound);
        }

        let adapter = adapters.swap_remove(config.adapter_index);

        log::trace!("Using adapter: {:?}", adapter);

        self.discovered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let session = Arc::new(Session {
            _manager: manager,
            adapter,
            scanning: ScanActivity::default(),
        });
        let stopper = ScanContext::start(
            config,
            session.clone(),
            self.event_sender.clone(),
            self.device_stream_stoppers.clone(),
            self.discovered.clone(),
        )
        .await?;

        self.scan_stopper = Some(stopper);
        self.session = Some(session);

        Ok(())
    }

    /// Stop scanning for ble devices. A scan that already ended on its own
    /// is only torn down.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop_scan().await;
            self.scan_stopper.take();
            self.device_stream_stoppers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        } else {
            log::info!("Scanner is already stopped");
        }
    }

    /// Whether the adapter is still scanning. Turns false once a stop
    /// condition is reached or [`Scanner::stop`] is called.
    pub fn is_scanning(&self) -> bool {
        self.session
            .as_ref()
            .map_or(false, |session| session.scanning.is_active())
    }

    /// Devices that passed the filters since the scan was started.
    pub fn discovered(&self) -> Vec<DiscoveredDevice> {
        self.discovered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create a new stream that receives device events.
    pub fn device_event_stream(
        &mut self,
    ) -> Valved<Pin<Box<dyn Stream<Item = DeviceEvent> + Send>>> {
        let receiver = self.event_sender.subscribe();

        let stream: Pin<Box<dyn Stream<Item = DeviceEvent> + Send>> =
            Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }));

        self.valved(stream)
    }

    /// Create a new stream that receives discovered devices.
    pub fn device_stream(
        &mut self,
    ) -> Valved<Pin<Box<dyn Stream<Item = DiscoveredDevice> + Send>>> {
        let receiver = self.event_sender.subscribe();

        let stream: Pin<Box<dyn Stream<Item = DiscoveredDevice> + Send>> =
            Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move {
                match x {
                    Ok(DeviceEvent::Discovered(device)) => Some(device),
                    _ => None,
                }
            }));

        self.valved(stream)
    }

    fn valved<S: Stream + Unpin>(&mut self, stream: S) -> Valved<S> {
        let (trigger, stream) = Valved::new(stream);
        self.device_stream_stoppers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trigger);

        stream
    }
}

struct ScanContext {
    /// Number of matching devices found so far
    result_count: usize,
    /// Reference to the bluetooth session instance
    session: Arc<Session>,
    /// Configurations for the scan, such as filters and stop conditions
    config: ScanConfig,
    /// Set of devices that have been filtered and will be ignored
    filtered: HashSet<PeripheralId>,
    /// Devices that matched the filters, by peripheral
    matched: Vec<(PeripheralId, DiscoveredDevice)>,
    /// Shared list handed out by `Scanner::discovered`
    discovered: Arc<RwLock<Vec<DiscoveredDevice>>>,
    /// Channel for sending events to the client
    event_sender: Sender<DeviceEvent>,
}

impl ScanContext {
    async fn start(
        config: ScanConfig,
        session: Arc<Session>,
        sender: Sender<DeviceEvent>,
        device_stream_stoppers: Arc<RwLock<Vec<Trigger>>>,
        discovered: Arc<RwLock<Vec<DiscoveredDevice>>>,
    ) -> Result<Trigger, Error> {
        log::info!("Starting the scan");

        let (stopper, events) = Valved::new(session.adapter.events().await?);

        session.adapter.start_scan(Default::default()).await?;
        session.scanning.begin();

        let ctx = ScanContext {
            result_count: 0,
            session,
            config,
            filtered: HashSet::new(),
            matched: Vec::new(),
            discovered,
            event_sender: sender,
        };

        tokio::spawn(async move {
            ctx.listen(events, device_stream_stoppers).await;
        });

        Ok(stopper)
    }

    async fn listen(
        mut self,
        mut event_stream: Valved<Pin<Box<dyn Stream<Item = CentralEvent> + Send>>>,
        device_stream_stoppers: Arc<RwLock<Vec<Trigger>>>,
    ) {
        let deadline = self.config.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let event = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, event_stream.next()).await {
                        Ok(event) => event,
                        Err(_) => {
                            log::info!("Scan timeout reached.");
                            break;
                        }
                    }
                }
                None => event_stream.next().await,
            };

            let Some(event) = event else {
                break;
            };

            match event {
                CentralEvent::DeviceDiscovered(peripheral_id)
                | CentralEvent::DeviceUpdated(peripheral_id) => {
                    self.on_device_seen(peripheral_id).await;
                }
                CentralEvent::DeviceDisconnected(peripheral_id) => {
                    self.on_device_disconnected(peripheral_id);
                }
                _ => {}
            }

            if self.config.max_results_reached(self.result_count) {
                log::info!("Scanner stop condition reached.");
                break;
            }
        }

        self.session.stop_scan().await;
        device_stream_stoppers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        log::info!("Scanner was stopped.");
    }

    async fn on_device_seen(&mut self, peripheral_id: PeripheralId) {
        if self.filtered.contains(&peripheral_id) {
            return;
        }

        if let Ok(peripheral) = self.session.adapter.peripheral(&peripheral_id).await {
            log::trace!("Device seen: {:?}", peripheral);

            self.apply_filter(peripheral).await;
        }
    }

    fn on_device_disconnected(&mut self, peripheral_id: PeripheralId) {
        if let Some((_, device)) = self.matched.iter().find(|(id, _)| *id == peripheral_id) {
            log::trace!("Device disconnected: {:?}", device);

            self.event_sender
                .send(DeviceEvent::Disconnected(device.clone()))
                .ok();
        }
    }

    async fn apply_filter(&mut self, peripheral: Peripheral) {
        let name = match peripheral.properties().await {
            Ok(Some(props)) => props.local_name,
            _ => None,
        };

        if self.config.waits_for_name(name.as_deref()) {
            return;
        }

        let address = peripheral.address();
        let device = DiscoveredDevice::new(
            name.unwrap_or_default(),
            address,
            Arc::new(BtleLink::new(self.session.adapter.clone(), peripheral.clone())),
        );

        if self.config.passes(&device) {
            self.add_device(peripheral.id(), device);
        } else if self.config.rejects_for_good(&device) {
            self.filtered.insert(peripheral.id());
        }
    }

    fn add_device(&mut self, peripheral_id: PeripheralId, device: DiscoveredDevice) {
        self.filtered.insert(peripheral_id.clone());

        log::info!("Found device: {} [{}]", device.name(), device.address());

        self.discovered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device.clone());
        self.matched.push((peripheral_id, device.clone()));
        self.result_count += 1;

        if let Err(e) = self.event_sender.send(DeviceEvent::Discovered(device)) {
            log::debug!("No listener for discovered device: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLink;
    use crate::scales::eclair::EclairPlugin;

    fn device(name: &str, last: u8) -> DiscoveredDevice {
        DiscoveredDevice::new(
            name,
            BDAddr::from([0, 0, 0, 0, 0, last]),
            Arc::new(MockLink::new()),
        )
    }

    fn registry() -> Arc<PluginRegistry> {
        let mut registry = PluginRegistry::new();
        EclairPlugin::apply(&mut registry);
        Arc::new(registry)
    }

    #[test]
    fn default_config_passes_everything() {
        let config = ScanConfig::default();
        assert!(config.passes(&device("", 1)));
        assert!(config.passes(&device("OtherScale", 2)));
        assert!(!config.waits_for_name(None));
    }

    #[test]
    fn registry_filter_matches_driven_devices() {
        let config = ScanConfig::default().filter_by_registry(registry());
        assert!(config.passes(&device("Eclair-123", 1)));
        assert!(!config.passes(&device("OtherScale", 2)));
    }

    #[test]
    fn filters_compose() {
        let config = ScanConfig::default()
            .filter_by_address(|address| address == BDAddr::from([0, 0, 0, 0, 0, 7]))
            .filter_by_registry(registry());

        assert!(config.passes(&device("Eclair-123", 7)));
        assert!(!config.passes(&device("Eclair-123", 8)));
        assert!(!config.passes(&device("OtherScale", 7)));
    }

    #[test]
    fn require_name_rejects_unnamed_devices() {
        let config = ScanConfig::default().require_name();
        assert!(config.waits_for_name(None));
        assert!(!config.waits_for_name(Some("Eclair-123")));
        assert!(!config.passes(&device("", 1)));
        assert!(config.passes(&device("Eclair-123", 2)));
    }

    #[test]
    fn require_name_keeps_existing_name_filter() {
        let config = ScanConfig::default()
            .filter_by_name(|name| name.starts_with("Eclair"))
            .require_name();
        assert!(!config.passes(&device("OtherScale", 1)));
        assert!(config.passes(&device("Eclair-9", 2)));
    }

    #[test]
    fn unnamed_devices_stay_eligible_under_device_filter() {
        let config = ScanConfig::default().filter_by_registry(registry());
        let unnamed = device("", 1);
        assert!(!config.passes(&unnamed));
        assert!(!config.rejects_for_good(&unnamed));
        assert!(config.rejects_for_good(&device("OtherScale", 2)));

        let by_name = ScanConfig::default().filter_by_name(|name| name == "Eclair");
        assert!(by_name.rejects_for_good(&unnamed));
    }

    #[test]
    fn max_results() {
        assert!(!ScanConfig::default().max_results_reached(100));
        let config = ScanConfig::default().stop_after_first_match();
        assert!(!config.max_results_reached(0));
        assert!(config.max_results_reached(1));
    }

    #[test]
    fn scan_is_stopped_once() {
        let scanning = ScanActivity::default();
        assert!(!scanning.finish());

        scanning.begin();
        let listener = scanning.clone();
        assert!(listener.is_active());

        // Listener reaches a stop condition, then the host stops the scanner.
        assert!(listener.finish());
        assert!(!scanning.is_active());
        assert!(!scanning.finish());
    }

    #[tokio::test]
    async fn stopping_an_idle_scanner_is_harmless() {
        let mut scanner = Scanner::new();
        scanner.stop().await;
        scanner.stop().await;
        assert!(!scanner.is_scanning());
        assert!(scanner.discovered().is_empty());
    }
}
