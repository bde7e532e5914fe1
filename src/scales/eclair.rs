//! Driver for Eclair scales.
//!
//! The scale exposes one service with two characteristics. Weight and flow
//! frames arrive on the data characteristic; battery and timer frames arrive
//! on the config characteristic, which also accepts tare and heartbeat
//! commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use stream_cancel::{Trigger, Valved};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Result, ScaleError};
use crate::frame;
use crate::link::{Link, WriteKind};
use crate::registry::{PluginRegistry, ScalesPlugin};
use crate::scales::{ConnectionState, RemoteScales, ScalesCore};
use crate::{Characteristic, DiscoveredDevice, Service};

pub mod protocol;

use protocol::{
    Channel, EclairMessage, WireFormat, CONFIG_CHARACTERISTIC_UUID,
    DATA_CHARACTERISTIC_UUID, SERVICE_UUID,
};

pub const DEFAULT_NAME_PREFIX: &str = "Eclair";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct EclairConfig {
    /// Which checksum layout the scale's firmware uses on the data channel.
    wire_format: WireFormat,
    /// Minimum time between two heartbeats.
    heartbeat_interval: Duration,
    /// Whether the tare command waits for a write response.
    write_with_response: bool,
    /// Advertised names starting with this are handled by the plugin.
    name_prefix: String,
}

impl Default for EclairConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            write_with_response: true,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl EclairConfig {
    pub fn wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn write_with_response(mut self, wait: bool) -> Self {
        self.write_with_response = wait;
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn handles(&self, device: &DiscoveredDevice) -> bool {
        device.name().starts_with(&self.name_prefix)
    }
}

/// Everything that only exists while connected. Dropping it stops the
/// notification listener.
struct Session {
    _service: Service,
    config: Characteristic,
    subscribed: Vec<Characteristic>,
    _valve: Trigger,
    listener: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

pub struct EclairScales {
    core: Arc<ScalesCore>,
    config: EclairConfig,
    state: ConnectionState,
    session: Option<Session>,
    last_heartbeat: Instant,
}

impl EclairScales {
    pub fn new(device: DiscoveredDevice) -> Self {
        Self::with_config(device, EclairConfig::default())
    }

    pub fn with_config(device: DiscoveredDevice, config: EclairConfig) -> Self {
        Self {
            core: Arc::new(ScalesCore::new(device)),
            config,
            state: ConnectionState::Disconnected,
            session: None,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn config(&self) -> &EclairConfig {
        &self.config
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    fn link(&self) -> Arc<dyn Link> {
        self.core.device().link()
    }

    async fn establish(&mut self) -> Result<()> {
        self.session = None;
        self.state = ConnectionState::Connecting;
        self.core.log(format_args!(
            "Connecting to {} [{}]",
            self.core.device().name(),
            self.core.device().address()
        ));

        let link = self.link();
        link.connect().await?;

        self.state = ConnectionState::HandshakeInProgress;
        let (service, data, config) = self.handshake(link).await?;

        // Reset before the listener exists so no streamed frame is overwritten.
        self.core.set_weight_raw(0);

        self.state = ConnectionState::Subscribing;
        let session = self.subscribe(service, data, config).await?;
        self.session = Some(session);

        self.last_heartbeat = Instant::now();
        self.state = ConnectionState::Streaming;
        self.core.log(format_args!("Streaming"));

        Ok(())
    }

    async fn handshake(
        &self,
        link: Arc<dyn Link>,
    ) -> Result<(Service, Characteristic, Characteristic)> {
        self.core.log(format_args!("Performing handshake"));

        let service = Service::find(link, SERVICE_UUID)
            .await?
            .ok_or(ScaleError::ServiceNotFound(SERVICE_UUID))?;
        let data = service
            .characteristic(DATA_CHARACTERISTIC_UUID)
            .ok_or(ScaleError::CharacteristicNotFound(DATA_CHARACTERISTIC_UUID))?;
        let config = service
            .characteristic(CONFIG_CHARACTERISTIC_UUID)
            .ok_or(ScaleError::CharacteristicNotFound(CONFIG_CHARACTERISTIC_UUID))?;

        self.core
            .log(format_args!("Obtained service and characteristics"));
        Ok((service, data, config))
    }

    async fn subscribe(
        &self,
        service: Service,
        data: Characteristic,
        config: Characteristic,
    ) -> Result<Session> {
        let mut streams: Vec<BoxStream<'static, (Uuid, Vec<u8>)>> = Vec::new();
        let mut subscribed = Vec::new();

        for (channel, characteristic) in [(Channel::Data, &data), (Channel::Config, &config)] {
            if !characteristic.can_notify() {
                self.core
                    .log(format_args!("{} characteristic cannot notify", channel));
                continue;
            }

            self.core
                .log(format_args!("Subscribing to {} characteristic", channel));
            let uuid = characteristic.uuid();
            let values = characteristic.subscribe().await?;
            streams.push(values.map(move |value| (uuid, value)).boxed());
            subscribed.push(characteristic.clone());
        }

        let (valve, notifications) = Valved::new(stream::select_all(streams));
        let listener = tokio::spawn(listen(
            self.core.clone(),
            self.config.wire_format,
            notifications,
        ));

        Ok(Session {
            _service: service,
            config,
            subscribed,
            _valve: valve,
            listener,
        })
    }

    async fn send_message(&self, bytes: Vec<u8>, kind: WriteKind) -> Result<()> {
        let session = self.session.as_ref().ok_or(ScaleError::NotConnected)?;

        self.core
            .log(format_args!("Sending message: {}", frame::to_hex(&bytes)));
        session.config.write(&bytes, kind).await?;
        Ok(())
    }

    async fn release(&mut self) {
        let session = self.session.take();

        let link = self.link();
        if !link.is_connected().await {
            self.state = ConnectionState::Disconnected;
            return;
        }

        if let Some(session) = session {
            for characteristic in &session.subscribed {
                if let Err(e) = characteristic.unsubscribe().await {
                    log::debug!("Failed to unsubscribe {}: {}", characteristic.uuid(), e);
                }
            }
        }

        if let Err(e) = link.disconnect().await {
            log::warn!("Failed to disconnect cleanly: {}", e);
        }

        self.state = ConnectionState::Disconnected;
    }
}

#[async_trait]
impl RemoteScales for EclairScales {
    fn core(&self) -> &ScalesCore {
        &self.core
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> bool {
        if self.is_connected().await {
            self.core.log(format_args!("Already connected"));
            return true;
        }

        match self.establish().await {
            Ok(()) => true,
            Err(e) => {
                self.core.log(format_args!("Connection failed: {}", e));
                self.release().await;
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        self.release().await;
        self.core.log(format_args!("Disconnected"));
    }

    async fn is_connected(&self) -> bool {
        self.state == ConnectionState::Streaming && self.link().is_connected().await
    }

    async fn update(&mut self) {
        if !self.is_connected().await {
            return;
        }

        let now = Instant::now();
        if now.duration_since(self.last_heartbeat) < self.config.heartbeat_interval {
            return;
        }

        // No retry: the next heartbeat is the retry.
        if let Err(e) = self
            .send_message(protocol::heartbeat_command(), WriteKind::WithoutResponse)
            .await
        {
            self.core.log(format_args!("Heartbeat failed: {}", e));
        }
        self.last_heartbeat = now;
    }

    async fn tare(&mut self) -> bool {
        if !self.is_connected().await {
            return false;
        }

        let kind = WriteKind::from_wait_for_response(self.config.write_with_response);
        match self.send_message(protocol::tare_command(), kind).await {
            Ok(()) => {
                self.core.log(format_args!("Sent tare command"));
                true
            }
            Err(e) => {
                self.core.log(format_args!("Tare failed: {}", e));
                false
            }
        }
    }
}

async fn listen(
    core: Arc<ScalesCore>,
    format: WireFormat,
    notifications: impl Stream<Item = (Uuid, Vec<u8>)>,
) {
    futures::pin_mut!(notifications);
    while let Some((uuid, value)) = notifications.next().await {
        handle_notification(&core, format, uuid, &value);
    }

    log::trace!("[{}] Notification listener stopped", core.device().name());
}

fn handle_notification(core: &ScalesCore, format: WireFormat, uuid: Uuid, value: &[u8]) {
    log::trace!("Received notification from {}: {}", uuid, frame::to_hex(value));

    let Some(channel) = Channel::from_uuid(uuid) else {
        return;
    };

    match protocol::decode(format, channel, value) {
        Ok(message) => apply(core, message),
        Err(e) => core.log(format_args!(
            "Discarding {} notification [{}]: {}",
            channel,
            frame::to_hex(value),
            e
        )),
    }
}

fn apply(core: &ScalesCore, message: EclairMessage) {
    match message {
        EclairMessage::Weight { raw } => core.set_weight_raw(raw),
        EclairMessage::FlowRate { payload } => core.log(format_args!(
            "Received flow rate data: {}",
            frame::to_hex(&payload)
        )),
        EclairMessage::Battery { percent } => {
            core.set_battery(percent);
            core.log(format_args!("Battery status updated: {}%", percent));
        }
        EclairMessage::Timer { value } => {
            core.log(format_args!("Timer status updated: {}", value))
        }
    }
}

/// Registers [`EclairScales`] with a [`PluginRegistry`].
pub struct EclairPlugin;

impl EclairPlugin {
    pub const ID: &'static str = "eclair";

    /// The default plugin: `Eclair*` devices speaking [`WireFormat::Framed`].
    pub fn descriptor() -> ScalesPlugin {
        Self::with_config(EclairConfig::default())
    }

    /// A plugin for a specific firmware variant. Register variants with
    /// narrower name prefixes before the default one.
    pub fn with_config(config: EclairConfig) -> ScalesPlugin {
        let id = match config.wire_format {
            WireFormat::Framed => Self::ID.to_string(),
            WireFormat::FixedWeight => format!("{}-fixed-weight", Self::ID),
        };
        let filter = config.clone();

        ScalesPlugin::new(
            id,
            move |device| filter.handles(device),
            move |device| Box::new(EclairScales::with_config(device.clone(), config.clone())),
        )
    }

    pub fn apply(registry: &mut PluginRegistry) {
        registry.register(Self::descriptor());
    }
}
