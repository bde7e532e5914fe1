use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, CharPropFlags, Characteristic as BtleCharacteristic, Peripheral as _, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use btleplug::{Error, Result};
use futures::StreamExt;

use crate::link::{
    CharacteristicInfo, Link, Notification, NotificationStream, ServiceInfo, WriteKind,
};

/// A peripheral found while scanning. Two descriptors are the same device
/// when their addresses match.
#[derive(Clone)]
pub struct DiscoveredDevice {
    name: String,
    address: BDAddr,
    link: Arc<dyn Link>,
}

impl DiscoveredDevice {
    pub fn new(name: impl Into<String>, address: BDAddr, link: Arc<dyn Link>) -> Self {
        Self {
            name: name.into(),
            address,
            link,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn address(&self) -> BDAddr {
        self.address
    }

    /// The link used to talk to this device.
    #[inline]
    pub fn link(&self) -> Arc<dyn Link> {
        self.link.clone()
    }
}

impl PartialEq for DiscoveredDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DiscoveredDevice {}

impl std::fmt::Debug for DiscoveredDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredDevice")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish()
    }
}

/// [`Link`] backed by a `btleplug` peripheral.
#[derive(Debug, Clone)]
pub struct BtleLink {
    _adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleLink {
    pub(crate) fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            _adapter: adapter,
            peripheral,
        }
    }

    /// Services are cached by btleplug after the first discovery.
    async fn discovered_characteristics(&self) -> Result<Vec<BtleCharacteristic>> {
        if !self.peripheral.is_connected().await? {
            return Err(Error::NotConnected);
        }

        let mut characteristics = self.peripheral.characteristics();
        if characteristics.is_empty() {
            self.peripheral.discover_services().await?;
            characteristics = self.peripheral.characteristics();
        }

        Ok(characteristics.into_iter().collect())
    }

    async fn find_characteristic(&self, info: &CharacteristicInfo) -> Result<BtleCharacteristic> {
        self.discovered_characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid == info.uuid && c.service_uuid == info.service_uuid)
            .ok_or(Error::NoSuchCharacteristic)
    }
}

fn characteristic_info(characteristic: &BtleCharacteristic) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid: characteristic.uuid,
        service_uuid: characteristic.service_uuid,
        can_notify: characteristic.properties.contains(CharPropFlags::NOTIFY),
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        // Populates the service cache as a side effect.
        self.discovered_characteristics().await?;

        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(characteristic_info)
                    .collect(),
            })
            .collect())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<()> {
        let characteristic = self.find_characteristic(characteristic).await?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await
    }

    async fn subscribe(&self, characteristic: &CharacteristicInfo) -> Result<()> {
        let characteristic = self.find_characteristic(characteristic).await?;
        self.peripheral.subscribe(&characteristic).await
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicInfo) -> Result<()> {
        let characteristic = self.find_characteristic(characteristic).await?;
        self.peripheral.unsubscribe(&characteristic).await
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self.peripheral.notifications().await?;

        Ok(Box::pin(stream.map(|n| Notification {
            uuid: n.uuid,
            value: n.value,
        })))
    }
}
