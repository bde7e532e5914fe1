//! The boundary to the wireless stack.
//!
//! Drivers never talk to `btleplug` directly. They go through a [`Link`], which
//! is implemented by [`BtleLink`](crate::BtleLink) for real peripherals and by
//! [`MockLink`](crate::mock::MockLink) for tests.

use std::pin::Pin;

use async_trait::async_trait;
use btleplug::Result;
use futures::Stream;
use uuid::Uuid;

pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// A value pushed by the peripheral on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub can_notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

impl WriteKind {
    pub fn from_wait_for_response(wait: bool) -> Self {
        if wait {
            WriteKind::WithResponse
        } else {
            WriteKind::WithoutResponse
        }
    }
}

#[async_trait]
pub trait Link: Send + Sync {
    /// Establish the link layer connection. Timeouts are the stack's business.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Services exposed by the connected peripheral, discovering them if needed.
    async fn services(&self) -> Result<Vec<ServiceInfo>>;

    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<()>;

    async fn subscribe(&self, characteristic: &CharacteristicInfo) -> Result<()>;

    async fn unsubscribe(&self, characteristic: &CharacteristicInfo) -> Result<()>;

    /// Stream of every notification received from the peripheral from now on.
    async fn notifications(&self) -> Result<NotificationStream>;
}
