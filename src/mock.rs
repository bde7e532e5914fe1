//! In-memory [`Link`] for exercising drivers without a radio.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::{Error, Result};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::link::{
    CharacteristicInfo, Link, Notification, NotificationStream, ServiceInfo, WriteKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub uuid: Uuid,
    pub data: Vec<u8>,
    pub kind: WriteKind,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    refuse_connect: bool,
    fail_writes: bool,
    connect_attempts: usize,
    services: Vec<ServiceInfo>,
    subscribed: Vec<Uuid>,
    unsubscribed: Vec<Uuid>,
    writes: Vec<MockWrite>,
    on_subscribe: Vec<Notification>,
}

/// A peripheral that exposes a fixed set of services.
///
/// Notifications pushed with [`MockLink::notify`] are delivered only for
/// characteristics that have been subscribed.
pub struct MockLink {
    state: Mutex<MockState>,
    notifications: broadcast::Sender<Notification>,
}

impl Default for MockLink {
    fn default() -> Self {
        MockLink::new()
    }
}

impl MockLink {
    pub fn new() -> Self {
        Self::with_services(Vec::new())
    }

    pub fn with_services(services: Vec<ServiceInfo>) -> Self {
        let (notifications, _) = broadcast::channel(64);

        Self {
            state: Mutex::new(MockState {
                services,
                ..MockState::default()
            }),
            notifications,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Simulate the peripheral dropping the link.
    pub fn drop_link(&self) {
        self.state().connected = false;
    }

    pub fn link_up(&self) -> bool {
        self.state().connected
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        self.state().subscribed.clone()
    }

    /// Every explicit unsubscribe, in order.
    pub fn unsubscribed(&self) -> Vec<Uuid> {
        self.state().unsubscribed.clone()
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.state().writes.clone()
    }

    /// Queue a notification that is pushed as soon as its characteristic is
    /// subscribed and a notification stream is open.
    pub fn notify_on_subscribe(&self, uuid: Uuid, value: &[u8]) {
        self.state().on_subscribe.push(Notification {
            uuid,
            value: value.to_vec(),
        });
    }

    /// Push a notification. Returns `false` if it was not delivered.
    pub fn notify(&self, uuid: Uuid, value: &[u8]) -> bool {
        let deliverable = {
            let state = self.state();
            state.connected && state.subscribed.contains(&uuid)
        };

        deliverable
            && self
                .notifications
                .send(Notification {
                    uuid,
                    value: value.to_vec(),
                })
                .is_ok()
    }
}

#[async_trait]
impl Link for MockLink {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if state.refuse_connect {
            return Err(Error::DeviceNotFound);
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state();
        state.connected = false;
        state.subscribed.clear();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        let state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        Ok(state.services.clone())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.fail_writes {
            return Err(Error::RuntimeError("write rejected".to_string()));
        }
        state.writes.push(MockWrite {
            uuid: characteristic.uuid,
            data: data.to_vec(),
            kind,
        });
        Ok(())
    }

    async fn subscribe(&self, characteristic: &CharacteristicInfo) -> Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if !characteristic.can_notify {
            return Err(Error::NotSupported("notify".to_string()));
        }
        if !state.subscribed.contains(&characteristic.uuid) {
            state.subscribed.push(characteristic.uuid);
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicInfo) -> Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.subscribed.retain(|uuid| *uuid != characteristic.uuid);
        state.unsubscribed.push(characteristic.uuid);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let receiver = self.notifications.subscribe();

        let ready: Vec<Notification> = {
            let mut state = self.state();
            let subscribed = state.subscribed.clone();
            let (ready, waiting): (Vec<_>, Vec<_>) = state
                .on_subscribe
                .drain(..)
                .partition(|n| subscribed.contains(&n.uuid));
            state.on_subscribe = waiting;
            ready
        };
        for notification in ready {
            self.notifications.send(notification).ok();
        }

        Ok(Box::pin(
            BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }),
        ))
    }
}
