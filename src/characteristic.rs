use std::pin::Pin;
use std::sync::Arc;

use btleplug::Result;
use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::link::{CharacteristicInfo, Link, WriteKind};

/// Handle to one characteristic of a resolved service. Only valid while the
/// link it was resolved on stays connected.
#[derive(Clone)]
pub struct Characteristic {
    pub(crate) link: Arc<dyn Link>,
    pub(crate) characteristic: CharacteristicInfo,
}

impl Characteristic {
    pub async fn write(&self, data: &[u8], kind: WriteKind) -> Result<()> {
        self.link.write(&self.characteristic, data, kind).await
    }

    pub async fn subscribe(&self) -> Result<Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>> {
        self.link.subscribe(&self.characteristic).await?;

        let stream = self.link.notifications().await?;
        let uuid = self.characteristic.uuid;

        Ok(Box::pin(stream.filter_map(move |n| async move {
            if n.uuid == uuid {
                Some(n.value)
            } else {
                None
            }
        })))
    }

    pub async fn unsubscribe(&self) -> Result<()> {
        self.link.unsubscribe(&self.characteristic).await
    }

    pub fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    pub fn can_notify(&self) -> bool {
        self.characteristic.can_notify
    }
}

impl std::fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("uuid", &self.characteristic.uuid)
            .field("can_notify", &self.characteristic.can_notify)
            .finish()
    }
}
