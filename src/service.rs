use std::sync::Arc;

use btleplug::Result;
use uuid::Uuid;

use crate::link::{Link, ServiceInfo};
use crate::Characteristic;

#[derive(Clone)]
pub struct Service {
    pub(crate) link: Arc<dyn Link>,
    pub(crate) service: ServiceInfo,
}

impl Service {
    /// Look up a service on a connected link.
    pub async fn find(link: Arc<dyn Link>, uuid: Uuid) -> Result<Option<Service>> {
        let service = link
            .services()
            .await?
            .into_iter()
            .find(|service| service.uuid == uuid);

        Ok(service.map(|service| Service { link, service }))
    }

    pub fn characteristics(&self) -> Vec<Characteristic> {
        self.service
            .characteristics
            .iter()
            .map(|characteristic| Characteristic {
                link: self.link.clone(),
                characteristic: *characteristic,
            })
            .collect::<Vec<_>>()
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid() == uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.service.uuid
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("uuid", &self.service.uuid)
            .field("characteristics", &self.service.characteristics)
            .finish()
    }
}
