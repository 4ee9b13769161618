//! GATT service node.

use std::collections::HashMap;
use std::sync::Arc;

use zbus::interface;
use zvariant::{ObjectPath, OwnedObjectPath, Value};

use super::characteristic::Characteristic;
use super::{APP_PATH_BASE, GATT_SERVICE_IFACE, InterfaceProps, own};

/// A GATT service: UUID, primary flag and the ordered characteristics it
/// owns. The path is fixed at construction from the registration index.
pub struct Service {
    uuid: uuid::Uuid,
    primary: bool,
    path: OwnedObjectPath,
    characteristics: Vec<Arc<Characteristic>>,
}

impl Service {
    pub fn new(index: usize, uuid: uuid::Uuid, primary: bool) -> anyhow::Result<Self> {
        let path = OwnedObjectPath::try_from(format!("{APP_PATH_BASE}/service{index}"))?;
        Ok(Self {
            uuid,
            primary,
            path,
            characteristics: Vec::new(),
        })
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.uuid
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    /// Appends a characteristic; its index within the service must already
    /// match its position (the builders enforce this by construction).
    pub fn add_characteristic(&mut self, chrc: Arc<Characteristic>) {
        self.characteristics.push(chrc);
    }

    /// Index the next characteristic of this service will get.
    pub fn next_characteristic_index(&self) -> usize {
        self.characteristics.len()
    }

    pub fn characteristics(&self) -> &[Arc<Characteristic>] {
        &self.characteristics
    }

    pub fn characteristic_paths(&self) -> Vec<OwnedObjectPath> {
        self.characteristics
            .iter()
            .map(|c| c.path().clone())
            .collect()
    }

    /// Protocol property map under the service interface.
    pub fn properties(&self) -> zbus::fdo::Result<InterfaceProps> {
        let chrc_paths: Vec<ObjectPath<'static>> = self
            .characteristics
            .iter()
            .map(|c| c.path().clone().into_inner())
            .collect();
        let props = HashMap::from([
            (
                "UUID".to_string(),
                own(Value::from(self.uuid.to_string()))?,
            ),
            ("Primary".to_string(), own(Value::from(self.primary))?),
            (
                "Characteristics".to_string(),
                own(Value::from(chrc_paths))?,
            ),
        ]);
        Ok(HashMap::from([(GATT_SERVICE_IFACE.to_string(), props)]))
    }
}

/// D-Bus face of a [`Service`], served at the service's path.
pub struct ServiceInterface {
    service: Arc<Service>,
}

impl ServiceInterface {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

#[interface(name = "org.bluez.GattService1")]
impl ServiceInterface {
    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.service.uuid().to_string()
    }

    #[zbus(property)]
    fn primary(&self) -> bool {
        self.service.primary()
    }

    #[zbus(property)]
    fn characteristics(&self) -> Vec<OwnedObjectPath> {
        self.service.characteristic_paths()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::characteristic::Capability;
    use pretty_assertions::assert_eq;
    use uuid::uuid;

    const SVC_UUID: uuid::Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a200");
    const CHRC_UUID: uuid::Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a201");

    #[test]
    fn path_uses_registration_index() {
        let first = Service::new(0, SVC_UUID, true).unwrap();
        let third = Service::new(2, SVC_UUID, true).unwrap();
        assert_eq!(first.path().as_str(), "/org/lemonpi/ble/service0");
        assert_eq!(third.path().as_str(), "/org/lemonpi/ble/service2");
    }

    #[test]
    fn characteristic_indices_follow_insertion_order() {
        let mut service = Service::new(0, SVC_UUID, true).unwrap();
        for _ in 0..2 {
            let chrc = Characteristic::builder(
                service.path(),
                service.next_characteristic_index(),
                CHRC_UUID,
                vec![Capability::Read],
            )
            .build()
            .unwrap();
            service.add_characteristic(chrc);
        }

        assert_eq!(
            service
                .characteristic_paths()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect::<Vec<_>>(),
            vec![
                "/org/lemonpi/ble/service0/char0",
                "/org/lemonpi/ble/service0/char1",
            ]
        );
    }

    #[test]
    fn properties_expose_uuid_primary_and_children() {
        let service = Service::new(1, SVC_UUID, true).unwrap();
        let props = service.properties().unwrap();
        let gatt = props.get(GATT_SERVICE_IFACE).unwrap();
        assert_eq!(
            String::try_from(gatt.get("UUID").unwrap().clone()).unwrap(),
            SVC_UUID.to_string()
        );
        assert_eq!(bool::try_from(gatt.get("Primary").unwrap().clone()).unwrap(), true);
        assert!(gatt.contains_key("Characteristics"));
    }
}
