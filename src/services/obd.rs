//! Vehicle OBD service: engine temperature and fuel level.

use std::sync::Arc;

use anyhow::Result;
use uuid::{Uuid, uuid};

use crate::bridge::NotificationBridge;
use crate::gatt::{Capability, Characteristic, Service};
use crate::sources::{FuelLevelReceiver, TemperatureReceiver};

pub const OBD_SERVICE_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a202");
pub const ENGINE_TEMP_CHRC_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a203");
pub const FUEL_LEVEL_CHRC_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a204");

/// Sends vehicle diagnostic readings on a frequent basis. Integer readings
/// travel as their ASCII decimal digits.
pub struct ObdService {
    service: Arc<Service>,
    engine_temp_chrc: Arc<Characteristic>,
    fuel_level_chrc: Arc<Characteristic>,
    bridge: NotificationBridge,
}

impl ObdService {
    pub fn new(index: usize, bridge: NotificationBridge) -> Result<Self> {
        let mut service = Service::new(index, OBD_SERVICE_UUID, true)?;

        let engine_temp_chrc = Characteristic::builder(
            service.path(),
            service.next_characteristic_index(),
            ENGINE_TEMP_CHRC_UUID,
            vec![Capability::Notify, Capability::Read],
        )
        .user_description("Engine Temperature (F)")?
        .client_config()?
        .build()?;
        service.add_characteristic(engine_temp_chrc.clone());

        let fuel_level_chrc = Characteristic::builder(
            service.path(),
            service.next_characteristic_index(),
            FUEL_LEVEL_CHRC_UUID,
            vec![Capability::Notify, Capability::Read],
        )
        .user_description("Fuel Percent Remaining")?
        .client_config()?
        .build()?;
        service.add_characteristic(fuel_level_chrc.clone());

        Ok(Self {
            service: Arc::new(service),
            engine_temp_chrc,
            fuel_level_chrc,
            bridge,
        })
    }

    pub fn service(&self) -> Arc<Service> {
        self.service.clone()
    }

    pub fn engine_temp_characteristic(&self) -> Arc<Characteristic> {
        self.engine_temp_chrc.clone()
    }

    pub fn fuel_level_characteristic(&self) -> Arc<Characteristic> {
        self.fuel_level_chrc.clone()
    }
}

impl TemperatureReceiver for ObdService {
    fn set_temp_f(&self, temperature: i32) {
        self.engine_temp_chrc
            .store_value(temperature.to_string().into_bytes());
        self.bridge.request_notify(&self.engine_temp_chrc);
    }
}

impl FuelLevelReceiver for ObdService {
    fn set_fuel_percent_remaining(&self, percent: u8) {
        self.fuel_level_chrc
            .store_value(percent.to_string().into_bytes());
        self.bridge.request_notify(&self.fuel_level_chrc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service() -> ObdService {
        let (bridge, _rx) = NotificationBridge::new();
        ObdService::new(1, bridge).unwrap()
    }

    #[test]
    fn temperature_encodes_as_ascii_decimal_digits() {
        let obd = service();

        for (input, expected) in [(32, "32"), (250, "250"), (350, "350")] {
            obd.set_temp_f(input);
            assert_eq!(
                obd.engine_temp_characteristic().read_value().unwrap(),
                expected.as_bytes().to_vec()
            );
        }
    }

    #[test]
    fn fuel_level_encodes_as_ascii_decimal_digits() {
        let obd = service();

        obd.set_fuel_percent_remaining(75);
        assert_eq!(
            obd.fuel_level_characteristic().read_value().unwrap(),
            b"75".to_vec()
        );

        obd.set_fuel_percent_remaining(0);
        assert_eq!(
            obd.fuel_level_characteristic().read_value().unwrap(),
            b"0".to_vec()
        );
    }

    #[tokio::test]
    async fn readings_request_coalesced_notifications() {
        let (bridge, mut rx) = NotificationBridge::new();
        let obd = ObdService::new(1, bridge).unwrap();

        obd.set_temp_f(180);
        obd.set_temp_f(181);
        obd.set_fuel_percent_remaining(74);

        // Temperature burst coalesces; fuel is a separate characteristic.
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(first.path(), obd.engine_temp_characteristic().path());
        assert_eq!(second.path(), obd.fuel_level_characteristic().path());
    }

    #[test]
    fn tree_shape_matches_the_protocol_contract() {
        let obd = service();
        let svc = obd.service();
        assert_eq!(svc.path().as_str(), "/org/lemonpi/ble/service1");
        assert_eq!(svc.characteristics().len(), 2);
        assert_eq!(
            obd.engine_temp_characteristic().path().as_str(),
            "/org/lemonpi/ble/service1/char0"
        );
        assert_eq!(
            obd.fuel_level_characteristic().path().as_str(),
            "/org/lemonpi/ble/service1/char1"
        );
    }
}
