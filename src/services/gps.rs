//! GPS position service: one characteristic streaming JSON fixes.

use std::sync::Arc;

use anyhow::Result;
use log::error;
use serde::Serialize;
use uuid::{Uuid, uuid};

use crate::bridge::NotificationBridge;
use crate::gatt::{Capability, Characteristic, Service};
use crate::sources::GpsReceiver;

pub const GPS_SERVICE_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a200");
pub const GPS_DATA_CHRC_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a201");

/// Wire form of a GPS fix. Field order is the exposed JSON order; the
/// timestamp is integer milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsFix {
    pub lat: f64,
    pub long: f64,
    pub hdg: f64,
    pub tstamp: i64,
    pub spd: u32,
    pub gdop: f64,
    pub pdop: f64,
}

impl GpsFix {
    /// Builds a fix from a raw reading. Non-finite dilution values are
    /// normalized to 0.0 so the encoding stays valid JSON; seconds become
    /// rounded milliseconds.
    pub fn from_reading(
        lat: f64,
        long: f64,
        heading: f64,
        tstamp: f64,
        speed: u32,
        gdop: f64,
        pdop: f64,
    ) -> Self {
        let clean = |v: f64| if v.is_finite() { v } else { 0.0 };
        Self {
            lat,
            long,
            hdg: heading,
            tstamp: (tstamp * 1000.0).round() as i64,
            spd: speed,
            gdop: clean(gdop),
            pdop: clean(pdop),
        }
    }
}

/// Sends GPS data to the connected central on a frequent basis.
pub struct GpsService {
    service: Arc<Service>,
    gps_chrc: Arc<Characteristic>,
    bridge: NotificationBridge,
}

impl GpsService {
    pub fn new(index: usize, bridge: NotificationBridge) -> Result<Self> {
        let mut service = Service::new(index, GPS_SERVICE_UUID, true)?;

        let gps_chrc = Characteristic::builder(
            service.path(),
            service.next_characteristic_index(),
            GPS_DATA_CHRC_UUID,
            vec![Capability::Notify, Capability::Read],
        )
        .user_description("GPS Position")?
        .client_config()?
        .build()?;
        service.add_characteristic(gps_chrc.clone());

        Ok(Self {
            service: Arc::new(service),
            gps_chrc,
            bridge,
        })
    }

    pub fn service(&self) -> Arc<Service> {
        self.service.clone()
    }

    pub fn characteristic(&self) -> Arc<Characteristic> {
        self.gps_chrc.clone()
    }
}

impl GpsReceiver for GpsService {
    #[allow(clippy::too_many_arguments)]
    fn set_gps_position(
        &self,
        lat: f64,
        long: f64,
        heading: f64,
        tstamp: f64,
        speed: u32,
        gdop: f64,
        pdop: f64,
    ) {
        let fix = GpsFix::from_reading(lat, long, heading, tstamp, speed, gdop, pdop);
        match serde_json::to_vec(&fix) {
            Ok(encoded) => {
                self.gps_chrc.store_value(encoded);
                self.bridge.request_notify(&self.gps_chrc);
            }
            Err(e) => error!("failed to encode GPS fix: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service() -> (GpsService, tokio::sync::mpsc::UnboundedReceiver<Arc<Characteristic>>) {
        let (bridge, rx) = NotificationBridge::new();
        (GpsService::new(0, bridge).unwrap(), rx)
    }

    #[tokio::test]
    async fn fix_encodes_as_json_with_millisecond_timestamp() {
        let (gps, _rx) = service();

        gps.set_gps_position(37.7749, -122.4194, 90.0, 1700000000.5, 33, 1.5, 1.2);

        let value = gps.characteristic().read_value().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&value).unwrap();
        assert_eq!(json["lat"], 37.7749);
        assert_eq!(json["long"], -122.4194);
        assert_eq!(json["hdg"], 90.0);
        assert_eq!(json["tstamp"], 1700000000500i64);
        assert_eq!(json["spd"], 33);
        assert_eq!(json["gdop"], 1.5);
        assert_eq!(json["pdop"], 1.2);
    }

    #[tokio::test]
    async fn nan_dilution_values_normalize_to_zero() {
        let (gps, _rx) = service();

        gps.set_gps_position(1.0, 2.0, 3.0, 10.0, 5, f64::NAN, f64::NAN);

        let value = gps.characteristic().read_value().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&value).unwrap();
        assert_eq!(json["gdop"], 0.0);
        assert_eq!(json["pdop"], 0.0);
        assert_eq!(json["tstamp"], 10_000i64);
    }

    #[tokio::test]
    async fn json_fields_appear_in_wire_order() {
        let fix = GpsFix::from_reading(1.0, 2.0, 3.0, 4.0, 5, 6.0, 7.0);
        let text = serde_json::to_string(&fix).unwrap();
        assert_eq!(
            text,
            r#"{"lat":1.0,"long":2.0,"hdg":3.0,"tstamp":4000,"spd":5,"gdop":6.0,"pdop":7.0}"#
        );
    }

    #[tokio::test]
    async fn each_fix_requests_a_notification() {
        let (gps, mut rx) = service();

        gps.set_gps_position(1.0, 2.0, 3.0, 4.0, 5, 6.0, 7.0);
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.path(), gps.characteristic().path());
    }

    #[test]
    fn tree_shape_matches_the_protocol_contract() {
        let (bridge, _rx) = NotificationBridge::new();
        let gps = GpsService::new(0, bridge).unwrap();

        let service = gps.service();
        assert_eq!(service.path().as_str(), "/org/lemonpi/ble/service0");
        assert_eq!(service.characteristics().len(), 1);
        assert_eq!(gps.characteristic().descriptors().len(), 2);
    }
}
