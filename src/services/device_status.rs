//! Device status service: which onboard sensors are connected and working.

use std::sync::Arc;

use anyhow::Result;
use log::warn;
use uuid::{Uuid, uuid};

use crate::bridge::NotificationBridge;
use crate::event::{EventBus, EventHandler, EventKind};
use crate::gatt::{Capability, Characteristic, Service};

pub const DEVICE_STATUS_SERVICE_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a205");
pub const OBD_CONNECTED_CHRC_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a206");
pub const GPS_CONNECTED_CHRC_UUID: Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a207");

/// Flips a status characteristic between 1 and 0 on its pair of
/// connectivity events and requests a coalesced notification. Anything
/// outside its pair is logged and ignored.
struct ConnectionStatusHandler {
    chrc: Arc<Characteristic>,
    bridge: NotificationBridge,
    connected: EventKind,
    disconnected: EventKind,
}

impl EventHandler for ConnectionStatusHandler {
    fn handle_event(&self, event: EventKind) -> Result<()> {
        if event == self.connected {
            self.chrc.store_value(vec![1]);
        } else if event == self.disconnected {
            self.chrc.store_value(vec![0]);
        } else {
            warn!("{}: unknown event {event:?}", self.chrc.path());
            return Ok(());
        }
        self.bridge.request_notify(&self.chrc);
        Ok(())
    }
}

/// Sends status on what devices are connected and operating.
///
/// The handlers are owned here so their bus registrations stay live exactly
/// as long as the service.
pub struct DeviceStatusService {
    service: Arc<Service>,
    obd_chrc: Arc<Characteristic>,
    gps_chrc: Arc<Characteristic>,
    _handlers: Vec<Arc<dyn EventHandler>>,
}

impl DeviceStatusService {
    pub fn new(index: usize, event_bus: &EventBus, bridge: NotificationBridge) -> Result<Self> {
        let mut service = Service::new(index, DEVICE_STATUS_SERVICE_UUID, true)?;

        let obd_chrc = Characteristic::builder(
            service.path(),
            service.next_characteristic_index(),
            OBD_CONNECTED_CHRC_UUID,
            vec![Capability::Notify, Capability::Read],
        )
        .user_description("OBD Connection Status")?
        .client_config()?
        .initial_value(vec![0])
        .build()?;
        service.add_characteristic(obd_chrc.clone());

        let gps_chrc = Characteristic::builder(
            service.path(),
            service.next_characteristic_index(),
            GPS_CONNECTED_CHRC_UUID,
            vec![Capability::Notify, Capability::Read],
        )
        .user_description("GPS Connection Status")?
        .client_config()?
        .initial_value(vec![0])
        .build()?;
        service.add_characteristic(gps_chrc.clone());

        let obd_handler: Arc<dyn EventHandler> = Arc::new(ConnectionStatusHandler {
            chrc: obd_chrc.clone(),
            bridge: bridge.clone(),
            connected: EventKind::ObdConnected,
            disconnected: EventKind::ObdDisconnected,
        });
        event_bus.register_handler(EventKind::ObdConnected, &obd_handler);
        event_bus.register_handler(EventKind::ObdDisconnected, &obd_handler);

        let gps_handler: Arc<dyn EventHandler> = Arc::new(ConnectionStatusHandler {
            chrc: gps_chrc.clone(),
            bridge,
            connected: EventKind::GpsConnected,
            disconnected: EventKind::GpsDisconnected,
        });
        event_bus.register_handler(EventKind::GpsConnected, &gps_handler);
        event_bus.register_handler(EventKind::GpsDisconnected, &gps_handler);

        Ok(Self {
            service: Arc::new(service),
            obd_chrc,
            gps_chrc,
            _handlers: vec![obd_handler, gps_handler],
        })
    }

    pub fn service(&self) -> Arc<Service> {
        self.service.clone()
    }

    pub fn obd_characteristic(&self) -> Arc<Characteristic> {
        self.obd_chrc.clone()
    }

    pub fn gps_characteristic(&self) -> Arc<Characteristic> {
        self.gps_chrc.clone()
    }
}
