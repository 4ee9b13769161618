//! Onboard thermometer service: CPU temperature with selectable unit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use uuid::{Uuid, uuid};

use crate::bridge::NotificationBridge;
use crate::gatt::{
    Capability, Characteristic, NotifyActivation, ReadStrategy, Service, WriteStrategy,
};
use crate::sources::CelsiusReceiver;

pub const THERMOMETER_SERVICE_UUID: Uuid = uuid!("00000001-710e-4a5b-8d75-3e5b444bc3cf");
pub const TEMP_CHRC_UUID: Uuid = uuid!("00000002-710e-4a5b-8d75-3e5b444bc3cf");
pub const UNIT_CHRC_UUID: Uuid = uuid!("00000003-710e-4a5b-8d75-3e5b444bc3cf");

/// Latest Celsius sample plus the selected display unit. Shared between the
/// read/write strategies and the ingress side.
struct ThermometerState {
    celsius: Mutex<f64>,
    fahrenheit: AtomicBool,
}

impl ThermometerState {
    fn new() -> Self {
        Self {
            celsius: Mutex::new(0.0),
            fahrenheit: AtomicBool::new(true),
        }
    }

    fn celsius(&self) -> f64 {
        *self
            .celsius
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_celsius(&self, value: f64) {
        *self
            .celsius
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn is_fahrenheit(&self) -> bool {
        self.fahrenheit.load(Ordering::Acquire)
    }

    /// Renders the reading the way it travels: `"72.5 F"` / `"22.5 C"`.
    fn render(&self) -> Vec<u8> {
        let celsius = self.celsius();
        let (temp, unit) = if self.is_fahrenheit() {
            (celsius * 1.8 + 32.0, "F")
        } else {
            (celsius, "C")
        };
        format!("{:.1} {}", temp, unit).into_bytes()
    }
}

/// Read strategy of the temperature characteristic: re-encode from the
/// latest sample on every read, so a unit switch shows up immediately.
struct TemperatureReading {
    state: Arc<ThermometerState>,
}

impl ReadStrategy for TemperatureReading {
    fn read_value(&self, _chrc: &Characteristic) -> zbus::fdo::Result<Vec<u8>> {
        Ok(self.state.render())
    }
}

struct UnitReading {
    state: Arc<ThermometerState>,
}

impl ReadStrategy for UnitReading {
    fn read_value(&self, _chrc: &Characteristic) -> zbus::fdo::Result<Vec<u8>> {
        Ok(vec![if self.state.is_fahrenheit() { b'F' } else { b'C' }])
    }
}

/// Write strategy of the unit characteristic: a single ASCII `C` or `F`,
/// case-insensitive; anything else is an invalid argument.
struct UnitSelection {
    state: Arc<ThermometerState>,
}

impl WriteStrategy for UnitSelection {
    fn write_value(&self, chrc: &Characteristic, value: &[u8]) -> zbus::fdo::Result<()> {
        match value.first().map(u8::to_ascii_uppercase) {
            Some(b'C') => {
                self.state.fahrenheit.store(false, Ordering::Release);
                Ok(())
            }
            Some(b'F') => {
                self.state.fahrenheit.store(true, Ordering::Release);
                Ok(())
            }
            _ => Err(zbus::fdo::Error::InvalidArgs(format!(
                "{}: expected unit byte 'C' or 'F'",
                chrc.path()
            ))),
        }
    }
}

/// Exposes the board temperature with a writable display unit.
///
/// The poller behind the readings is attached after construction via
/// [`attach_poller`] and runs from the temperature characteristic's first
/// StartNotify on.
///
/// [`attach_poller`]: Self::attach_poller
pub struct ThermometerService {
    service: Arc<Service>,
    temp_chrc: Arc<Characteristic>,
    unit_chrc: Arc<Characteristic>,
    state: Arc<ThermometerState>,
    bridge: NotificationBridge,
}

impl ThermometerService {
    pub fn new(index: usize, bridge: NotificationBridge) -> Result<Self> {
        let state = Arc::new(ThermometerState::new());
        let mut service = Service::new(index, THERMOMETER_SERVICE_UUID, true)?;

        let temp_chrc = Characteristic::builder(
            service.path(),
            service.next_characteristic_index(),
            TEMP_CHRC_UUID,
            vec![Capability::Notify, Capability::Read],
        )
        .user_description("CPU Temperature")?
        .client_config()?
        .read_strategy(Arc::new(TemperatureReading {
            state: state.clone(),
        }))
        .build()?;
        service.add_characteristic(temp_chrc.clone());

        let unit_chrc = Characteristic::builder(
            service.path(),
            service.next_characteristic_index(),
            UNIT_CHRC_UUID,
            vec![Capability::Read, Capability::Write],
        )
        .user_description("Temperature Units (F or C)")?
        .read_strategy(Arc::new(UnitReading {
            state: state.clone(),
        }))
        .write_strategy(Arc::new(UnitSelection {
            state: state.clone(),
        }))
        .build()?;
        service.add_characteristic(unit_chrc.clone());

        Ok(Self {
            service: Arc::new(service),
            temp_chrc,
            unit_chrc,
            state,
            bridge,
        })
    }

    /// Wires the temperature poller as the first-notify activation.
    pub fn attach_poller(&self, poller: Arc<dyn NotifyActivation>) {
        self.temp_chrc.set_activation(poller);
    }

    pub fn service(&self) -> Arc<Service> {
        self.service.clone()
    }

    pub fn temperature_characteristic(&self) -> Arc<Characteristic> {
        self.temp_chrc.clone()
    }

    pub fn unit_characteristic(&self) -> Arc<Characteristic> {
        self.unit_chrc.clone()
    }
}

impl CelsiusReceiver for ThermometerService {
    fn set_temp_c(&self, celsius: f64) {
        self.state.set_celsius(celsius);
        self.bridge.request_notify(&self.temp_chrc);
    }
}
