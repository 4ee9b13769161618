//! Sensor ingress interfaces and the in-process data sources.
//!
//! Hardware acquisition lives outside this daemon; everything pushes values
//! in through the narrow receiver traits below. Each trait covers one data
//! shape, and composite receivers are trait bounds, not inheritance.

pub mod cpu_thermal;
pub mod synthetic_gps;
pub mod synthetic_obd;

pub use cpu_thermal::CpuThermalSource;
pub use synthetic_gps::SyntheticGpsSource;
pub use synthetic_obd::SyntheticObdSource;

use anyhow::Result;
use async_trait::async_trait;

use crate::workers::WorkerRegistry;

/// Receiver of GPS fixes. Timestamp is seconds since the epoch, speed is
/// miles per hour; `gdop`/`pdop` may be NaN when the constellation cannot
/// provide them.
pub trait GpsReceiver: Send + Sync {
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
    );
}

/// Receiver of engine temperature, degrees Fahrenheit.
pub trait TemperatureReceiver: Send + Sync {
    fn set_temp_f(&self, temperature: i32);
}

/// Receiver of the remaining fuel percentage.
pub trait FuelLevelReceiver: Send + Sync {
    fn set_fuel_percent_remaining(&self, percent: u8);
}

/// Everything an OBD reader pushes.
pub trait ObdReceiver: TemperatureReceiver + FuelLevelReceiver {}

impl<T: TemperatureReceiver + FuelLevelReceiver> ObdReceiver for T {}

/// Receiver of onboard temperature samples, degrees Celsius.
pub trait CelsiusReceiver: Send + Sync {
    fn set_temp_c(&self, celsius: f64);
}

/// A sensor source started at boot under the worker registry. Sources own
/// their loops; they observe the registry's cancellation token within one
/// polling interval and report I/O trouble as disconnect events, retrying
/// forever.
#[async_trait]
pub trait SensorSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self, workers: &mut WorkerRegistry) -> Result<()>;
}
