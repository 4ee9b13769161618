//! Domain GATT services: fixed compositions of the object model, the event
//! bus and the notification bridge around one sensor concern each.

pub mod device_status;
pub mod gps;
pub mod obd;
pub mod thermometer;

pub use device_status::DeviceStatusService;
pub use gps::GpsService;
pub use obd::ObdService;
pub use thermometer::ThermometerService;
