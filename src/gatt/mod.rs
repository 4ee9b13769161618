//! BlueZ GATT object model: the Service/Characteristic/Descriptor tree the
//! daemon serves over D-Bus, plus the application root and advertisement.
//!
//! Paths follow the scheme `/org/lemonpi/ble/serviceN/charM/descK`, every
//! index zero-based and scoped to its immediate parent; they are assigned at
//! construction time and stable for the process lifetime.

pub mod advertisement;
pub mod application;
pub mod characteristic;
pub mod descriptor;
pub mod service;

pub use advertisement::Advertisement;
pub use application::{GattApplication, ObjectManagerInterface};
pub use characteristic::{
    Capability, Characteristic, CharacteristicBuilder, CharacteristicInterface, LatestValue,
    NotifyActivation, ReadStrategy, WriteStrategy,
};
pub use descriptor::{Descriptor, DescriptorInterface, DescriptorValue};
pub use service::{Service, ServiceInterface};

use std::collections::HashMap;

use zvariant::OwnedValue;

pub const BLUEZ_SERVICE_NAME: &str = "org.bluez";
pub const GATT_MANAGER_IFACE: &str = "org.bluez.GattManager1";
pub const LE_ADVERTISING_MANAGER_IFACE: &str = "org.bluez.LEAdvertisingManager1";

pub const GATT_SERVICE_IFACE: &str = "org.bluez.GattService1";
pub const GATT_CHRC_IFACE: &str = "org.bluez.GattCharacteristic1";
pub const GATT_DESC_IFACE: &str = "org.bluez.GattDescriptor1";
pub const LE_ADVERTISEMENT_IFACE: &str = "org.bluez.LEAdvertisement1";

pub const DEVICE_IFACE: &str = "org.bluez.Device1";
pub const DBUS_PROP_IFACE: &str = "org.freedesktop.DBus.Properties";

/// Root of the daemon's object tree on the bus.
pub const APP_PATH_BASE: &str = "/org/lemonpi/ble";

/// Bluetooth SIG "Characteristic User Description" descriptor.
pub const USER_DESCRIPTION_DESC_UUID: &str = "2901";
/// Bluetooth SIG "Client Characteristic Configuration" descriptor.
pub const CLIENT_CONFIG_DESC_UUID: &str = "2902";

/// Per-interface property map of a single tree node, as consumed by
/// `GetManagedObjects` (`a{sa{sv}}` per object).
pub type InterfaceProps = HashMap<String, HashMap<String, OwnedValue>>;

/// Converts a borrowed D-Bus value into an owned one, mapping the (only
/// fd-related, thus unreachable here) failure into a protocol fault.
pub(crate) fn own(value: zvariant::Value<'_>) -> zbus::fdo::Result<OwnedValue> {
    value
        .try_to_owned()
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
