//! GATT descriptor node.

use std::collections::HashMap;
use std::sync::Arc;

use zbus::interface;
use zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

use super::{GATT_DESC_IFACE, InterfaceProps, characteristic::Capability, own};

/// Value backing of a descriptor: fixed bytes, or recomputed on every read
/// (the client-config descriptor mirrors the characteristic's notify state).
pub enum DescriptorValue {
    Static(Vec<u8>),
    Computed(Arc<dyn Fn() -> Vec<u8> + Send + Sync>),
}

/// A GATT descriptor. Created when its characteristic is built and immutable
/// afterwards; the back-reference to the characteristic is the parent path
/// only, never ownership.
pub struct Descriptor {
    uuid: String,
    flags: Vec<Capability>,
    path: OwnedObjectPath,
    characteristic_path: OwnedObjectPath,
    value: DescriptorValue,
}

impl Descriptor {
    pub(crate) fn new(
        characteristic_path: &ObjectPath<'_>,
        index: usize,
        uuid: &str,
        flags: Vec<Capability>,
        value: DescriptorValue,
    ) -> anyhow::Result<Self> {
        let path = OwnedObjectPath::try_from(format!("{characteristic_path}/desc{index}"))?;
        Ok(Self {
            uuid: uuid.to_string(),
            flags,
            path,
            characteristic_path: characteristic_path.to_owned().into(),
            value,
        })
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn flag_strings(&self) -> Vec<String> {
        self.flags.iter().map(|f| f.as_str().to_string()).collect()
    }

    /// Current byte-sequence value.
    pub fn read_value(&self) -> Vec<u8> {
        match &self.value {
            DescriptorValue::Static(bytes) => bytes.clone(),
            DescriptorValue::Computed(compute) => compute(),
        }
    }

    /// Protocol property map, one entry under the descriptor interface.
    pub fn properties(&self) -> zbus::fdo::Result<InterfaceProps> {
        let props = HashMap::from([
            ("UUID".to_string(), own(Value::from(self.uuid.clone()))?),
            (
                "Characteristic".to_string(),
                own(Value::from(self.characteristic_path.clone().into_inner()))?,
            ),
            ("Flags".to_string(), own(Value::from(self.flag_strings()))?),
        ]);
        Ok(HashMap::from([(GATT_DESC_IFACE.to_string(), props)]))
    }
}

/// D-Bus face of a [`Descriptor`], served at the descriptor's path.
pub struct DescriptorInterface {
    descriptor: Arc<Descriptor>,
}

impl DescriptorInterface {
    pub fn new(descriptor: Arc<Descriptor>) -> Self {
        Self { descriptor }
    }
}

#[interface(name = "org.bluez.GattDescriptor1")]
impl DescriptorInterface {
    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.descriptor.uuid().to_string()
    }

    #[zbus(property)]
    fn characteristic(&self) -> OwnedObjectPath {
        self.descriptor.characteristic_path.clone()
    }

    #[zbus(property)]
    fn flags(&self) -> Vec<String> {
        self.descriptor.flag_strings()
    }

    fn read_value(&self, _options: HashMap<String, OwnedValue>) -> Vec<u8> {
        self.descriptor.read_value()
    }
}
