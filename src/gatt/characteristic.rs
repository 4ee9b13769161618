//! GATT characteristic node and its capability strategies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, info};
use zbus::interface;
use zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

use super::descriptor::{Descriptor, DescriptorValue};
use super::{
    CLIENT_CONFIG_DESC_UUID, GATT_CHRC_IFACE, InterfaceProps, USER_DESCRIPTION_DESC_UUID, own,
};

/// A single entry of a characteristic's capability set, exposed on the bus
/// as the `Flags` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    Notify,
    Indicate,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Notify => "notify",
            Capability::Indicate => "indicate",
        }
    }
}

/// Strategy behind `ReadValue`. The default serves the latest pushed value;
/// computed strategies re-encode on every read.
pub trait ReadStrategy: Send + Sync {
    fn read_value(&self, chrc: &Characteristic) -> zbus::fdo::Result<Vec<u8>>;
}

/// Default read strategy: the most recent value a producer stored.
pub struct LatestValue;

impl ReadStrategy for LatestValue {
    fn read_value(&self, chrc: &Characteristic) -> zbus::fdo::Result<Vec<u8>> {
        Ok(chrc.latest_value())
    }
}

/// Strategy behind `WriteValue`. Only attached to characteristics whose
/// capability set includes write; mutates local state and nothing else.
pub trait WriteStrategy: Send + Sync {
    fn write_value(&self, chrc: &Characteristic, value: &[u8]) -> zbus::fdo::Result<()>;
}

/// Side effect of the first transition into the notifying state, typically
/// starting a sensor poller through its explicit lifecycle method. Never
/// re-triggered by repeated `StartNotify` calls.
pub trait NotifyActivation: Send + Sync {
    fn on_first_notify(&self);
}

/// A GATT characteristic.
///
/// Owns its descriptors (insertion order is exposure order); the
/// back-reference to the service is the parent path only. The value is an
/// opaque byte sequence with producer-defined encoding, written by sensor
/// workers and read back by the control loop. Workers never touch the bus.
pub struct Characteristic {
    uuid: uuid::Uuid,
    flags: Vec<Capability>,
    path: OwnedObjectPath,
    service_path: OwnedObjectPath,
    descriptors: Vec<Arc<Descriptor>>,
    value: Mutex<Vec<u8>>,
    notifying: Arc<AtomicBool>,
    /// Set between a notification request and its flush; the only state
    /// shared between worker threads and the control loop, so it lives in
    /// an atomic with test-and-set discipline.
    pending_update: AtomicBool,
    activated: AtomicBool,
    read: Arc<dyn ReadStrategy>,
    write: Option<Arc<dyn WriteStrategy>>,
    activation: OnceLock<Arc<dyn NotifyActivation>>,
}

impl Characteristic {
    /// Starts building a characteristic at `<service_path>/char<index>`.
    pub fn builder(
        service_path: &ObjectPath<'_>,
        index: usize,
        uuid: uuid::Uuid,
        flags: Vec<Capability>,
    ) -> CharacteristicBuilder {
        CharacteristicBuilder {
            uuid,
            flags,
            service_path: service_path.to_owned().into(),
            path: format!("{service_path}/char{index}"),
            descriptors: Vec::new(),
            initial_value: Vec::new(),
            read: Arc::new(LatestValue),
            write: None,
            activation: None,
            notifying: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    pub fn service_path(&self) -> &OwnedObjectPath {
        &self.service_path
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.uuid
    }

    pub fn flag_strings(&self) -> Vec<String> {
        self.flags.iter().map(|f| f.as_str().to_string()).collect()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.flags.contains(&capability)
    }

    pub fn descriptors(&self) -> &[Arc<Descriptor>] {
        &self.descriptors
    }

    pub fn descriptor_paths(&self) -> Vec<OwnedObjectPath> {
        self.descriptors.iter().map(|d| d.path().clone()).collect()
    }

    /// Stores a freshly produced value. Safe from any thread; readers always
    /// re-fetch, so the last writer wins.
    pub fn store_value(&self, bytes: Vec<u8>) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = bytes;
    }

    /// The most recent stored value.
    pub fn latest_value(&self) -> Vec<u8> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current encoding as served to the remote central.
    pub fn read_value(&self) -> zbus::fdo::Result<Vec<u8>> {
        self.read.read_value(self)
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying.load(Ordering::Acquire)
    }

    /// Transitions into the notifying state. Idempotent: a repeat call is a
    /// logged no-op. The attached activation runs only on the very first
    /// transition.
    pub fn start_notify(&self) {
        if self.notifying.swap(true, Ordering::AcqRel) {
            info!("{}: already notifying, nothing to do", self.path);
            return;
        }
        info!("{}: notifications enabled", self.path);
        if !self.activated.swap(true, Ordering::AcqRel) {
            if let Some(activation) = self.activation.get() {
                activation.on_first_notify();
            }
        }
    }

    /// Leaves the notifying state; idempotent like [`start_notify`].
    ///
    /// [`start_notify`]: Self::start_notify
    pub fn stop_notify(&self) {
        if !self.notifying.swap(false, Ordering::AcqRel) {
            info!("{}: not notifying, nothing to do", self.path);
            return;
        }
        info!("{}: notifications disabled", self.path);
    }

    /// Attaches the first-notify side effect. May be called at most once,
    /// during wiring, before the characteristic is served.
    pub fn set_activation(&self, activation: Arc<dyn NotifyActivation>) {
        if self.activation.set(activation).is_err() {
            debug!("{}: activation already attached", self.path);
        }
    }

    /// Claims the pending-update slot. Returns `true` for exactly one caller
    /// per coalescing epoch; everyone else is a silent no-op.
    pub(crate) fn set_pending(&self) -> bool {
        self.pending_update
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the pending-update slot. Must happen strictly before the
    /// value is re-read for the flush, or an update landing in between would
    /// be lost.
    pub(crate) fn clear_pending(&self) {
        self.pending_update.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending_update.load(Ordering::Acquire)
    }

    /// Protocol property map: the characteristic interface entry plus the
    /// fields a central needs to walk back up and down the tree.
    pub fn properties(&self) -> zbus::fdo::Result<InterfaceProps> {
        let descriptor_paths: Vec<ObjectPath<'static>> = self
            .descriptors
            .iter()
            .map(|d| d.path().clone().into_inner())
            .collect();
        let props = HashMap::from([
            (
                "UUID".to_string(),
                own(Value::from(self.uuid.to_string()))?,
            ),
            (
                "Service".to_string(),
                own(Value::from(self.service_path.clone().into_inner()))?,
            ),
            ("Flags".to_string(), own(Value::from(self.flag_strings()))?),
            (
                "Descriptors".to_string(),
                own(Value::from(descriptor_paths))?,
            ),
        ]);
        Ok(HashMap::from([(GATT_CHRC_IFACE.to_string(), props)]))
    }
}

/// Assembles a [`Characteristic`] with its descriptors; indices are fixed by
/// insertion order and never change afterwards.
pub struct CharacteristicBuilder {
    uuid: uuid::Uuid,
    flags: Vec<Capability>,
    service_path: OwnedObjectPath,
    path: String,
    descriptors: Vec<Arc<Descriptor>>,
    initial_value: Vec<u8>,
    read: Arc<dyn ReadStrategy>,
    write: Option<Arc<dyn WriteStrategy>>,
    activation: Option<Arc<dyn NotifyActivation>>,
    notifying: Arc<AtomicBool>,
}

impl CharacteristicBuilder {
    /// Adds a descriptor with the next free index.
    pub fn descriptor(
        mut self,
        uuid: &str,
        value: DescriptorValue,
    ) -> anyhow::Result<Self> {
        let path = ObjectPath::try_from(self.path.clone())?;
        let descriptor = Descriptor::new(
            &path,
            self.descriptors.len(),
            uuid,
            vec![Capability::Read],
            value,
        )?;
        self.descriptors.push(Arc::new(descriptor));
        Ok(self)
    }

    /// Adds the human-readable user-description descriptor (`2901`).
    pub fn user_description(self, text: &str) -> anyhow::Result<Self> {
        self.descriptor(
            USER_DESCRIPTION_DESC_UUID,
            DescriptorValue::Static(text.as_bytes().to_vec()),
        )
    }

    /// Adds the client-config descriptor (`2902`), computed from the live
    /// notify state.
    pub fn client_config(self) -> anyhow::Result<Self> {
        let notifying = self.notifying.clone();
        self.descriptor(
            CLIENT_CONFIG_DESC_UUID,
            DescriptorValue::Computed(Arc::new(move || {
                if notifying.load(Ordering::Acquire) {
                    vec![0x01, 0x00]
                } else {
                    vec![0x00, 0x00]
                }
            })),
        )
    }

    pub fn initial_value(mut self, value: Vec<u8>) -> Self {
        self.initial_value = value;
        self
    }

    pub fn read_strategy(mut self, read: Arc<dyn ReadStrategy>) -> Self {
        self.read = read;
        self
    }

    pub fn write_strategy(mut self, write: Arc<dyn WriteStrategy>) -> Self {
        self.write = Some(write);
        self
    }

    pub fn activation(mut self, activation: Arc<dyn NotifyActivation>) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<Characteristic>> {
        let chrc = Characteristic {
            uuid: self.uuid,
            flags: self.flags,
            path: OwnedObjectPath::try_from(self.path)?,
            service_path: self.service_path,
            descriptors: self.descriptors,
            value: Mutex::new(self.initial_value),
            notifying: self.notifying,
            pending_update: AtomicBool::new(false),
            activated: AtomicBool::new(false),
            read: self.read,
            write: self.write,
            activation: OnceLock::new(),
        };
        if let Some(activation) = self.activation {
            chrc.set_activation(activation);
        }
        Ok(Arc::new(chrc))
    }
}

/// D-Bus face of a [`Characteristic`], served at the characteristic's path.
///
/// The `Value` property is what makes notify delivery work: the control loop
/// flushes a coalesced update by emitting PropertiesChanged for it.
pub struct CharacteristicInterface {
    chrc: Arc<Characteristic>,
}

impl CharacteristicInterface {
    pub fn new(chrc: Arc<Characteristic>) -> Self {
        Self { chrc }
    }
}

#[interface(name = "org.bluez.GattCharacteristic1")]
impl CharacteristicInterface {
    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.chrc.uuid().to_string()
    }

    #[zbus(property)]
    fn service(&self) -> OwnedObjectPath {
        self.chrc.service_path().clone()
    }

    #[zbus(property)]
    fn flags(&self) -> Vec<String> {
        self.chrc.flag_strings()
    }

    #[zbus(property)]
    fn descriptors(&self) -> Vec<OwnedObjectPath> {
        self.chrc.descriptor_paths()
    }

    #[zbus(property)]
    fn notifying(&self) -> bool {
        self.chrc.is_notifying()
    }

    #[zbus(property)]
    fn value(&self) -> zbus::fdo::Result<Vec<u8>> {
        self.chrc.read_value()
    }

    fn read_value(&self, _options: HashMap<String, OwnedValue>) -> zbus::fdo::Result<Vec<u8>> {
        self.chrc.read_value()
    }

    fn write_value(
        &self,
        value: Vec<u8>,
        _options: HashMap<String, OwnedValue>,
    ) -> zbus::fdo::Result<()> {
        if !self.chrc.has_capability(Capability::Write) {
            return Err(zbus::fdo::Error::NotSupported(format!(
                "{} is not writable",
                self.chrc.path()
            )));
        }
        match &self.chrc.write {
            Some(strategy) => strategy.write_value(&self.chrc, &value),
            None => Err(zbus::fdo::Error::NotSupported(format!(
                "{} has no write handler",
                self.chrc.path()
            ))),
        }
    }

    fn start_notify(&self) {
        self.chrc.start_notify();
    }

    fn stop_notify(&self) {
        self.chrc.stop_notify();
    }
}
