//! LE advertisement object served to BlueZ.

use log::info;
use zbus::interface;
use zvariant::OwnedObjectPath;

use super::APP_PATH_BASE;

/// The advertising payload: local name, advertised service UUIDs and the
/// TX-power flag. Served at `<root>/advertisement<index>` and handed to the
/// LE advertising manager by path.
pub struct Advertisement {
    path: OwnedObjectPath,
    local_name: String,
    service_uuids: Vec<String>,
    include_tx_power: bool,
}

impl Advertisement {
    pub fn new(
        index: usize,
        local_name: &str,
        service_uuids: Vec<String>,
    ) -> anyhow::Result<Self> {
        let path = OwnedObjectPath::try_from(format!("{APP_PATH_BASE}/advertisement{index}"))?;
        Ok(Self {
            path,
            local_name: local_name.to_string(),
            service_uuids,
            include_tx_power: true,
        })
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }
}

#[interface(name = "org.bluez.LEAdvertisement1")]
impl Advertisement {
    #[zbus(property, name = "Type")]
    fn advertising_type(&self) -> &str {
        "peripheral"
    }

    #[zbus(property)]
    fn local_name(&self) -> String {
        self.local_name.clone()
    }

    #[zbus(property, name = "ServiceUUIDs")]
    fn service_uuids(&self) -> Vec<String> {
        self.service_uuids.clone()
    }

    #[zbus(property)]
    fn include_tx_power(&self) -> bool {
        self.include_tx_power
    }

    /// Invoked by the bus daemon when the advertisement is torn down
    /// externally; the controller state is driven by connect/disconnect
    /// signals, so this only leaves a trace in the log.
    fn release(&self) {
        info!("{}: advertisement released", self.path);
    }
}
