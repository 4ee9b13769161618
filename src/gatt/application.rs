//! GATT application root: the owned service tree, the managed-objects
//! inventory and the BlueZ registration handshake.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use zbus::{Connection, interface};
use zvariant::OwnedObjectPath;

use crate::bluez::{self, GattManagerProxy};

use super::characteristic::CharacteristicInterface;
use super::descriptor::DescriptorInterface;
use super::service::{Service, ServiceInterface};
use super::{APP_PATH_BASE, InterfaceProps};

/// Root of the GATT object tree.
///
/// Owns the services in registration order (which fixes their `serviceN`
/// indices) and produces the authoritative object inventory a remote
/// central discovers the whole tree from in one call.
pub struct GattApplication {
    path: OwnedObjectPath,
    services: Vec<Arc<Service>>,
}

impl GattApplication {
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: OwnedObjectPath::try_from(APP_PATH_BASE)?,
            services: Vec::new(),
        })
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Index the next registered service will get.
    pub fn next_service_index(&self) -> usize {
        self.services.len()
    }

    pub fn add_service(&mut self, service: Arc<Service>) {
        self.services.push(service);
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    /// Walks services → characteristics → descriptors in tree order and
    /// returns exactly one `(path, properties)` entry per node, with no
    /// duplicates and no omissions. This is the payload of
    /// `GetManagedObjects`; the ordered form keeps it testable even though
    /// a D-Bus dict carries no order on the wire.
    pub fn collect_managed_objects(
        &self,
    ) -> zbus::fdo::Result<Vec<(OwnedObjectPath, InterfaceProps)>> {
        let mut response = Vec::new();
        for service in &self.services {
            response.push((service.path().clone(), service.properties()?));
            for chrc in service.characteristics() {
                response.push((chrc.path().clone(), chrc.properties()?));
                for desc in chrc.descriptors() {
                    response.push((desc.path().clone(), desc.properties()?));
                }
            }
        }
        Ok(response)
    }

    /// Registers every tree node plus the object-manager root on the
    /// connection's object server. Serving each node also gives it the
    /// standard Properties interface.
    pub async fn serve(self: &Arc<Self>, connection: &Connection) -> zbus::Result<()> {
        let server = connection.object_server();
        for service in &self.services {
            server
                .at(service.path(), ServiceInterface::new(service.clone()))
                .await?;
            for chrc in service.characteristics() {
                server
                    .at(chrc.path(), CharacteristicInterface::new(chrc.clone()))
                    .await?;
                for desc in chrc.descriptors() {
                    server
                        .at(desc.path(), DescriptorInterface::new(desc.clone()))
                        .await?;
                }
            }
        }
        server
            .at(&self.path, ObjectManagerInterface::new(self.clone()))
            .await?;
        info!(
            "serving {} services under {}",
            self.services.len(),
            self.path
        );
        Ok(())
    }

    /// Registers the application with the BlueZ GATT manager. A missing
    /// adapter or a refusal is logged and leaves the daemon running
    /// unregistered rather than crashing it.
    pub async fn register(&self, connection: &Connection) -> Result<()> {
        let adapter = bluez::find_adapter(connection)
            .await
            .context("adapter discovery failed")?;
        let Some(adapter) = adapter else {
            warn!("GattManager1 interface not found, application not registered");
            return Ok(());
        };

        let manager = GattManagerProxy::builder(connection)
            .path(adapter.clone())?
            .build()
            .await?;
        match manager
            .register_application(&self.path.as_ref(), HashMap::new())
            .await
        {
            Ok(()) => info!("GATT application registered on {adapter}"),
            Err(e) => warn!("failed to register application: {e}"),
        }
        Ok(())
    }

    /// Unregisters the application during shutdown; tolerates a missing
    /// adapter or registration.
    pub async fn unregister(&self, connection: &Connection) -> Result<()> {
        let Some(adapter) = bluez::find_adapter(connection).await? else {
            return Ok(());
        };
        let manager = GattManagerProxy::builder(connection)
            .path(adapter)?
            .build()
            .await?;
        if let Err(e) = manager.unregister_application(&self.path.as_ref()).await {
            warn!("failed to unregister application: {e}");
        }
        Ok(())
    }
}

/// The `org.freedesktop.DBus.ObjectManager` face of the application root.
pub struct ObjectManagerInterface {
    app: Arc<GattApplication>,
}

impl ObjectManagerInterface {
    pub fn new(app: Arc<GattApplication>) -> Self {
        Self { app }
    }
}

#[interface(name = "org.freedesktop.DBus.ObjectManager")]
impl ObjectManagerInterface {
    fn get_managed_objects(
        &self,
    ) -> zbus::fdo::Result<HashMap<OwnedObjectPath, InterfaceProps>> {
        Ok(self.app.collect_managed_objects()?.into_iter().collect())
    }
}
