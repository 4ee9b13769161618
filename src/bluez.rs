//! BlueZ adapter discovery and manager proxies.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use zbus::Connection;
use zbus::fdo::ObjectManagerProxy;
use zbus::proxy;
use zvariant::{ObjectPath, OwnedObjectPath, Value};

use crate::gatt::{BLUEZ_SERVICE_NAME, GATT_MANAGER_IFACE};

#[proxy(
    interface = "org.bluez.GattManager1",
    default_service = "org.bluez",
    assume_defaults = false
)]
pub trait GattManager {
    fn register_application(
        &self,
        application: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    fn unregister_application(&self, application: &ObjectPath<'_>) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.bluez.LEAdvertisingManager1",
    default_service = "org.bluez",
    assume_defaults = false
)]
pub trait LEAdvertisingManager {
    fn register_advertisement(
        &self,
        advertisement: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    fn unregister_advertisement(&self, advertisement: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// Finds the adapter object carrying the GATT manager interface, optionally
/// pinned to a named adapter (`hci0`-style last path segment).
pub async fn find_adapter(connection: &Connection) -> Result<Option<OwnedObjectPath>> {
    find_named_adapter(connection, None).await
}

pub async fn find_named_adapter(
    connection: &Connection,
    name: Option<&str>,
) -> Result<Option<OwnedObjectPath>> {
    let manager = ObjectManagerProxy::builder(connection)
        .destination(BLUEZ_SERVICE_NAME)?
        .path("/")?
        .build()
        .await
        .context("bluez object manager unavailable")?;

    let objects = manager
        .get_managed_objects()
        .await
        .context("GetManagedObjects on org.bluez failed")?;

    let adapter = objects
        .into_iter()
        .find(|(path, interfaces)| {
            interfaces
                .keys()
                .any(|iface| iface.as_str() == GATT_MANAGER_IFACE)
                && name
                    .map(|n| path.as_str().split('/').next_back() == Some(n))
                    .unwrap_or(true)
        })
        .map(|(path, _)| path);

    Ok(adapter)
}

/// Peripheral-visibility switch the advertising controller drives. The
/// production implementation talks to the LE advertising manager; tests
/// substitute a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdvertisingBackend: Send + Sync {
    async fn register_advertisement(&self) -> Result<()>;
    async fn unregister_advertisement(&self) -> Result<()>;
}

/// Backend registering the advertisement object with BlueZ by path.
pub struct BluezAdvertisingBackend {
    connection: Connection,
    advertisement_path: OwnedObjectPath,
    adapter: Option<String>,
}

impl BluezAdvertisingBackend {
    pub fn new(
        connection: Connection,
        advertisement_path: OwnedObjectPath,
        adapter: Option<String>,
    ) -> Self {
        Self {
            connection,
            advertisement_path,
            adapter,
        }
    }

    async fn manager(&self) -> Result<LEAdvertisingManagerProxy<'_>> {
        let adapter = find_named_adapter(&self.connection, self.adapter.as_deref())
            .await?
            .ok_or_else(|| anyhow::anyhow!("LEAdvertisingManager1 interface not found"))?;
        let proxy = LEAdvertisingManagerProxy::builder(&self.connection)
            .path(adapter)?
            .build()
            .await?;
        Ok(proxy)
    }
}

#[async_trait]
impl AdvertisingBackend for BluezAdvertisingBackend {
    async fn register_advertisement(&self) -> Result<()> {
        let manager = self.manager().await?;
        manager
            .register_advertisement(&self.advertisement_path.as_ref(), HashMap::new())
            .await
            .context("RegisterAdvertisement failed")?;
        info!("advertisement {} registered", self.advertisement_path);
        Ok(())
    }

    async fn unregister_advertisement(&self) -> Result<()> {
        let manager = self.manager().await?;
        manager
            .unregister_advertisement(&self.advertisement_path.as_ref())
            .await
            .context("UnregisterAdvertisement failed")?;
        info!("advertisement {} unregistered", self.advertisement_path);
        Ok(())
    }
}
