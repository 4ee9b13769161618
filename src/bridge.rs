//! Cross-thread notification bridge.
//!
//! Characteristic values change on sensor worker threads, but the D-Bus
//! connection is only ever touched by the control loop. The bridge carries
//! "value changed" requests across that boundary, coalescing bursts so a
//! characteristic is flushed at most once per epoch, carrying the value
//! current at flush time rather than every intermediate one.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use tokio::sync::mpsc;
use zbus::Connection;

use crate::gatt::{Characteristic, CharacteristicInterface};

/// Producer side of the bridge. Cheap to clone; safe from any thread.
#[derive(Clone)]
pub struct NotificationBridge {
    queue: mpsc::UnboundedSender<Arc<Characteristic>>,
}

impl NotificationBridge {
    /// Creates the bridge and the receiving end the control loop drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<Characteristic>>) {
        let (queue, rx) = mpsc::unbounded_channel();
        (Self { queue }, rx)
    }

    /// Requests a notification flush for `chrc`.
    ///
    /// The first request of an epoch claims the characteristic's pending
    /// slot and enqueues it; every further request before the control loop
    /// drains is a silent no-op. N updates before the drain yield exactly
    /// one flushed signal.
    pub fn request_notify(&self, chrc: &Arc<Characteristic>) {
        if !chrc.set_pending() {
            return;
        }
        if self.queue.send(chrc.clone()).is_err() {
            chrc.clear_pending();
            warn!(
                "{}: control loop gone, dropping notification request",
                chrc.path()
            );
        }
    }
}

/// Control-loop half: flushes one coalesced update.
///
/// The pending slot is released *before* the value is re-read, so a value
/// change racing with the flush re-arms a fresh epoch instead of being
/// dropped. The PropertiesChanged emission for `Value` is what BlueZ
/// forwards to subscribed centrals.
pub async fn flush_notification(
    connection: &Connection,
    chrc: &Arc<Characteristic>,
) -> Result<()> {
    chrc.clear_pending();

    let iface = connection
        .object_server()
        .interface::<_, CharacteristicInterface>(chrc.path())
        .await
        .with_context(|| format!("{} not served", chrc.path()))?;
    iface
        .get()
        .await
        .value_changed(iface.signal_emitter())
        .await
        .with_context(|| format!("PropertiesChanged emission failed for {}", chrc.path()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::Capability;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use uuid::uuid;
    use zvariant::OwnedObjectPath;

    const CHRC_UUID: uuid::Uuid = uuid!("28b82eb3-25cd-45ab-8601-3fff6ba3a203");

    fn test_chrc() -> Arc<Characteristic> {
        let service_path = OwnedObjectPath::try_from("/org/lemonpi/ble/service1").unwrap();
        Characteristic::builder(
            &service_path,
            0,
            CHRC_UUID,
            vec![Capability::Read, Capability::Notify],
        )
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn burst_of_requests_enqueues_once() {
        let (bridge, mut rx) = NotificationBridge::new();
        let chrc = test_chrc();

        chrc.store_value(b"32".to_vec());
        bridge.request_notify(&chrc);
        chrc.store_value(b"250".to_vec());
        bridge.request_notify(&chrc);
        chrc.store_value(b"350".to_vec());
        bridge.request_notify(&chrc);

        let queued = rx.try_recv().expect("one request must be queued");
        assert!(rx.try_recv().is_err(), "burst must coalesce to one entry");

        // The flush reads the value current at flush time.
        queued.clear_pending();
        assert_eq!(queued.read_value().unwrap(), b"350".to_vec());
    }

    #[tokio::test]
    async fn new_epoch_starts_after_the_pending_slot_clears() {
        let (bridge, mut rx) = NotificationBridge::new();
        let chrc = test_chrc();

        bridge.request_notify(&chrc);
        let first = rx.try_recv().unwrap();
        first.clear_pending();

        bridge.request_notify(&chrc);
        assert!(rx.try_recv().is_ok(), "post-flush request must enqueue again");
    }

    #[tokio::test]
    async fn request_after_control_loop_drop_releases_the_slot() {
        let (bridge, rx) = NotificationBridge::new();
        let chrc = test_chrc();
        drop(rx);

        bridge.request_notify(&chrc);
        assert!(!chrc.is_pending(), "slot must be released on send failure");
    }

    #[tokio::test]
    async fn distinct_characteristics_do_not_coalesce_together() {
        let (bridge, mut rx) = NotificationBridge::new();
        let first = test_chrc();
        let second = test_chrc();

        bridge.request_notify(&first);
        bridge.request_notify(&second);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    proptest! {
        #[test]
        fn any_burst_size_coalesces_to_one(n in 1usize..50) {
            let (bridge, mut rx) = NotificationBridge::new();
            let chrc = test_chrc();

            for i in 0..n {
                chrc.store_value(i.to_string().into_bytes());
                bridge.request_notify(&chrc);
            }

            prop_assert!(rx.try_recv().is_ok());
            prop_assert!(rx.try_recv().is_err());
        }
    }
}
