//! Connection-driven advertising state machine.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use crate::bluez::AdvertisingBackend;

/// Peripheral visibility states.
///
/// `Connected` suppresses advertising while at least one central is
/// attached; it is left through the debounced restart path only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingState {
    /// Not advertising, no connections.
    Idle,
    /// Broadcasting, zero connections.
    Advertising,
    /// At least one connected device, advertising suppressed.
    Connected,
}

/// Drives advertisement registration from connected-device set membership.
///
/// Owned by the control loop: all mutation happens there, so the set needs
/// no locking. Restart timers are not cancelled on reconnection; each firing
/// re-checks set emptiness instead.
pub struct AdvertisingController {
    backend: Arc<dyn AdvertisingBackend>,
    state: AdvertisingState,
    connected_devices: HashSet<String>,
    restart_delay: Duration,
}

impl AdvertisingController {
    pub fn new(backend: Arc<dyn AdvertisingBackend>, restart_delay: Duration) -> Self {
        Self {
            backend,
            state: AdvertisingState::Idle,
            connected_devices: HashSet::new(),
            restart_delay,
        }
    }

    pub fn state(&self) -> AdvertisingState {
        self.state
    }

    pub fn connected_count(&self) -> usize {
        self.connected_devices.len()
    }

    /// Idle → Advertising. A no-op while already advertising or connected;
    /// a backend failure (including a missing advertising manager) is
    /// logged and leaves the state unchanged.
    pub async fn start_advertising(&mut self) {
        match self.state {
            AdvertisingState::Advertising | AdvertisingState::Connected => {
                debug!("start_advertising: already {:?}, nothing to do", self.state);
            }
            AdvertisingState::Idle => match self.backend.register_advertisement().await {
                Ok(()) => {
                    info!("advertising started");
                    self.state = AdvertisingState::Advertising;
                }
                Err(e) => error!("failed to start advertising: {e}"),
            },
        }
    }

    /// Tears down an active registration; idempotent.
    pub async fn stop_advertising(&mut self) {
        if self.state != AdvertisingState::Advertising {
            debug!("stop_advertising: not advertising, nothing to do");
            return;
        }
        if let Err(e) = self.backend.unregister_advertisement().await {
            error!("failed to stop advertising: {e}");
        }
        self.state = AdvertisingState::Idle;
    }

    /// Handles a device-connected signal. The first connection tears the
    /// advertisement down immediately, synchronously with the signal.
    pub async fn device_connected(&mut self, device: &str) {
        if self.connected_devices.insert(device.to_string()) {
            info!("BLE client connected: {device}");
        }
        match self.state {
            AdvertisingState::Advertising => {
                if let Err(e) = self.backend.unregister_advertisement().await {
                    error!("failed to unregister advertisement: {e}");
                }
                self.state = AdvertisingState::Connected;
            }
            AdvertisingState::Idle => {
                self.state = AdvertisingState::Connected;
            }
            AdvertisingState::Connected => {}
        }
    }

    /// Handles a device-disconnected signal. Returns the debounce delay to
    /// arm when this disconnection emptied the set; the firing re-checks
    /// emptiness, so a reconnection inside the window needs no cancellation.
    pub fn device_disconnected(&mut self, device: &str) -> Option<Duration> {
        if self.connected_devices.remove(device) {
            info!("BLE client disconnected: {device}");
        }
        if self.connected_devices.is_empty() && self.state == AdvertisingState::Connected {
            info!("client disconnected, restarting advertising");
            Some(self.restart_delay)
        } else {
            None
        }
    }

    /// Debounce-timer firing: resume advertising only if the connected set
    /// is still empty at fire time.
    pub async fn restart_if_idle(&mut self) {
        if !self.connected_devices.is_empty() {
            debug!("restart timer fired with clients connected, skipping");
            return;
        }
        if self.state == AdvertisingState::Connected {
            self.state = AdvertisingState::Idle;
        }
        self.start_advertising().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluez::MockAdvertisingBackend;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    const DEVICE_A: &str = "/org/bluez/hci0/dev_12_34_56_AB_CD_E1";
    const DEVICE_B: &str = "/org/bluez/hci0/dev_12_34_56_AB_CD_E2";

    fn controller(backend: MockAdvertisingBackend) -> AdvertisingController {
        AdvertisingController::new(Arc::new(backend), Duration::from_millis(1000))
    }

    #[tokio::test]
    async fn start_advertising_registers_once() {
        let mut backend = MockAdvertisingBackend::new();
        backend
            .expect_register_advertisement()
            .times(1)
            .returning(|| Ok(()));

        let mut ctrl = controller(backend);
        ctrl.start_advertising().await;
        ctrl.start_advertising().await; // idempotent

        assert_eq!(ctrl.state(), AdvertisingState::Advertising);
    }

    #[tokio::test]
    async fn register_failure_leaves_idle() {
        let mut backend = MockAdvertisingBackend::new();
        backend
            .expect_register_advertisement()
            .times(1)
            .returning(|| Err(anyhow!("LEAdvertisingManager1 interface not found")));

        let mut ctrl = controller(backend);
        ctrl.start_advertising().await;

        assert_eq!(ctrl.state(), AdvertisingState::Idle);
    }

    #[tokio::test]
    async fn first_connection_unregisters_exactly_once() {
        let mut backend = MockAdvertisingBackend::new();
        backend
            .expect_register_advertisement()
            .times(1)
            .returning(|| Ok(()));
        backend
            .expect_unregister_advertisement()
            .times(1)
            .returning(|| Ok(()));

        let mut ctrl = controller(backend);
        ctrl.start_advertising().await;
        ctrl.device_connected(DEVICE_A).await;
        ctrl.device_connected(DEVICE_B).await; // already torn down

        assert_eq!(ctrl.state(), AdvertisingState::Connected);
        assert_eq!(ctrl.connected_count(), 2);
    }

    #[tokio::test]
    async fn partial_disconnect_does_not_arm_the_timer() {
        let mut backend = MockAdvertisingBackend::new();
        backend.expect_register_advertisement().returning(|| Ok(()));
        backend
            .expect_unregister_advertisement()
            .returning(|| Ok(()));

        let mut ctrl = controller(backend);
        ctrl.start_advertising().await;
        ctrl.device_connected(DEVICE_A).await;
        ctrl.device_connected(DEVICE_B).await;

        assert_eq!(ctrl.device_disconnected(DEVICE_A), None);
        assert_eq!(
            ctrl.device_disconnected(DEVICE_B),
            Some(Duration::from_millis(1000))
        );
    }

    #[tokio::test]
    async fn reconnection_within_window_suppresses_the_restart() {
        let mut backend = MockAdvertisingBackend::new();
        backend
            .expect_register_advertisement()
            .times(1)
            .returning(|| Ok(()));
        backend
            .expect_unregister_advertisement()
            .times(1)
            .returning(|| Ok(()));

        let mut ctrl = controller(backend);
        ctrl.start_advertising().await;
        ctrl.device_connected(DEVICE_A).await;

        let delay = ctrl.device_disconnected(DEVICE_A);
        assert!(delay.is_some());

        // Device B connects before the timer fires.
        ctrl.device_connected(DEVICE_B).await;
        ctrl.restart_if_idle().await;

        // register_advertisement stays at one call (the initial start).
        assert_eq!(ctrl.state(), AdvertisingState::Connected);
    }

    #[tokio::test]
    async fn restart_fires_when_still_empty() {
        let mut backend = MockAdvertisingBackend::new();
        backend
            .expect_register_advertisement()
            .times(2)
            .returning(|| Ok(()));
        backend
            .expect_unregister_advertisement()
            .times(1)
            .returning(|| Ok(()));

        let mut ctrl = controller(backend);
        ctrl.start_advertising().await;
        ctrl.device_connected(DEVICE_A).await;
        assert!(ctrl.device_disconnected(DEVICE_A).is_some());

        ctrl.restart_if_idle().await;
        assert_eq!(ctrl.state(), AdvertisingState::Advertising);
    }

    #[tokio::test]
    async fn connection_while_idle_suppresses_later_start() {
        let mut backend = MockAdvertisingBackend::new();
        // No register expected at all.
        backend.expect_register_advertisement().times(0);

        let mut ctrl = controller(backend);
        ctrl.device_connected(DEVICE_A).await;
        assert_eq!(ctrl.state(), AdvertisingState::Connected);

        ctrl.start_advertising().await; // no-op while connected
        assert_eq!(ctrl.state(), AdvertisingState::Connected);
    }

    #[tokio::test]
    async fn stop_advertising_is_idempotent() {
        let mut backend = MockAdvertisingBackend::new();
        backend
            .expect_register_advertisement()
            .times(1)
            .returning(|| Ok(()));
        backend
            .expect_unregister_advertisement()
            .times(1)
            .returning(|| Ok(()));

        let mut ctrl = controller(backend);
        ctrl.stop_advertising().await; // nothing registered yet
        ctrl.start_advertising().await;
        ctrl.stop_advertising().await;
        ctrl.stop_advertising().await;

        assert_eq!(ctrl.state(), AdvertisingState::Idle);
    }
}
